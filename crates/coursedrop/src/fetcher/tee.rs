use std::io::{self, Write};

/// Duplicates every write to two sinks.
///
/// Both sinks always receive the bytes; the first error seen is returned
/// after the second sink has been written.
pub struct TeeWriter<A: Write, B: Write> {
    primary: A,
    secondary: B,
}

impl<A: Write, B: Write> TeeWriter<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }

    pub fn into_inner(self) -> (A, B) {
        (self.primary, self.secondary)
    }
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let first = self.primary.write_all(buf);
        let second = self.secondary.write_all(buf);
        first.and(second)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let first = self.primary.flush();
        let second = self.secondary.flush();
        first.and(second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_both_sinks_receive_bytes() {
        let mut tee = TeeWriter::new(Vec::new(), Vec::new());
        writeln!(tee, "lecture 1 of 12").unwrap();
        tee.flush().unwrap();

        let (a, b) = tee.into_inner();
        assert_eq!(a, b"lecture 1 of 12\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_secondary_written_when_primary_fails() {
        let mut tee = TeeWriter::new(Broken, Vec::new());
        let err = tee.write(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let (_, b) = tee.into_inner();
        assert_eq!(b, b"data");
    }
}
