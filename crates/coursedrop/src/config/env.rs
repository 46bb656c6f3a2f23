//! Typed access to environment-style key/value lookups.

use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Wraps a lookup function; empty and whitespace-only values count as unset.
pub struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::MissingVar { name })
    }

    pub fn string_or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    pub fn parsed_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                reason: format!("'{}': {}", raw, e),
            }),
        }
    }

    /// Whole seconds, rejecting zero.
    pub fn secs_or(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parsed_or(name, default.as_secs())?;
        if secs == 0 {
            return Err(ConfigError::InvalidValue {
                name,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Duration::from_secs(secs))
    }

    /// Accepts `true`/`false`, `1`/`0`, `yes`/`no` in any case.
    pub fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.optional(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    name,
                    reason: format!("'{}' is not a boolean", v),
                }),
            },
        }
    }
}

/// Parses a URL and restricts its scheme.
pub fn parse_url(name: &'static str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        name,
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidValue {
            name,
            reason: format!("scheme '{}' is not one of {:?}", url.scheme(), schemes),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reader(pairs: &[(&str, &str)]) -> EnvReader<impl Fn(&str) -> Option<String>> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvReader::new(move |k: &str| map.get(k).cloned())
    }

    #[test]
    fn test_blank_is_unset() {
        let env = reader(&[("A", "   ")]);
        assert!(env.optional("A").is_none());
        assert!(matches!(
            env.required("A"),
            Err(ConfigError::MissingVar { name: "A" })
        ));
    }

    #[test]
    fn test_parsed_or() {
        let env = reader(&[("N", "7"), ("BAD", "seven")]);
        assert_eq!(env.parsed_or::<u32>("N", 3).unwrap(), 7);
        assert_eq!(env.parsed_or::<u32>("MISSING", 3).unwrap(), 3);
        assert!(env.parsed_or::<u32>("BAD", 3).is_err());
    }

    #[test]
    fn test_secs_rejects_zero() {
        let env = reader(&[("T", "0")]);
        assert!(env.secs_or("T", Duration::from_secs(5)).is_err());
        assert_eq!(
            env.secs_or("U", Duration::from_secs(5)).unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_flag() {
        let env = reader(&[("A", "TRUE"), ("B", "0"), ("C", "maybe")]);
        assert!(env.flag("A").unwrap());
        assert!(!env.flag("B").unwrap());
        assert!(!env.flag("UNSET").unwrap());
        assert!(env.flag("C").is_err());
    }

    #[test]
    fn test_parse_url_scheme() {
        assert!(parse_url("U", "https://x.example.com/hook", &["http", "https"]).is_ok());
        assert!(parse_url("U", "ftp://x.example.com/", &["http", "https"]).is_err());
        assert!(parse_url("U", "not a url", &["http"]).is_err());
    }
}
