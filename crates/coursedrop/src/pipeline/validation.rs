//! Input checks applied before any external process sees a job.

use url::Url;

use crate::worker::job::Job;

use super::error::{ErrorType, JobError};

pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_URL_LEN: usize = 2048;

/// Characters with meaning to a shell or a line-oriented log.
pub const FORBIDDEN_URL_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\n', '\r', '\t',
];

fn invalid(message: impl Into<String>) -> JobError {
    JobError::new(ErrorType::ValidationError, message)
}

pub fn validate_email(email: &str) -> Result<(), JobError> {
    if email.is_empty() {
        return Err(invalid("email is empty"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(invalid(format!(
            "email exceeds {} characters",
            MAX_EMAIL_LEN
        )));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid("email contains whitespace"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(invalid("email must have the form local@domain")),
    }
}

/// Checks a course URL against the permitted content domain.
///
/// Characters are checked on the raw string, before parsing, because the
/// URL parser silently drops tabs and newlines.
pub fn validate_course_url(raw: &str, content_domain: &str) -> Result<Url, JobError> {
    if raw.is_empty() {
        return Err(invalid("course URL is empty"));
    }
    if raw.len() > MAX_URL_LEN {
        return Err(invalid(format!(
            "course URL exceeds {} characters",
            MAX_URL_LEN
        )));
    }
    if let Some(c) = raw.chars().find(|c| FORBIDDEN_URL_CHARS.contains(c)) {
        return Err(invalid(format!(
            "course URL contains forbidden character {:?}",
            c
        )));
    }

    let url = Url::parse(raw).map_err(|e| invalid(format!("course URL is malformed: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!(
            "course URL scheme '{}' is not allowed",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| invalid("course URL has no host"))?
        .to_ascii_lowercase();
    let domain = content_domain.to_ascii_lowercase();
    let permitted = host == domain || host.ends_with(&format!(".{}", domain));
    if !permitted {
        return Err(invalid(format!(
            "course URL host '{}' is not {} or a subdomain of it",
            host, domain
        )));
    }

    Ok(url)
}

pub fn validate_job(job: &Job, content_domain: &str) -> Result<(), JobError> {
    if job.job_id <= 0 {
        return Err(invalid(format!("job id {} is not positive", job.job_id)));
    }
    validate_email(&job.user_email)?;
    validate_course_url(&job.source_url, content_domain)?;
    Ok(())
}
