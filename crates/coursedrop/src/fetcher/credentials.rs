use secrecy::SecretString;

/// Supplies credentials to the fetch tool.
///
/// Credentials reach the child only as environment variables, so they
/// never appear in a process listing.
pub trait CredentialSource: Send + Sync {
    fn environment(&self) -> Vec<(String, SecretString)>;
}

pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn environment(&self) -> Vec<(String, SecretString)> {
        Vec::new()
    }
}

/// A single bearer token exported under a fixed variable name.
pub struct EnvTokenCredentials {
    var_name: String,
    token: SecretString,
}

impl EnvTokenCredentials {
    pub const DEFAULT_VAR: &'static str = "FETCHER_TOKEN";

    pub fn new(var_name: impl Into<String>, token: SecretString) -> Self {
        Self {
            var_name: var_name.into(),
            token,
        }
    }
}

impl CredentialSource for EnvTokenCredentials {
    fn environment(&self) -> Vec<(String, SecretString)> {
        vec![(self.var_name.clone(), self.token.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_no_credentials_is_empty() {
        assert!(NoCredentials.environment().is_empty());
    }

    #[test]
    fn test_env_token() {
        let creds = EnvTokenCredentials::new("ACCESS_TOKEN", SecretString::from("abc".to_string()));
        let env = creds.environment();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].0, "ACCESS_TOKEN");
        assert_eq!(env[0].1.expose_secret(), "abc");
    }
}
