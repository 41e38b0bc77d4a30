//! Bearer token providers.

use crate::remote::RemoteError;

/// Supplies the bearer token sent with every remote request.
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    /// Returns `RemoteError::AuthError` if no token is available.
    fn bearer_token(&self) -> Result<String, RemoteError>;
}

/// A fixed token, usually from the config file or environment.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Result<String, RemoteError> {
        if self.0.is_empty() {
            return Err(RemoteError::AuthError);
        }
        Ok(self.0.clone())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

/// Token stored in the platform keyring.
///
/// When the keyring has no entry and a fallback token is configured, the
/// fallback is written to the keyring and used.
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    service: String,
    account: String,
    fallback: Option<String>,
}

impl KeyringCredentials {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, token: Option<String>) -> Self {
        self.fallback = token.filter(|t| !t.is_empty());
        self
    }

    fn entry(&self) -> Result<keyring::Entry, RemoteError> {
        keyring::Entry::new(&self.service, &self.account).map_err(|e| {
            tracing::error!("Keyring unavailable for {}: {}", self.service, e);
            RemoteError::AuthError
        })
    }
}

impl CredentialProvider for KeyringCredentials {
    fn bearer_token(&self) -> Result<String, RemoteError> {
        let entry = self.entry()?;

        match entry.get_password() {
            Ok(token) => Ok(token),
            Err(keyring::Error::NoEntry) => {
                let Some(fallback) = &self.fallback else {
                    tracing::warn!("No token stored in keyring for {}", self.service);
                    return Err(RemoteError::AuthError);
                };
                if let Err(e) = entry.set_password(fallback) {
                    tracing::warn!("Failed to store token in keyring: {}", e);
                } else {
                    tracing::info!("Stored configured token in keyring for {}", self.service);
                }
                Ok(fallback.clone())
            }
            Err(e) => {
                tracing::error!("Failed to read token from keyring: {}", e);
                match &self.fallback {
                    Some(fallback) => Ok(fallback.clone()),
                    None => Err(RemoteError::AuthError),
                }
            }
        }
    }
}
