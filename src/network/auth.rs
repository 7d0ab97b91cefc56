//! Connection authentication
//!
//! The server asks an [`Authenticator`] whether the credential presented in
//! a HELLO frame may open a session. Rejections carry the close code and
//! reason sent back to the client.

use crate::protocol::CloseCode;

/// Why a connection was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: CloseCode,
    pub reason: String,
}

impl Rejection {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn missing_credentials() -> Self {
        Self::new(
            CloseCode::MissingCredentials,
            "Unauthorized: No credentials provided",
        )
    }

    pub fn invalid_credentials() -> Self {
        Self::new(
            CloseCode::InvalidCredentials,
            "Unauthorized: Invalid credentials",
        )
    }
}

/// Decides whether a presented credential may open a session
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: Option<&str>) -> Result<(), Rejection>;
}

impl<F> Authenticator for F
where
    F: Fn(Option<&str>) -> Result<(), Rejection> + Send + Sync,
{
    fn authenticate(&self, credential: Option<&str>) -> Result<(), Rejection> {
        self(credential)
    }
}

/// Accepts every connection
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _credential: Option<&str>) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Requires one shared bearer token
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    token: String,
}

impl TokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, credential: Option<&str>) -> Result<(), Rejection> {
        match credential {
            None => Err(Rejection::missing_credentials()),
            Some(presented) if presented == self.token => Ok(()),
            Some(_) => Err(Rejection::invalid_credentials()),
        }
    }
}
