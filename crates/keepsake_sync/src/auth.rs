//! The remote session capability.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;

/// Owns the credential used to talk to the object store.
///
/// The pipeline never stores tokens itself; it asks here once per batch
/// and the HTTP adapter asks again per request.
pub trait AuthSession: Send + Sync {
    /// Returns true if a usable session exists.
    fn is_authenticated(&self) -> bool;

    /// Establishes the remote session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if no session can be established.
    fn connect(&self) -> SyncResult<()>;

    /// Returns the bearer token for the next request.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when the session has expired.
    fn bearer_token(&self) -> SyncResult<String>;
}

/// A session holding a fixed token until told otherwise.
#[derive(Debug, Default)]
pub struct StaticAuth {
    token: RwLock<Option<String>>,
}

impl StaticAuth {
    /// A session authenticated with `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// A session with no credential.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Drops the token, as when the remote session expires.
    pub fn expire(&self) {
        *self.token.write() = None;
    }

    /// Installs a fresh token.
    pub fn renew(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }
}

impl AuthSession for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    fn connect(&self) -> SyncResult<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(SyncError::Unauthenticated("no credential available".into()))
        }
    }

    fn bearer_token(&self) -> SyncResult<String> {
        self.token
            .read()
            .clone()
            .ok_or_else(|| SyncError::Unauthenticated("session expired".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_and_renew() {
        let auth = StaticAuth::new("t1");
        assert!(auth.is_authenticated());
        assert_eq!(auth.bearer_token().unwrap(), "t1");

        auth.expire();
        assert!(!auth.is_authenticated());
        assert!(matches!(auth.bearer_token(), Err(SyncError::Unauthenticated(_))));
        assert!(auth.connect().is_err());

        auth.renew("t2");
        assert!(auth.connect().is_ok());
        assert_eq!(auth.bearer_token().unwrap(), "t2");
    }

    #[test]
    fn signed_out_has_no_token() {
        assert!(!StaticAuth::signed_out().is_authenticated());
    }
}
