use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Authenticated user id. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Returns `None` for blank ids
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Identity(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the currently authenticated identity
pub trait SessionProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

/// Shared sign-in state. Clones observe the same session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    identity: Arc<RwLock<Option<Identity>>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(id: impl Into<String>) -> Self {
        let session = Self::default();
        session.sign_in(id);
        session
    }

    /// Blank ids leave the session signed out
    pub fn sign_in(&self, id: impl Into<String>) {
        let identity = Identity::new(id);
        tracing::debug!(identity = ?identity, "session identity changed");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    pub fn sign_out(&self) {
        tracing::debug!("session signed out");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SessionProvider for Session {
    fn current_identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_ids_are_not_identities() {
        assert!(Identity::new("").is_none());
        assert!(Identity::new("   ").is_none());
        assert_eq!(Identity::new("u1").unwrap().as_str(), "u1");
    }

    #[test]
    fn test_clones_share_sign_in_state() {
        let session = Session::anonymous();
        let observer = session.clone();

        session.sign_in("u1");
        assert_eq!(observer.current_identity(), Identity::new("u1"));

        session.sign_out();
        assert_eq!(observer.current_identity(), None);
    }
}
