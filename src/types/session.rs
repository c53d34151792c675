//! Session credential

use std::fmt;

/// Opaque credential issued by the auth service
///
/// The token is never printed: `Debug` redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    user_id: String,
    token: String,
}

impl SessionCredential {
    /// Create a credential; returns `None` when either part is blank
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Option<Self> {
        let user_id = user_id.into();
        let token = token.into();
        if user_id.trim().is_empty() || token.trim().is_empty() {
            return None;
        }
        Some(SessionCredential { user_id, token })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_parts_rejected() {
        assert!(SessionCredential::new("", "token").is_none());
        assert!(SessionCredential::new("user-1", "  ").is_none());
        assert!(SessionCredential::new("user-1", "token").is_some());
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = SessionCredential::new("user-1", "s3cret").unwrap();
        let printed = format!("{credential:?}");
        assert!(printed.contains("user-1"));
        assert!(!printed.contains("s3cret"));
    }
}
