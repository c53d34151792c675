//! Session context
//!
//! Everything the connection layer needs from its host lives in one owned
//! value: configuration plus the (optional) session credential. The
//! supervisor takes it by value at construction, so there is no process-wide
//! socket or session state.

use crate::config::ChatLinkConfig;
use crate::error::Result;
use crate::types::SessionCredential;

/// Configuration and credential for one supervised session
#[derive(Debug, Clone)]
pub struct SessionContext {
    config: ChatLinkConfig,
    credential: Option<SessionCredential>,
}

impl SessionContext {
    /// Create a context without a credential
    ///
    /// The configuration is validated here so that later stages never see
    /// impossible timings.
    pub fn new(config: ChatLinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(SessionContext {
            config,
            credential: None,
        })
    }

    /// Attach a credential (builder pattern)
    pub fn with_credential(mut self, credential: SessionCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn config(&self) -> &ChatLinkConfig {
        &self.config
    }

    pub fn credential(&self) -> Option<&SessionCredential> {
        self.credential.as_ref()
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub(crate) fn set_credential(&mut self, credential: Option<SessionCredential>) {
        self.credential = credential;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_lifecycle() {
        let ctx = SessionContext::new(ChatLinkConfig::default()).unwrap();
        assert!(!ctx.has_credential());

        let credential = SessionCredential::new("user-1", "token").unwrap();
        let mut ctx = ctx.with_credential(credential);
        assert_eq!(ctx.credential().map(|c| c.user_id()), Some("user-1"));

        ctx.set_credential(None);
        assert!(ctx.credential().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ChatLinkConfig::default();
        config.polling.max_retries = 0;
        assert!(SessionContext::new(config).is_err());
    }
}
