//! Error taxonomy for a check cycle.
//!
//! Every variant is local to one cycle: the cycle aborts, the stored snapshot
//! is left untouched and the next tick runs normally.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Error, Debug)]
pub enum WatchError {
    /// Navigation or login returned a non-success status.
    #[error("Portal unavailable at {url}: {reason}")]
    PortalUnavailable { url: String, reason: String },

    /// The portal kept redirecting to the login page after a fresh login.
    #[error("Login rejected for account '{account}'")]
    LoginRejected { account: String },

    /// An expected element never appeared or never stopped changing.
    #[error("Timed out waiting for '{selector}'")]
    ExtractionTimeout { selector: String },

    /// The browser session could not be started or stopped responding.
    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl WatchError {
    pub fn unavailable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortalUnavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(selector: impl Into<String>) -> Self {
        Self::ExtractionTimeout {
            selector: selector.into(),
        }
    }

    pub fn driver(message: impl std::fmt::Display) -> Self {
        Self::Driver(message.to_string())
    }

    /// Whether the failure means the portal could not be used this cycle.
    ///
    /// Rejected logins and driver failures are reported the same way as an
    /// outage.
    pub fn is_portal_failure(&self) -> bool {
        matches!(
            self,
            Self::PortalUnavailable { .. } | Self::LoginRejected { .. } | Self::Driver(_)
        )
    }
}
