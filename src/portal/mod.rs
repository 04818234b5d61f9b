//! Portal access: the browser driver contract, session handling and
//! extraction of courses and grades.

pub mod extract;
pub mod selenium;
pub mod session;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Account, SessionCookie};

pub use extract::{extract_courses, extract_grades, extract_snapshot, ExtractOptions};
pub use selenium::SeleniumLauncher;
pub use session::SessionManager;

/// Where a page load ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub status: u16,
    pub final_url: String,
}

impl Navigation {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Login form contents.
#[derive(Debug, Clone, Copy)]
pub struct LoginForm<'a> {
    pub url: &'a str,
    pub account: &'a Account,
}

/// One open browser page, owned by a single cycle.
#[async_trait]
pub trait PortalDriver: Send {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<()>;

    async fn navigate(&mut self, url: &str) -> Result<Navigation>;

    /// Submits the login form and returns the cookies the portal handed out.
    async fn submit_login(&mut self, form: LoginForm<'_>) -> Result<Vec<SessionCookie>>;

    /// Waits up to `timeout` for `selector` and clicks it.
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Waits up to `timeout` for `selector` and returns its outer HTML.
    async fn outer_html(&mut self, selector: &str, timeout: Duration) -> Result<String>;

    async fn close(self: Box<Self>);
}

/// Opens a fresh browser page for each cycle.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PortalDriver>>;
}

/// Selector for an element by id, safe for ids that start with a digit.
pub fn id_selector(id: &str) -> String {
    format!("[id=\"{}\"]", id.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_success_range() {
        let nav = |status| Navigation {
            status,
            final_url: String::new(),
        };
        assert!(nav(200).is_success());
        assert!(nav(204).is_success());
        assert!(!nav(302).is_success());
        assert!(!nav(503).is_success());
    }

    #[test]
    fn test_id_selector() {
        assert_eq!(id_selector("idCurso12"), "[id=\"idCurso12\"]");
    }
}
