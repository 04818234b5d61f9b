//! Session Manager
//!
//! The portal expires sessions silently: an expired session shows up as a
//! redirect away from the requested page. `acquire` detects that, logs in
//! once, persists the new cookies and retries the page.

use tracing::{debug, info, warn};

use super::{LoginForm, Navigation, PortalDriver};
use crate::error::{Result, WatchError};
use crate::storage::CredentialStore;
use crate::types::{Account, SessionCookie};

pub struct SessionManager {
    account: Account,
    login_url: String,
    store: CredentialStore,
    cookies: Vec<SessionCookie>,
}

impl SessionManager {
    /// Starts from whatever cookies were cached on disk.
    pub fn new(account: Account, login_url: impl Into<String>, store: CredentialStore) -> anyhow::Result<Self> {
        let cookies = store.load()?;
        Ok(Self {
            account,
            login_url: login_url.into(),
            store,
            cookies,
        })
    }

    pub fn has_cached_session(&self) -> bool {
        !self.cookies.is_empty()
    }

    /// Leaves `driver` on `target_url` with a valid session.
    ///
    /// At most one login per call. A non-success status at any point aborts
    /// with `PortalUnavailable`.
    pub async fn acquire(&mut self, driver: &mut dyn PortalDriver, target_url: &str) -> Result<()> {
        info!("Trying to open {}", target_url);

        if self.has_cached_session() {
            driver.set_cookies(&self.cookies).await?;
            let nav = driver.navigate(target_url).await?;
            ensure_success(&nav, target_url)?;

            if nav.final_url == target_url {
                info!("Opened {}", target_url);
                return Ok(());
            }
            warn!(redirected_to = %nav.final_url, "Session expired");
        } else {
            debug!("No cached session");
        }

        self.login(driver).await?;
        driver.set_cookies(&self.cookies).await?;

        let nav = driver.navigate(target_url).await?;
        ensure_success(&nav, target_url)?;

        if nav.final_url != target_url {
            return Err(WatchError::LoginRejected {
                account: self.account.id.clone(),
            });
        }

        info!("Opened {}", target_url);
        Ok(())
    }

    async fn login(&mut self, driver: &mut dyn PortalDriver) -> Result<()> {
        info!("Logging in...");
        let cookies = driver
            .submit_login(LoginForm {
                url: &self.login_url,
                account: &self.account,
            })
            .await?;

        self.store.save(&cookies)?;
        self.cookies = cookies;
        info!(cookies = self.cookies.len(), "Logged in");
        Ok(())
    }
}

fn ensure_success(nav: &Navigation, url: &str) -> Result<()> {
    if nav.is_success() {
        Ok(())
    } else {
        Err(WatchError::unavailable(url, format!("HTTP {}", nav.status)))
    }
}
