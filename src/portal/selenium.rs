use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::time::Duration;
use thirtyfour::components::SelectElement;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BrowserLauncher, LoginForm, Navigation, PortalDriver};
use crate::error::{Result, WatchError};
use crate::types::SessionCookie;

const USER_INPUT: &str = "#txtUsuario";
const PASSWORD_INPUT: &str = "#pwdClave";
const REALM_SELECT: &str = "#txtDominios";
const SUBMIT_BUTTON: &str = "#btnEnviar";

const QUERY_POLL: Duration = Duration::from_millis(250);
const LOGIN_WAIT: Duration = Duration::from_secs(15);

const FIREFOX_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.5; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0",
];

/// HTTP status of the last document load, from the Navigation Timing API.
/// Browsers without `responseStatus` report 0.
const RESPONSE_STATUS_SCRIPT: &str = r#"
    const nav = performance.getEntriesByType('navigation')[0];
    return nav && nav.responseStatus ? nav.responseStatus : 0;
"#;

/// Starts headless Chrome sessions through a ChromeDriver endpoint.
#[derive(Debug, Clone)]
pub struct SeleniumLauncher {
    pub webdriver_url: String,
    pub headless: bool,
    /// Used for cookies that carry no domain of their own.
    pub cookie_url: String,
}

#[async_trait]
impl BrowserLauncher for SeleniumLauncher {
    async fn launch(&self) -> Result<Box<dyn PortalDriver>> {
        let mut caps = DesiredCapabilities::chrome();
        let user_agent = FIREFOX_USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(FIREFOX_USER_AGENTS[0]);

        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1920,1080".to_string(),
            "--ignore-certificate-errors".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--user-agent={}", user_agent),
        ];
        if self.headless {
            args.insert(0, "--headless=new".to_string());
        }
        for arg in &args {
            caps.add_arg(arg).map_err(WatchError::driver)?;
        }

        let driver = WebDriver::new(&self.webdriver_url, caps)
            .await
            .map_err(|e| WatchError::driver(format!("Failed to connect to ChromeDriver: {}", e)))?;

        debug!(%user_agent, "Browser started");
        Ok(Box::new(SeleniumDriver {
            driver,
            cookie_url: self.cookie_url.clone(),
        }))
    }
}

pub struct SeleniumDriver {
    driver: WebDriver,
    cookie_url: String,
}

impl SeleniumDriver {
    async fn find(&self, selector: &str, timeout: Duration) -> Result<WebElement> {
        self.driver
            .query(By::Css(selector))
            .wait(timeout, QUERY_POLL)
            .first()
            .await
            .map_err(|e| {
                debug!("Query for {} failed: {}", selector, e);
                WatchError::timeout(selector)
            })
    }

    async fn current_url(&self) -> Result<String> {
        let url = self.driver.current_url().await.map_err(WatchError::driver)?;
        Ok(url.to_string())
    }

    async fn response_status(&self) -> Result<u16> {
        let ret = self
            .driver
            .execute(RESPONSE_STATUS_SCRIPT, Vec::new())
            .await
            .map_err(WatchError::driver)?;
        let status = ret.json().as_u64().unwrap_or(0);
        // Unknown status: the document loaded, so treat it as OK.
        Ok(if status == 0 { 200 } else { status as u16 })
    }

    fn dev_tools(&self) -> ChromeDevTools {
        ChromeDevTools::new(self.driver.handle.clone())
    }
}

#[async_trait]
impl PortalDriver for SeleniumDriver {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }

        let params: Vec<Value> = cookies
            .iter()
            .map(|c| {
                let mut cookie = json!({ "name": c.name, "value": c.value });
                match &c.domain {
                    Some(domain) => cookie["domain"] = json!(domain),
                    None => cookie["url"] = json!(self.cookie_url),
                }
                if let Some(path) = &c.path {
                    cookie["path"] = json!(path);
                }
                if let Some(secure) = c.secure {
                    cookie["secure"] = json!(secure);
                }
                if let Some(http_only) = c.http_only {
                    cookie["httpOnly"] = json!(http_only);
                }
                cookie
            })
            .collect();

        self.dev_tools()
            .execute_cdp_with_params("Network.setCookies", json!({ "cookies": params }))
            .await
            .map_err(WatchError::driver)?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<Navigation> {
        self.driver
            .goto(url)
            .await
            .map_err(|e| WatchError::unavailable(url, e.to_string()))?;

        Ok(Navigation {
            status: self.response_status().await?,
            final_url: self.current_url().await?,
        })
    }

    async fn submit_login(&mut self, form: LoginForm<'_>) -> Result<Vec<SessionCookie>> {
        let nav = self.navigate(form.url).await?;
        if !nav.is_success() {
            return Err(WatchError::unavailable(form.url, format!("HTTP {}", nav.status)));
        }

        let user = self.find(USER_INPUT, LOGIN_WAIT).await?;
        let password = self.find(PASSWORD_INPUT, LOGIN_WAIT).await?;
        user.send_keys(form.account.id.as_str())
            .await
            .map_err(WatchError::driver)?;
        password
            .send_keys(form.account.secret.as_str())
            .await
            .map_err(WatchError::driver)?;

        let realm = self.find(REALM_SELECT, LOGIN_WAIT).await?;
        SelectElement::new(&realm)
            .await
            .map_err(WatchError::driver)?
            .select_by_value(&form.account.realm)
            .await
            .map_err(WatchError::driver)?;

        let login_page = self.current_url().await?;
        self.find(SUBMIT_BUTTON, LOGIN_WAIT)
            .await?
            .click()
            .await
            .map_err(WatchError::driver)?;

        // Wait for the form post to leave the login page.
        let deadline = Instant::now() + LOGIN_WAIT;
        while self.current_url().await? == login_page {
            if Instant::now() >= deadline {
                debug!("Still on the login page after submitting");
                break;
            }
            tokio::time::sleep(QUERY_POLL).await;
        }

        let all = self
            .dev_tools()
            .execute_cdp("Network.getAllCookies")
            .await
            .map_err(WatchError::driver)?;
        let cookies: Vec<SessionCookie> = serde_json::from_value(all["cookies"].clone())
            .map_err(|e| WatchError::driver(format!("Unexpected cookie payload: {}", e)))?;
        Ok(cookies)
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let element = self.find(selector, timeout).await?;
        // The panel icons are not always interactable; a script click matches
        // what a user's click triggers.
        self.driver
            .execute("arguments[0].click();", vec![element.to_json().map_err(WatchError::driver)?])
            .await
            .map_err(WatchError::driver)?;
        Ok(())
    }

    async fn outer_html(&mut self, selector: &str, timeout: Duration) -> Result<String> {
        self.find(selector, timeout)
            .await?
            .outer_html()
            .await
            .map_err(WatchError::driver)
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.driver.quit().await {
            warn!("Failed to quit browser: {}", e);
        }
    }
}
