//! Configuration Module
//!
//! Loads `config.json` from the data root. A missing file is replaced by a
//! template and the caller is told to stop; so is a file whose credentials
//! still hold `<placeholder>` values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::write_json;
use crate::types::Account;

pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_LOGIN_URL: &str = "https://www.frc.utn.edu.ar/logon.frc";
const DEFAULT_PORTAL_URL: &str = "https://a4.frc.utn.edu.ar/4/default.jsp";
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
const DEFAULT_PERIOD_MINUTES: u64 = 60;
/// One week.
pub const MAX_PERIOD_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(alias = "legajo")]
    pub account_id: String,
    #[serde(alias = "password")]
    pub secret: String,
    #[serde(alias = "especialidad")]
    pub realm: String,
    #[serde(alias = "token")]
    pub bot_token: String,
    #[serde(alias = "frecuencia", default = "default_period")]
    pub check_period_minutes: u64,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

fn default_period() -> u64 {
    DEFAULT_PERIOD_MINUTES
}

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_string()
}

fn default_portal_url() -> String {
    DEFAULT_PORTAL_URL.to_string()
}

fn default_webdriver_url() -> String {
    DEFAULT_WEBDRIVER_URL.to_string()
}

fn default_headless() -> bool {
    true
}

/// Outcome of reading the config file at startup.
#[derive(Debug)]
pub enum ConfigStatus {
    Ready(Config),
    /// A template was written (or is still unedited) at this path.
    NeedsEditing(PathBuf),
}

impl Config {
    pub fn template() -> Self {
        Self {
            account_id: "<account id>".to_string(),
            secret: "<password>".to_string(),
            realm: "<speciality/server>".to_string(),
            bot_token: "<telegram bot token>".to_string(),
            check_period_minutes: DEFAULT_PERIOD_MINUTES,
            login_url: default_login_url(),
            portal_url: default_portal_url(),
            webdriver_url: default_webdriver_url(),
            headless: true,
        }
    }

    /// True while any credential field still looks like `<something>`.
    pub fn has_placeholders(&self) -> bool {
        [&self.account_id, &self.secret, &self.realm, &self.bot_token]
            .iter()
            .any(|v| is_placeholder(v))
    }

    pub fn account(&self) -> Account {
        Account {
            id: self.account_id.clone(),
            secret: self.secret.clone(),
            realm: self.realm.clone(),
        }
    }

    pub fn check_period(&self) -> Duration {
        minutes(self.check_period_minutes)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self).with_context(|| format!("Failed to write config to {:?}", path))
    }
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || (value.starts_with('<') && value.ends_with('>'))
}

pub fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

/// Accepted check periods, in minutes.
pub fn is_valid_period(m: u64) -> bool {
    (1..=MAX_PERIOD_MINUTES).contains(&m)
}

pub fn config_path(root: &str) -> PathBuf {
    PathBuf::from(root).join(CONFIG_FILE)
}

/// Loads the config, writing a template when none exists yet.
pub fn load_config(root: &str) -> Result<ConfigStatus> {
    let path = config_path(root);

    if !path.exists() {
        Config::template().save(&path)?;
        return Ok(ConfigStatus::NeedsEditing(path));
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {:?}", path))?;

    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config JSON in {:?}", path))?;

    if config.has_placeholders() {
        return Ok(ConfigStatus::NeedsEditing(path));
    }
    if !is_valid_period(config.check_period_minutes) {
        bail!(
            "Invalid check_period_minutes {} in {:?}: expected 1..={}",
            config.check_period_minutes,
            path,
            MAX_PERIOD_MINUTES
        );
    }

    Ok(ConfigStatus::Ready(config))
}
