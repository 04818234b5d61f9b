//! Operator commands
//!
//! Commands only signal the scheduler or append to the recipient list; the
//! snapshot and the session are touched exclusively by gated jobs.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::config::{is_valid_period, minutes, Config, MAX_PERIOD_MINUTES};
use crate::monitor::GradeMonitor;
use crate::scheduler::{Job, RunNow, Scheduler, Toggle};
use crate::storage::RecipientStore;
use crate::types::ChatId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/test`
    Ping,
    /// `/addme`
    Register,
    Start,
    Stop,
    Status,
    /// `/setfrec <minutes>`; `None` when the argument is missing or outside
    /// one minute to one week.
    SetPeriod(Option<u64>),
    /// `/loadmats`
    ReloadCourses,
    /// `/check`
    Check,
}

impl Command {
    /// Parses `/name[@bot] [args]`. Anything else is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);

        let command = match name.to_ascii_lowercase().as_str() {
            "test" => Self::Ping,
            "addme" => Self::Register,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "status" => Self::Status,
            "setfrec" => Self::SetPeriod(
                parts
                    .next()
                    .and_then(|arg| arg.parse::<u64>().ok())
                    .filter(|m| is_valid_period(*m)),
            ),
            "loadmats" => Self::ReloadCourses,
            "check" => Self::Check,
            _ => return None,
        };
        Some(command)
    }
}

/// Executes commands and produces the reply text.
pub struct Controller {
    monitor: Arc<GradeMonitor>,
    scheduler: Arc<Scheduler>,
    recipients: Arc<RecipientStore>,
    config: Mutex<Config>,
    config_path: PathBuf,
}

impl Controller {
    pub fn new(
        monitor: Arc<GradeMonitor>,
        scheduler: Arc<Scheduler>,
        recipients: Arc<RecipientStore>,
        config: Config,
        config_path: PathBuf,
    ) -> Self {
        Self {
            monitor,
            scheduler,
            recipients,
            config: Mutex::new(config),
            config_path,
        }
    }

    pub fn handle(&self, chat: ChatId, command: Command) -> String {
        match command {
            Command::Ping => "OK".to_string(),
            Command::Register => match self.recipients.add(chat) {
                Ok(true) => {
                    info!(%chat, "Chat registered");
                    "Chat added to the notification list".to_string()
                }
                Ok(false) => "This chat is already on the notification list".to_string(),
                Err(e) => {
                    warn!(%chat, "Failed to register chat: {:#}", e);
                    "Could not register this chat, see the log".to_string()
                }
            },
            Command::Start => {
                let period = self.scheduler.period();
                match self.scheduler.start(self.monitor.clone(), period) {
                    Toggle::Started => "Bot reactivated".to_string(),
                    _ => "The bot is already running".to_string(),
                }
            }
            Command::Stop => match self.scheduler.stop() {
                Toggle::Stopped => "Bot deactivated".to_string(),
                _ => "The bot is already stopped".to_string(),
            },
            Command::Status => self.status(),
            Command::SetPeriod(Some(m)) => {
                self.set_period(m);
                format!("Check period set to {} min.", m)
            }
            Command::SetPeriod(None) => {
                format!("Usage: /setfrec <minutes>, between 1 and {}", MAX_PERIOD_MINUTES)
            }
            Command::ReloadCourses => {
                let monitor = self.monitor.clone();
                match self.scheduler.try_run(async move { monitor.run_reload().await }) {
                    RunNow::Started => "Forcing course reload".to_string(),
                    RunNow::Busy => "A check is already running, try again later".to_string(),
                }
            }
            Command::Check => {
                let monitor = self.monitor.clone();
                match self.scheduler.try_run(async move { monitor.run().await }) {
                    RunNow::Started => "Forcing grade check".to_string(),
                    RunNow::Busy => "A check is already running, try again later".to_string(),
                }
            }
        }
    }

    fn status(&self) -> String {
        let mut status = format!(
            "Bot active: {}\nCheck period: {} min.",
            self.scheduler.is_running(),
            self.scheduler.period().as_secs() / 60
        );
        if self.scheduler.is_busy() {
            status.push_str("\nA check is running right now");
        }
        if let Some(last) = self.monitor.last_check() {
            status.push_str(&format!(
                "\nLast check: {} ({})",
                last.at.format("%Y-%m-%d %H:%M"),
                last.summary
            ));
        }
        status
    }

    fn set_period(&self, m: u64) {
        self.scheduler.set_period(minutes(m));

        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.check_period_minutes = m;
        if let Err(e) = config.save(&self.config_path) {
            warn!("Failed to persist check period: {:#}", e);
        }
        info!(minutes = m, "Check period changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/test"), Some(Command::Ping));
        assert_eq!(Command::parse("/addme"), Some(Command::Register));
        assert_eq!(Command::parse("/status@grade_bot"), Some(Command::Status));
        assert_eq!(Command::parse("  /loadmats  "), Some(Command::ReloadCourses));
        assert_eq!(Command::parse("/CHECK"), Some(Command::Check));
    }

    #[test]
    fn test_parse_setfrec_argument() {
        assert_eq!(Command::parse("/setfrec 15"), Some(Command::SetPeriod(Some(15))));
        assert_eq!(Command::parse("/setfrec"), Some(Command::SetPeriod(None)));
        assert_eq!(Command::parse("/setfrec soon"), Some(Command::SetPeriod(None)));
        assert_eq!(Command::parse("/setfrec 0"), Some(Command::SetPeriod(None)));
        assert_eq!(Command::parse("/setfrec 10080"), Some(Command::SetPeriod(Some(10080))));
        assert_eq!(Command::parse("/setfrec 10081"), Some(Command::SetPeriod(None)));
        assert_eq!(
            Command::parse("/setfrec 18446744073709551615"),
            Some(Command::SetPeriod(None))
        );
    }

    #[test]
    fn test_non_commands_are_ignored() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse(""), None);
    }
}
