//! One check cycle: open the portal, extract a fresh snapshot, diff it against
//! the stored one, store and notify on change.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::diff::changed_courses;
use crate::error::Result;
use crate::notify::{DispatchReport, Dispatcher};
use crate::portal::{extract_snapshot, BrowserLauncher, ExtractOptions, SessionManager};
use crate::scheduler::Job;
use crate::storage::{RecipientStore, SnapshotStore};
use crate::types::{Course, Snapshot};

#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub changed: Vec<Course>,
    pub report: DispatchReport,
}

/// Result of the most recent scheduled or forced check, for `/status`.
#[derive(Debug, Clone)]
pub struct LastCheck {
    pub at: DateTime<Local>,
    pub summary: String,
}

pub struct GradeMonitor {
    launcher: Arc<dyn BrowserLauncher>,
    session: AsyncMutex<SessionManager>,
    snapshots: AsyncMutex<SnapshotStore>,
    recipients: Arc<RecipientStore>,
    dispatcher: Dispatcher,
    portal_url: String,
    extract: ExtractOptions,
    last_check: Mutex<Option<LastCheck>>,
}

impl GradeMonitor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        session: SessionManager,
        snapshots: SnapshotStore,
        recipients: Arc<RecipientStore>,
        dispatcher: Dispatcher,
        portal_url: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            session: AsyncMutex::new(session),
            snapshots: AsyncMutex::new(snapshots),
            recipients,
            dispatcher,
            portal_url: portal_url.into(),
            extract: ExtractOptions::default(),
            last_check: Mutex::new(None),
        }
    }

    pub fn with_extract_options(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.snapshots.lock().await.current().clone()
    }

    pub fn last_check(&self) -> Option<LastCheck> {
        self.last_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens a browser, logs in if needed and extracts everything. The browser
    /// is closed whatever happens.
    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let mut driver = self.launcher.launch().await?;

        let result: Result<Snapshot> = async {
            self.session
                .lock()
                .await
                .acquire(driver.as_mut(), &self.portal_url)
                .await?;
            extract_snapshot(driver.as_mut(), &self.extract).await
        }
        .await;

        driver.close().await;
        result
    }

    /// Runs one cycle. The store is only written when some course changed;
    /// on error nothing is stored and nobody is notified.
    pub async fn check(&self) -> Result<CheckOutcome> {
        info!("--- Checking for new grades...");
        let fresh = self.fetch_snapshot().await?;

        let mut store = self.snapshots.lock().await;
        let changed = changed_courses(store.current(), &fresh);

        if changed.is_empty() {
            if fresh.len() != store.current().len() {
                warn!(
                    stored = store.current().len(),
                    listed = fresh.len(),
                    "Course list changed, /loadmats refreshes it"
                );
            }
            info!("--- [0] courses with new grades");
            return Ok(CheckOutcome::default());
        }

        store.replace(fresh)?;
        drop(store);

        info!("--- [{}] courses with new grades:", changed.len());
        for course in &changed {
            info!("    {} --> {:?}", course.name, course.grades);
        }

        let report = self
            .dispatcher
            .notify(&changed, &self.recipients.list())
            .await;
        Ok(CheckOutcome { changed, report })
    }

    /// Replaces the stored snapshot with a fresh one without notifying.
    pub async fn reload_courses(&self) -> Result<Snapshot> {
        info!("Loading enrolled courses from the portal...");
        let fresh = self.fetch_snapshot().await?;
        self.snapshots.lock().await.replace(fresh.clone())?;
        info!(courses = fresh.len(), "Course list reloaded");
        Ok(fresh)
    }

    /// Startup: use the stored snapshot, or build the first one from the portal.
    pub async fn ensure_snapshot(&self) -> Result<()> {
        let stored = {
            let store = self.snapshots.lock().await;
            store.is_persisted().then(|| store.current().clone())
        };

        match stored {
            Some(snapshot) => {
                info!("Enrolled courses (from file):");
                for course in &snapshot {
                    info!("    {} --> {}", course.id, course.name);
                }
                Ok(())
            }
            None => self.reload_courses().await.map(|_| ()),
        }
    }

    fn record(&self, summary: String) {
        *self.last_check.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastCheck {
            at: Local::now(),
            summary,
        });
    }

    /// Forced reload, with the outcome logged and recorded like a check.
    pub async fn run_reload(&self) {
        match self.reload_courses().await {
            Ok(snapshot) => self.record(format!("reloaded {} courses", snapshot.len())),
            Err(e) => {
                error!("Course reload aborted: {}", e);
                self.record(format!("reload failed: {}", e));
            }
        }
    }
}

#[async_trait]
impl Job for GradeMonitor {
    async fn run(&self) {
        match self.check().await {
            Ok(outcome) => self.record(format!("{} courses changed", outcome.changed.len())),
            Err(e) if e.is_portal_failure() => {
                warn!("--- Portal is down, check aborted: {}", e);
                self.record(format!("portal unavailable: {}", e));
            }
            Err(e) => {
                error!("Check aborted: {}", e);
                self.record(format!("failed: {}", e));
            }
        }
    }
}
