//! Storage Module
//!
//! JSON files under the data root:
//! - `courses.json`: last known snapshot
//! - `cookies.json`: cached portal session cookies
//! - `chats.json`: notification recipients

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::types::{ChatId, SessionCookie, Snapshot};

pub const SNAPSHOT_FILE: &str = "courses.json";
pub const COOKIES_FILE: &str = "cookies.json";
pub const CHATS_FILE: &str = "chats.json";

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON in {:?}", path))
}

/// Writes through a sibling temp file so readers never see a half-written file.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

/// Owner of the last known snapshot. The only writer of `courses.json`.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    current: Snapshot,
    persisted: bool,
}

impl SnapshotStore {
    pub fn open(root: &str) -> Result<Self> {
        let path = PathBuf::from(root).join(SNAPSHOT_FILE);

        if !path.exists() {
            return Ok(Self {
                path,
                current: Snapshot::default(),
                persisted: false,
            });
        }

        let current: Snapshot = read_json(&path)?;
        Ok(Self {
            path,
            current,
            persisted: true,
        })
    }

    /// Whether a snapshot was ever written to disk.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Persists `snapshot` and only then makes it the current one.
    pub fn replace(&mut self, snapshot: Snapshot) -> Result<()> {
        write_json(&self.path, &snapshot).context("Failed to persist course snapshot")?;
        self.current = snapshot;
        self.persisted = true;
        Ok(())
    }
}

/// Cached session cookies.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(root: &str) -> Self {
        Self {
            path: PathBuf::from(root).join(COOKIES_FILE),
        }
    }

    /// Unreadable cookie files count as "no session" and force a login.
    pub fn load(&self) -> Result<Vec<SessionCookie>> {
        if !self.path.exists() {
            write_json(&self.path, &Vec::<SessionCookie>::new())?;
            return Ok(vec![]);
        }

        match read_json(&self.path) {
            Ok(cookies) => Ok(cookies),
            Err(e) => {
                tracing::warn!("Ignoring cached cookies: {:#}", e);
                Ok(vec![])
            }
        }
    }

    pub fn save(&self, cookies: &[SessionCookie]) -> Result<()> {
        write_json(&self.path, cookies).context("Failed to persist session cookies")
    }
}

/// Chats that receive notifications. Append-only.
#[derive(Debug)]
pub struct RecipientStore {
    path: PathBuf,
    chats: Mutex<Vec<ChatId>>,
}

impl RecipientStore {
    pub fn open(root: &str) -> Result<Self> {
        let path = PathBuf::from(root).join(CHATS_FILE);

        let chats: Vec<ChatId> = if path.exists() {
            read_json(&path)?
        } else {
            write_json(&path, &Vec::<ChatId>::new())?;
            vec![]
        };

        let mut unique: Vec<ChatId> = Vec::with_capacity(chats.len());
        for chat in chats {
            if !unique.contains(&chat) {
                unique.push(chat);
            }
        }

        Ok(Self {
            path,
            chats: Mutex::new(unique),
        })
    }

    /// Registers a chat. Returns `false` if it was already registered.
    pub fn add(&self, chat: ChatId) -> Result<bool> {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        if chats.contains(&chat) {
            return Ok(false);
        }

        let mut updated = chats.clone();
        updated.push(chat);
        write_json(&self.path, &updated).context("Failed to persist chat list")?;
        *chats = updated;
        Ok(true)
    }

    pub fn list(&self) -> Vec<ChatId> {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
