//! Multi-file credential store
//!
//! Layout under the store directory:
//! - `creds.json`: registration state of this device and the linked account
//! - `session.db`: the WhatsApp client's own store (identity, pre-keys,
//!   sessions, app state); opaque here
//!
//! Only `registered` and `me` are read from `creds.json`; other fields are
//! kept as they were written.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::jid::Jid;
use crate::{Error, Result};

const CREDS_FILE: &str = "creds.json";

/// File name of the WhatsApp client store inside the auth directory
pub const SESSION_DB_FILE: &str = "session.db";

/// Account credentials as produced by the session layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Set once the device has been linked to an account
    #[serde(default)]
    pub registered: bool,
    /// The linked account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Contact>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Jid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Credentials loaded at startup
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub creds: Credentials,
    /// No `creds.json` existed; the session layer will initialise fresh credentials
    pub fresh: bool,
}

/// Credential files rooted at the auth directory
#[derive(Debug, Clone)]
pub struct MultiFileAuthStore {
    dir: PathBuf,
}

impl MultiFileAuthStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the WhatsApp client store
    pub fn session_db(&self) -> PathBuf {
        self.dir.join(SESSION_DB_FILE)
    }

    /// Load credentials, creating the directory if needed
    pub async fn load(&self) -> Result<AuthState> {
        self.ensure_dir().await?;

        match self.read_json(CREDS_FILE).await? {
            Some(value) => {
                let creds: Credentials = serde_json::from_value(value)?;
                debug!(
                    "Loaded credentials from {} (registered: {})",
                    self.dir.display(),
                    creds.registered
                );
                Ok(AuthState {
                    creds,
                    fresh: false,
                })
            }
            None => {
                debug!("No credentials in {}, starting fresh", self.dir.display());
                Ok(AuthState {
                    creds: Credentials::default(),
                    fresh: true,
                })
            }
        }
    }

    /// Persist credentials, replacing `creds.json`
    pub async fn save_creds(&self, creds: &Credentials) -> Result<()> {
        self.ensure_dir().await?;
        let value = serde_json::to_value(creds)?;
        self.write_json(CREDS_FILE, &value).await
    }

    async fn ensure_dir(&self) -> Result<()> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::AuthStore(format!(
                "found something that is not a directory at {}, either delete it or specify a different location",
                self.dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.dir).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json(&self, file: &str) -> Result<Option<Value>> {
        match tokio::fs::read_to_string(self.dir.join(file)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json(&self, file: &str, value: &Value) -> Result<()> {
        let content = serde_json::to_string(value)?;
        tokio::fs::write(self.dir.join(file), content).await?;
        Ok(())
    }
}
