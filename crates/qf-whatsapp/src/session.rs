//! Session-layer seam
//!
//! [`SessionConnector`] opens sessions; [`WaSession`] is one open session.
//! Events arrive on an mpsc channel in delivery order.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use qf_core::{Credentials, InboundMessage, Jid, MessageContent, MessageKey, OutboundContent, PhoneNumber};

use crate::error::Result;

/// WhatsApp Web protocol version, `[major, minor, patch]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl Default for ProtocolVersion {
    /// Version used when the latest one cannot be looked up
    fn default() -> Self {
        Self([2, 3000, 1015901307])
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{}.{}.{}", major, minor, patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Why a connection was closed, from the close status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The device was unlinked; credentials are no longer valid
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    UnavailableService,
    RestartRequired,
    Other(u16),
}

impl DisconnectReason {
    pub fn from_status(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Forbidden,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::UnavailableService,
            515 => Self::RestartRequired,
            other => Self::Other(other),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::LoggedOut => 401,
            Self::Forbidden => 403,
            Self::ConnectionLost => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::UnavailableService => 503,
            Self::RestartRequired => 515,
            Self::Other(code) => *code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LastDisconnect {
    pub fn reason(&self) -> Option<DisconnectReason> {
        self.status_code.map(DisconnectReason::from_status)
    }
}

/// `connection.update` payload; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
    /// QR payload to display for linking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_login: Option<bool>,
}

impl ConnectionUpdate {
    pub fn state(state: ConnectionState) -> Self {
        Self {
            connection: Some(state),
            ..Default::default()
        }
    }

    /// A close update with the given status code (`None` when unknown)
    pub fn closed(status_code: Option<u16>) -> Self {
        Self {
            connection: Some(ConnectionState::Close),
            last_disconnect: Some(LastDisconnect {
                status_code,
                message: None,
            }),
            ..Default::default()
        }
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.last_disconnect.as_ref().and_then(LastDisconnect::reason)
    }
}

/// Events emitted by an open session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),

    #[serde(rename = "messages.upsert")]
    MessagesUpsert { messages: Vec<InboundMessage> },

    #[serde(rename = "creds.update")]
    CredsUpdate { creds: Credentials },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Ask the sender's device to re-upload media that is no longer on the CDN
    pub reupload: bool,
}

impl DownloadOptions {
    pub fn with_reupload() -> Self {
        Self { reupload: true }
    }
}

/// A media download: the message holding the attachment and its key
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDownload {
    pub key: MessageKey,
    pub message: MessageContent,
    pub options: DownloadOptions,
}

/// Parameters for opening a session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// WhatsApp Web version looked up before connecting
    pub version: ProtocolVersion,
}

/// An open session and its event stream
pub struct OpenSession {
    pub session: Arc<dyn WaSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// One open WhatsApp session
#[async_trait]
pub trait WaSession: Send + Sync {
    /// The authenticated account, once the device is linked
    async fn user(&self) -> Option<Jid>;

    /// Request a pairing code that links this device to `phone`
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String>;

    /// Send a message; returns the new message id
    async fn send_message(&self, to: &Jid, content: OutboundContent) -> Result<String>;

    /// Fetch and decrypt the media attached to a message
    async fn download_media(&self, request: MediaDownload) -> Result<Vec<u8>>;

    /// Send `content` to the chat `msg` arrived in
    async fn reply(&self, msg: &InboundMessage, content: OutboundContent) -> Result<String> {
        self.send_message(&msg.key.remote_jid, content).await
    }

    /// Stop the session; events stop arriving afterwards
    async fn close(&self) {}
}

/// Opens sessions against the session layer
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Latest protocol version known to the session layer
    async fn latest_version(&self) -> Result<ProtocolVersion>;

    async fn connect(&self, options: ConnectOptions) -> Result<OpenSession>;
}
