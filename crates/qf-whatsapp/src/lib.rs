//! qf-whatsapp: WhatsApp session handling for qf-bot
//!
//! The protocol itself is handled by `whatsapp-rust` ([`WebConnector`]);
//! the bot talks to it through the [`WaSession`] / [`SessionConnector`] seam
//! and implements pairing, reconnects, credential persistence and the
//! quoted-image self-forward on top.

pub mod bot;
pub mod connection;
pub mod error;
pub mod forward;
pub mod qr;
pub mod session;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use bot::WhatsAppBot;
pub use connection::{ConnectionAction, ConnectionHandler, PairingState};
pub use error::{Result, WhatsAppError};
pub use forward::{ForwardContext, ForwardOutcome, SelfForwardHandler, SkipReason};
pub use session::{
    ConnectOptions, ConnectionState, ConnectionUpdate, DisconnectReason, DownloadOptions,
    LastDisconnect, MediaDownload, OpenSession, ProtocolVersion, SessionConnector, SessionEvent,
    WaSession,
};
pub use web::{WebConnector, WebSession};
