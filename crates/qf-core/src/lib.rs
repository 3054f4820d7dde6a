//! qf-core: shared types for the quote-forward bot
//!
//! Configuration, error types, phone/JID identity, the message model
//! exchanged with the WhatsApp session layer, and the multi-file
//! credential store.

pub mod auth;
pub mod config;
pub mod error;
pub mod jid;
pub mod message;

pub use auth::{AuthState, Contact, Credentials, MultiFileAuthStore};
pub use config::{Config, PairingMode, TimingConfig, WhatsAppConfig};
pub use error::{Error, Result};
pub use jid::{Jid, OperatorIdentity, PhoneNumber};
pub use message::{
    ContextInfo, ExtendedTextMessage, ImageMessage, InboundMessage, MessageContent, MessageKey,
    OutboundContent, VideoMessage,
};
