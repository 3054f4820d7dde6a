//! Message model exchanged with the session layer
//!
//! Field names follow the WhatsApp Web JSON encoding (`remoteJid`,
//! `extendedTextMessage`, `contextInfo`, ...). Only the parts the bot reads
//! are typed; everything else is kept in `other` so a quoted message can be
//! handed back to the session layer for download without losing fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jid::Jid;

/// Identifies one message within a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat the message belongs to
    pub remote_jid: Jid,
    /// Whether the message was sent by this account
    #[serde(default)]
    pub from_me: bool,
    /// Message id (stanza id)
    pub id: String,
    /// Sender within a group chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

impl MessageKey {
    /// Same chat and sender, different message id
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }
}

/// One message delivered in a `messages.upsert` batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<u64>,
}

impl InboundMessage {
    /// The reply context and the quoted payload, if this message quotes an image
    pub fn quoted_image(&self) -> Option<(&ContextInfo, &MessageContent)> {
        let context = self.message.as_ref()?.context_info()?;
        let quoted = context.quoted_message.as_deref()?;
        quoted.image_message.as_ref()?;
        Some((context, quoted))
    }

    /// Key under which the quoted message's media is fetched
    ///
    /// Uses this message's chat and sender with the quoted id substituted in;
    /// falls back to this message's own key when the context carries no id.
    pub fn quoted_download_key(&self, context: &ContextInfo) -> MessageKey {
        match context.stanza_id.as_deref() {
            Some(id) if !id.is_empty() => self.key.with_id(id),
            _ => self.key.clone(),
        }
    }
}

/// Message payload. At most one of the typed parts is usually set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<ImageMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<VideoMessage>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl MessageContent {
    /// Reply context carried by this payload
    ///
    /// Only text replies count; a context on an image or video part is not
    /// read here.
    pub fn context_info(&self) -> Option<&ContextInfo> {
        self.extended_text_message.as_ref()?.context_info.as_ref()
    }

    /// Plain text body, whichever part carries it
    pub fn text(&self) -> Option<&str> {
        self.conversation
            .as_deref()
            .or_else(|| self.extended_text_message.as_ref()?.text.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

/// Reply metadata: which message is being quoted, and its payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    /// Id of the quoted message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stanza_id: Option<String>,
    /// Author of the quoted message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<Box<MessageContent>>,
}

/// Image attachment descriptor (encrypted media reference, not the bytes)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_path: Option<String>,
    /// Base64 media key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
    /// Base64 SHA-256 of the encrypted file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_enc_sha256: Option<String>,
    /// Base64 SHA-256 of the plain file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_path: Option<String>,
    /// Base64 media key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
    /// Base64 SHA-256 of the encrypted file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_enc_sha256: Option<String>,
    /// Base64 SHA-256 of the plain file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Payload of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text {
        text: String,
    },
    Image {
        data: Vec<u8>,
        caption: Option<String>,
    },
    Video {
        data: Vec<u8>,
        caption: Option<String>,
    },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data: Vec<u8>) -> Self {
        Self::Image {
            data,
            caption: None,
        }
    }

    pub fn video(data: Vec<u8>) -> Self {
        Self::Video {
            data,
            caption: None,
        }
    }

    /// Attach a caption. Text payloads are returned unchanged.
    pub fn with_caption(self, caption: impl Into<String>) -> Self {
        match self {
            Self::Image { data, .. } => Self::Image {
                data,
                caption: Some(caption.into()),
            },
            Self::Video { data, .. } => Self::Video {
                data,
                caption: Some(caption.into()),
            },
            text @ Self::Text { .. } => text,
        }
    }

    /// Short name of the payload kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
        }
    }
}

impl From<&str> for OutboundContent {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for OutboundContent {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}
