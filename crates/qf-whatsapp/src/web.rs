//! WhatsApp Web session over `whatsapp-rust`
//!
//! [`WebConnector`] builds a `whatsapp_rust` bot per session, backed by the
//! SQLite store in the auth directory, and relays its events into the
//! session event channel. [`WebSession`] maps the session operations onto
//! the client: pairing codes, media upload/download and message sends.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use qf_core::{
    Contact, ContextInfo, Credentials, ExtendedTextMessage, ImageMessage, InboundMessage, Jid,
    MessageContent, MessageKey, OutboundContent, PhoneNumber, VideoMessage,
};

use wacore::download::MediaType;
use wacore::types::events::Event;
use wacore_binary::jid::Jid as WaJid;
use waproto::whatsapp as wa;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust::pair_code::PairCodeOptions;
use whatsapp_rust_sqlite_storage::SqliteStore;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use crate::error::{Result, WhatsAppError};
use crate::session::{
    ConnectOptions, ConnectionState, ConnectionUpdate, DisconnectReason, MediaDownload,
    OpenSession, ProtocolVersion, SessionConnector, SessionEvent, WaSession,
};

/// Events buffered between the client callbacks and the consumer
const EVENT_BUFFER: usize = 64;

/// `client_revision` as embedded in the WhatsApp Web service worker
static CLIENT_REVISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"client_revision\\?"\s*:\s*(\d+)"#).expect("client revision regex is valid")
});

/// Opens WhatsApp Web sessions
pub struct WebConnector {
    http: reqwest::Client,
    version_url: String,
    store_path: PathBuf,
}

impl WebConnector {
    /// `store_path` is the SQLite file holding the client's keys and sessions
    pub fn new(version_url: &str, store_path: impl Into<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("qf-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(WhatsAppError::Http)?;

        Ok(Self {
            http,
            version_url: version_url.to_string(),
            store_path: store_path.into(),
        })
    }

    /// Read the current WhatsApp Web client revision
    async fn fetch_version(&self) -> Result<ProtocolVersion> {
        let response = self.http.get(&self.version_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api(format!("{}: {}", status, body)));
        }

        let script = response.text().await?;
        let version = parse_client_revision(&script)?;
        debug!("WhatsApp Web version {} from {}", version, self.version_url);
        Ok(version)
    }
}

fn parse_client_revision(script: &str) -> Result<ProtocolVersion> {
    let revision = CLIENT_REVISION_RE
        .captures(script)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .ok_or_else(|| WhatsAppError::ParseError("client_revision not found".to_string()))?;

    Ok(ProtocolVersion([2, 3000, revision]))
}

#[async_trait]
impl SessionConnector for WebConnector {
    async fn latest_version(&self) -> Result<ProtocolVersion> {
        self.fetch_version().await
    }

    async fn connect(&self, options: ConnectOptions) -> Result<OpenSession> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WhatsAppError::Session(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        let store_path = self.store_path.to_string_lossy().to_string();
        let backend = SqliteStore::new(&store_path)
            .await
            .map_err(|e| WhatsAppError::Session(format!("failed to open session store {}: {}", store_path, e)))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client_slot: Arc<OnceLock<Arc<Client>>> = Arc::new(OnceLock::new());
        let slot = Arc::clone(&client_slot);

        let mut bot = Bot::builder()
            .with_backend(Arc::new(backend))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, client| {
                let tx = tx.clone();
                let slot = Arc::clone(&slot);
                async move {
                    let _ = slot.set(Arc::clone(&client));
                    relay_event(event, &client, &tx).await;
                }
            })
            .build()
            .await
            .map_err(|e| WhatsAppError::Session(format!("failed to build client: {}", e)))?;

        let task = bot
            .run()
            .await
            .map_err(|e| WhatsAppError::Session(format!("failed to start client: {}", e)))?;

        info!("WhatsApp Web client started (web version {})", options.version);

        Ok(OpenSession {
            session: Arc::new(WebSession {
                client: client_slot,
                task: task.abort_handle(),
            }),
            events: rx,
        })
    }
}

/// Translate one client event into session events
async fn relay_event(event: Event, client: &Client, tx: &mpsc::Sender<SessionEvent>) {
    let events = match event {
        Event::PairingQrCode { code, .. } => {
            // The client only emits QR payloads while the device is unlinked
            vec![SessionEvent::ConnectionUpdate(ConnectionUpdate {
                connection: Some(ConnectionState::Connecting),
                qr: Some(code),
                ..Default::default()
            })]
        }
        Event::PairSuccess(_) => {
            info!("Device linked");
            vec![SessionEvent::CredsUpdate {
                creds: linked_creds(client.get_pn().await.as_ref()),
            }]
        }
        Event::Connected(_) => vec![
            SessionEvent::CredsUpdate {
                creds: linked_creds(client.get_pn().await.as_ref()),
            },
            SessionEvent::ConnectionUpdate(ConnectionUpdate::state(ConnectionState::Open)),
        ],
        Event::Message(msg, info) => match inbound_message(
            &msg,
            MessageSource {
                chat: &info.source.chat,
                sender: &info.source.sender,
                from_me: info.source.is_from_me,
                id: &info.id,
                push_name: &info.push_name,
            },
        ) {
            Some(message) => vec![SessionEvent::MessagesUpsert {
                messages: vec![message],
            }],
            None => {
                warn!("Dropping message {} with an unreadable chat address", info.id);
                Vec::new()
            }
        },
        Event::LoggedOut(_) => vec![SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(
            Some(DisconnectReason::LoggedOut.status()),
        ))],
        Event::Disconnected(_) => {
            vec![SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(None))]
        }
        _ => Vec::new(),
    };

    for event in events {
        if tx.send(event).await.is_err() {
            debug!("Session event receiver dropped");
            return;
        }
    }
}

fn linked_creds(pn: Option<&WaJid>) -> Credentials {
    Credentials {
        registered: true,
        me: pn.and_then(to_jid).map(|id| Contact { id, name: None }),
        ..Default::default()
    }
}

fn to_jid(jid: &WaJid) -> Option<Jid> {
    Jid::new(jid.to_string()).ok()
}

fn to_wa_jid(jid: &Jid) -> Result<WaJid> {
    jid.as_str()
        .parse::<WaJid>()
        .map_err(|e| WhatsAppError::Session(format!("invalid address {}: {:?}", jid, e)))
}

/// A running `whatsapp-rust` client
pub struct WebSession {
    /// Set on the first client event; the client emits one before any
    /// operation here is needed
    client: Arc<OnceLock<Arc<Client>>>,
    task: AbortHandle,
}

impl WebSession {
    fn client(&self) -> Result<&Arc<Client>> {
        self.client
            .get()
            .ok_or_else(|| WhatsAppError::Session("client has not connected yet".to_string()))
    }

    async fn upload_image(&self, data: Vec<u8>, caption: Option<String>) -> Result<wa::Message> {
        let mimetype = image_mimetype(&data);
        let upload = self
            .client()?
            .upload(data, MediaType::Image)
            .await
            .map_err(|e| WhatsAppError::Media(format!("image upload failed: {}", e)))?;

        let image = wa::message::ImageMessage {
            url: Some(upload.url),
            direct_path: Some(upload.direct_path),
            media_key: Some(upload.media_key),
            file_enc_sha256: Some(upload.file_enc_sha256),
            file_sha256: Some(upload.file_sha256),
            file_length: Some(upload.file_length),
            mimetype: Some(mimetype.to_string()),
            caption,
            ..Default::default()
        };
        Ok(wa::Message {
            image_message: Some(image.into()),
            ..Default::default()
        })
    }

    async fn upload_video(&self, data: Vec<u8>, caption: Option<String>) -> Result<wa::Message> {
        let upload = self
            .client()?
            .upload(data, MediaType::Video)
            .await
            .map_err(|e| WhatsAppError::Media(format!("video upload failed: {}", e)))?;

        let video = wa::message::VideoMessage {
            url: Some(upload.url),
            direct_path: Some(upload.direct_path),
            media_key: Some(upload.media_key),
            file_enc_sha256: Some(upload.file_enc_sha256),
            file_sha256: Some(upload.file_sha256),
            file_length: Some(upload.file_length),
            mimetype: Some("video/mp4".to_string()),
            caption,
            ..Default::default()
        };
        Ok(wa::Message {
            video_message: Some(video.into()),
            ..Default::default()
        })
    }
}

impl Drop for WebSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl WaSession for WebSession {
    async fn user(&self) -> Option<Jid> {
        let client = self.client.get()?;
        client.get_pn().await.as_ref().and_then(to_jid)
    }

    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String> {
        let options = PairCodeOptions {
            phone_number: phone.as_str().to_string(),
            ..Default::default()
        };

        self.client()?
            .pair_with_code(options)
            .await
            .map_err(|e| WhatsAppError::Session(format!("pairing code request failed: {}", e)))
    }

    async fn send_message(&self, to: &Jid, content: OutboundContent) -> Result<String> {
        debug!("Sending {} message to {}", content.kind(), to);

        let message = match content {
            OutboundContent::Text { text } => wa::Message {
                conversation: Some(text),
                ..Default::default()
            },
            OutboundContent::Image { data, caption } => self.upload_image(data, caption).await?,
            OutboundContent::Video { data, caption } => self.upload_video(data, caption).await?,
        };

        self.client()?
            .send_message(to_wa_jid(to)?, message)
            .await
            .map_err(|e| WhatsAppError::Session(format!("send to {} failed: {}", to, e)))
    }

    async fn download_media(&self, request: MediaDownload) -> Result<Vec<u8>> {
        let client = self.client()?;
        if request.options.reupload {
            debug!("Downloading media for {} (CDN fallback hosts enabled)", request.key.id);
        }

        let result = if let Some(image) = &request.message.image_message {
            client.download(&image_to_wire(image)?).await
        } else if let Some(video) = &request.message.video_message {
            client.download(&video_to_wire(video)?).await
        } else {
            return Err(WhatsAppError::Media(format!(
                "message {} has no downloadable media",
                request.key.id
            )));
        };

        result.map_err(|e| WhatsAppError::Media(format!("download of {} failed: {}", request.key.id, e)))
    }

    async fn close(&self) {
        self.task.abort();
    }
}

fn image_mimetype(data: &[u8]) -> &'static str {
    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if data.starts_with(PNG_SIGNATURE) {
        "image/png"
    } else if data.starts_with(b"RIFF") && data.get(8..12) == Some(b"WEBP".as_slice()) {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Delivery metadata of a received message
struct MessageSource<'a> {
    chat: &'a WaJid,
    sender: &'a WaJid,
    from_me: bool,
    id: &'a str,
    push_name: &'a str,
}

/// Inbound message in the session model; `None` if the chat address is unusable
fn inbound_message(message: &wa::Message, source: MessageSource<'_>) -> Option<InboundMessage> {
    let chat = to_jid(source.chat)?;
    let participant = (source.sender != source.chat).then(|| source.sender.to_string());

    Some(InboundMessage {
        key: MessageKey {
            remote_jid: chat,
            from_me: source.from_me,
            id: source.id.to_string(),
            participant,
        },
        message: Some(message_content(message)),
        push_name: Some(source.push_name.to_string()).filter(|name| !name.is_empty()),
        message_timestamp: None,
    })
}

fn message_content(message: &wa::Message) -> MessageContent {
    MessageContent {
        conversation: message.conversation.clone(),
        extended_text_message: message.extended_text_message.as_ref().map(|m| ExtendedTextMessage {
            text: m.text.clone(),
            context_info: m.context_info.as_ref().map(|c| context_info(c)),
        }),
        image_message: message.image_message.as_ref().map(|m| image_message(m)),
        video_message: message.video_message.as_ref().map(|m| video_message(m)),
        ..Default::default()
    }
}

fn context_info(context: &wa::ContextInfo) -> ContextInfo {
    ContextInfo {
        stanza_id: context.stanza_id.clone(),
        participant: context.participant.clone(),
        quoted_message: context
            .quoted_message
            .as_ref()
            .map(|m| Box::new(message_content(m))),
    }
}

fn image_message(image: &wa::message::ImageMessage) -> ImageMessage {
    ImageMessage {
        url: image.url.clone(),
        mimetype: image.mimetype.clone(),
        caption: image.caption.clone(),
        direct_path: image.direct_path.clone(),
        media_key: image.media_key.as_deref().map(|b| STANDARD.encode(b)),
        file_enc_sha256: image.file_enc_sha256.as_deref().map(|b| STANDARD.encode(b)),
        file_sha256: image.file_sha256.as_deref().map(|b| STANDARD.encode(b)),
        file_length: image.file_length,
        context_info: image.context_info.as_ref().map(|c| context_info(c)),
        ..Default::default()
    }
}

fn video_message(video: &wa::message::VideoMessage) -> VideoMessage {
    VideoMessage {
        url: video.url.clone(),
        mimetype: video.mimetype.clone(),
        caption: video.caption.clone(),
        direct_path: video.direct_path.clone(),
        media_key: video.media_key.as_deref().map(|b| STANDARD.encode(b)),
        file_enc_sha256: video.file_enc_sha256.as_deref().map(|b| STANDARD.encode(b)),
        file_sha256: video.file_sha256.as_deref().map(|b| STANDARD.encode(b)),
        file_length: video.file_length,
        context_info: video.context_info.as_ref().map(|c| context_info(c)),
        ..Default::default()
    }
}

fn decode_field(name: &str, value: Option<&String>) -> Result<Option<Vec<u8>>> {
    value
        .map(|v| {
            STANDARD
                .decode(v.as_bytes())
                .map_err(|e| WhatsAppError::Media(format!("invalid {}: {}", name, e)))
        })
        .transpose()
}

fn image_to_wire(image: &ImageMessage) -> Result<wa::message::ImageMessage> {
    Ok(wa::message::ImageMessage {
        url: image.url.clone(),
        mimetype: image.mimetype.clone(),
        direct_path: image.direct_path.clone(),
        media_key: decode_field("mediaKey", image.media_key.as_ref())?,
        file_enc_sha256: decode_field("fileEncSha256", image.file_enc_sha256.as_ref())?,
        file_sha256: decode_field("fileSha256", image.file_sha256.as_ref())?,
        file_length: image.file_length,
        ..Default::default()
    })
}

fn video_to_wire(video: &VideoMessage) -> Result<wa::message::VideoMessage> {
    Ok(wa::message::VideoMessage {
        url: video.url.clone(),
        mimetype: video.mimetype.clone(),
        direct_path: video.direct_path.clone(),
        media_key: decode_field("mediaKey", video.media_key.as_ref())?,
        file_enc_sha256: decode_field("fileEncSha256", video.file_enc_sha256.as_ref())?,
        file_sha256: decode_field("fileSha256", video.file_sha256.as_ref())?,
        file_length: video.file_length,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(server: &MockServer) -> WebConnector {
        WebConnector::new(&format!("{}/sw.js", server.uri()), "unused.db").unwrap()
    }

    fn quoted_image_reply() -> wa::Message {
        let quoted = wa::Message {
            image_message: Some(
                wa::message::ImageMessage {
                    url: Some("https://mmg.whatsapp.net/d/f/abc.enc".to_string()),
                    mimetype: Some("image/jpeg".to_string()),
                    direct_path: Some("/v/t62.7118-24/abc.enc".to_string()),
                    media_key: Some(vec![1, 2, 3]),
                    file_enc_sha256: Some(vec![4, 5]),
                    file_sha256: Some(vec![6]),
                    file_length: Some(2048),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        };
        let context = wa::ContextInfo {
            stanza_id: Some("IMG1".to_string()),
            participant: Some("491701234567@s.whatsapp.net".to_string()),
            quoted_message: Some(quoted.into()),
            ..Default::default()
        };

        wa::Message {
            extended_text_message: Some(
                wa::message::ExtendedTextMessage {
                    text: Some("this one".to_string()),
                    context_info: Some(context.into()),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_latest_version_from_service_worker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sw.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"self.__swData=JSON.parse(/*BTDS*/"{\"dynamic_data\":{\"SiteData\":{\"server_revision\":1023,\"client_revision\":1026131876}}}");"#,
            ))
            .mount(&server)
            .await;

        let version = connector(&server).latest_version().await.unwrap();
        assert_eq!(version, ProtocolVersion([2, 3000, 1026131876]));
    }

    #[tokio::test]
    async fn test_version_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sw.js"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        match connector(&server).latest_version().await.unwrap_err() {
            WhatsAppError::Api(msg) => assert!(msg.contains("upstream down")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_revision() {
        assert!(matches!(
            parse_client_revision("self.__swData={}"),
            Err(WhatsAppError::ParseError(_))
        ));
        assert_eq!(
            parse_client_revision(r#"{"client_revision": 7}"#).unwrap(),
            ProtocolVersion([2, 3000, 7])
        );
    }

    #[test]
    fn test_quoted_image_reply_maps_to_session_model() {
        let content = message_content(&quoted_image_reply());

        let context = content.context_info().unwrap();
        assert_eq!(context.stanza_id.as_deref(), Some("IMG1"));
        let quoted = context.quoted_message.as_deref().unwrap();
        let image = quoted.image_message.as_ref().unwrap();
        assert_eq!(image.media_key.as_deref(), Some("AQID"));
        assert_eq!(image.file_length, Some(2048));
        assert_eq!(content.text(), Some("this one"));
    }

    #[test]
    fn test_image_descriptor_survives_mapping() {
        let reply = quoted_image_reply();
        let content = message_content(&reply);
        let quoted = content.context_info().unwrap().quoted_message.as_deref().unwrap();

        let wire = image_to_wire(quoted.image_message.as_ref().unwrap()).unwrap();
        assert_eq!(wire.media_key, Some(vec![1, 2, 3]));
        assert_eq!(wire.file_enc_sha256, Some(vec![4, 5]));
        assert_eq!(wire.file_sha256, Some(vec![6]));
        assert_eq!(wire.direct_path.as_deref(), Some("/v/t62.7118-24/abc.enc"));
        assert_eq!(wire.file_length, Some(2048));
    }

    #[test]
    fn test_invalid_media_key_is_rejected() {
        let image = ImageMessage {
            media_key: Some("not base64!".to_string()),
            ..Default::default()
        };
        assert!(matches!(image_to_wire(&image), Err(WhatsAppError::Media(_))));
    }

    #[test]
    fn test_own_reply_becomes_inbound_message() {
        let chat: WaJid = "491701234567@s.whatsapp.net".parse().unwrap();
        let reply = quoted_image_reply();
        let source = MessageSource {
            chat: &chat,
            sender: &chat,
            from_me: true,
            id: "REPLY1",
            push_name: "",
        };

        let msg = inbound_message(&reply, source).unwrap();
        assert!(msg.key.from_me);
        assert_eq!(msg.key.id, "REPLY1");
        assert_eq!(msg.key.remote_jid.as_str(), "491701234567@s.whatsapp.net");
        assert!(msg.key.participant.is_none());
        assert!(msg.push_name.is_none());

        let (context, _) = msg.quoted_image().unwrap();
        assert_eq!(msg.quoted_download_key(context).id, "IMG1");
    }

    #[test]
    fn test_plain_text_has_no_context() {
        let content = message_content(&wa::Message {
            conversation: Some("hello".to_string()),
            ..Default::default()
        });
        assert_eq!(content.text(), Some("hello"));
        assert!(content.context_info().is_none());
    }

    #[test]
    fn test_image_mimetype_sniffing() {
        assert_eq!(image_mimetype(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(image_mimetype(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(image_mimetype(&[0xff, 0xd8, 0xff]), "image/jpeg");
    }

    #[test]
    fn test_linked_creds() {
        let pn: WaJid = "15551234567@s.whatsapp.net".parse().unwrap();
        let creds = linked_creds(Some(&pn));
        assert!(creds.registered);
        assert_eq!(creds.me.unwrap().id.as_str(), "15551234567@s.whatsapp.net");

        assert!(linked_creds(None).me.is_none());
    }
}
