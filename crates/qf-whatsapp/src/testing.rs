//! In-memory session fakes for tests

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use qf_core::{InboundMessage, Jid, OutboundContent, PhoneNumber};

use crate::error::{Result, WhatsAppError};
use crate::session::{
    ConnectOptions, MediaDownload, OpenSession, ProtocolVersion, SessionConnector, SessionEvent,
    WaSession,
};

pub(crate) const OPERATOR: &str = "15551234567";

pub(crate) fn operator_jid() -> Jid {
    Jid::new(format!("{}@s.whatsapp.net", OPERATOR)).unwrap()
}

/// A reply from `from_me` that quotes an image, optionally with the quoted id
pub(crate) fn quoted_image_reply(id: &str, from_me: bool, stanza_id: Option<&str>) -> InboundMessage {
    let mut context = json!({
        "quotedMessage": {"imageMessage": {"mimetype": "image/jpeg", "mediaKey": "a2V5"}}
    });
    if let Some(stanza_id) = stanza_id {
        context["stanzaId"] = json!(stanza_id);
    }
    serde_json::from_value(json!({
        "key": {"remoteJid": "491701234567@s.whatsapp.net", "fromMe": from_me, "id": id},
        "message": {"extendedTextMessage": {"text": "this one", "contextInfo": context}}
    }))
    .unwrap()
}

pub(crate) fn text_message(id: &str, from_me: bool) -> InboundMessage {
    serde_json::from_value(json!({
        "key": {"remoteJid": "491701234567@s.whatsapp.net", "fromMe": from_me, "id": id},
        "message": {"conversation": "hello"}
    }))
    .unwrap()
}

/// Records every call; failures are configured per message id
pub(crate) struct FakeSession {
    user: Option<Jid>,
    pairing_code: Option<String>,
    fail_downloads: HashSet<String>,
    fail_sends: bool,
    pub downloads: Mutex<Vec<MediaDownload>>,
    pub sends: Mutex<Vec<(Jid, OutboundContent)>>,
    pub pairing_requests: Mutex<Vec<PhoneNumber>>,
    closes: AtomicUsize,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            user: Some(Jid::new(format!("{}:7@s.whatsapp.net", OPERATOR)).unwrap()),
            pairing_code: Some("K7QX2MZP".to_string()),
            fail_downloads: HashSet::new(),
            fail_sends: false,
            downloads: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            pairing_requests: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn unauthenticated(mut self) -> Self {
        self.user = None;
        self
    }

    pub fn failing_pairing(mut self) -> Self {
        self.pairing_code = None;
        self
    }

    pub fn failing_download(mut self, quoted_id: &str) -> Self {
        self.fail_downloads.insert(quoted_id.to_string());
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(Jid, OutboundContent)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn pairing_request_count(&self) -> usize {
        self.pairing_requests.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Media bytes the fake returns for a key id
pub(crate) fn fake_media(id: &str) -> Vec<u8> {
    format!("image:{}", id).into_bytes()
}

#[async_trait]
impl WaSession for FakeSession {
    async fn user(&self) -> Option<Jid> {
        self.user.clone()
    }

    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String> {
        self.pairing_requests.lock().unwrap().push(phone.clone());
        self.pairing_code
            .clone()
            .ok_or_else(|| WhatsAppError::Api("428: connection closed".to_string()))
    }

    async fn send_message(&self, to: &Jid, content: OutboundContent) -> Result<String> {
        if self.fail_sends {
            return Err(WhatsAppError::Api("500: send failed".to_string()));
        }
        let mut sends = self.sends.lock().unwrap();
        sends.push((to.clone(), content));
        Ok(format!("OUT{}", sends.len()))
    }

    async fn download_media(&self, request: MediaDownload) -> Result<Vec<u8>> {
        let id = request.key.id.clone();
        self.downloads.lock().unwrap().push(request);
        if self.fail_downloads.contains(&id) {
            return Err(WhatsAppError::Media(format!("media for {} expired", id)));
        }
        Ok(fake_media(&id))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

type PreparedSession = (Arc<FakeSession>, mpsc::Receiver<SessionEvent>);

/// Hands out prepared sessions in order, one per `connect`; `None` slots fail
pub(crate) struct FakeConnector {
    sessions: Mutex<VecDeque<Option<PreparedSession>>>,
    pub connects: Mutex<Vec<ConnectOptions>>,
    fail_version: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            connects: Mutex::new(Vec::new()),
            fail_version: false,
        }
    }

    pub fn failing_version(mut self) -> Self {
        self.fail_version = true;
        self
    }

    /// Queue a session; events sent on the returned sender reach the bot
    pub fn push(&self, session: Arc<FakeSession>) -> mpsc::Sender<SessionEvent> {
        let (tx, rx) = mpsc::channel(32);
        self.sessions.lock().unwrap().push_back(Some((session, rx)));
        tx
    }

    /// Queue a `connect` call that fails
    pub fn push_failure(&self) {
        self.sessions.lock().unwrap().push_back(None);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn latest_version(&self) -> Result<ProtocolVersion> {
        if self.fail_version {
            return Err(WhatsAppError::Api("503: version lookup unavailable".to_string()));
        }
        Ok(ProtocolVersion([2, 3000, 42]))
    }

    async fn connect(&self, options: ConnectOptions) -> Result<OpenSession> {
        self.connects.lock().unwrap().push(options);
        let (session, events) = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| WhatsAppError::Session("no more fake sessions".to_string()))?
            .ok_or_else(|| WhatsAppError::Session("connection refused".to_string()))?;

        Ok(OpenSession { session, events })
    }
}
