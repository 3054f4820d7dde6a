//! WhatsApp bot: session lifecycle around the self-forward handler
//!
//! Each session goes through: load credentials, look up the protocol
//! version, connect, then drive events until the connection closes. Message
//! batches are handed to a separate forwarding task; connection updates are
//! handled here. Once a session has been opened, a failed reconnect counts
//! as a close with unknown reason and is retried after the reconnect delay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use qf_core::{Config, Credentials, InboundMessage, MultiFileAuthStore, OperatorIdentity, TimingConfig};

use crate::connection::{ConnectionAction, ConnectionHandler};
use crate::error::{Result, WhatsAppError};
use crate::forward::{ForwardContext, SelfForwardHandler};
use crate::qr;
use crate::session::{
    ConnectOptions, ConnectionUpdate, OpenSession, ProtocolVersion, SessionConnector, SessionEvent,
    WaSession,
};

/// Message batches queued for the forwarding task
const BATCH_BUFFER: usize = 64;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionExit {
    Reconnect(Duration),
    LoggedOut,
}

/// Results of timers and background requests, fed back into the session loop
#[derive(Debug)]
enum Control {
    PairingCode(std::result::Result<String, String>),
    PairingExpired,
}

/// WhatsApp bot
pub struct WhatsAppBot {
    connector: Arc<dyn SessionConnector>,
    store: MultiFileAuthStore,
    operator: OperatorIdentity,
    connection: Arc<ConnectionHandler>,
    timing: TimingConfig,
}

impl WhatsAppBot {
    pub fn new(connector: Arc<dyn SessionConnector>, operator: OperatorIdentity, config: &Config) -> Self {
        Self {
            connector,
            store: MultiFileAuthStore::new(&config.whatsapp.auth_dir),
            operator,
            connection: Arc::new(ConnectionHandler::new(config.whatsapp.pairing_mode, &config.timing)),
            timing: config.timing.clone(),
        }
    }

    /// Run sessions until logged out
    ///
    /// Returns [`WhatsAppError::PairingTimeout`] if an issued pairing code
    /// expires without the device being linked.
    pub async fn run(&self) -> Result<()> {
        let mut started = false;

        loop {
            let (opened, creds) = match self.open_session().await {
                Ok(opened) => opened,
                Err(e) if started => {
                    let after = self.timing.reconnect_delay();
                    warn!("Reconnect failed ({}), retrying in {:?}", e, after);
                    tokio::time::sleep(after).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            started = true;

            match self.run_session(opened, creds).await? {
                SessionExit::Reconnect(after) => {
                    info!("Reconnecting in {:?}", after);
                    tokio::time::sleep(after).await;
                }
                SessionExit::LoggedOut => {
                    warn!(
                        "Logged out of WhatsApp; remove {} to link again",
                        self.store.dir().display()
                    );
                    return Ok(());
                }
            }
        }
    }

    async fn open_session(&self) -> Result<(OpenSession, Credentials)> {
        let auth = self.store.load().await?;

        let version = match self.connector.latest_version().await {
            Ok(version) => version,
            Err(e) => {
                let fallback = ProtocolVersion::default();
                warn!("Protocol version lookup failed ({}), using {}", e, fallback);
                fallback
            }
        };

        let opened = self.connector.connect(ConnectOptions { version }).await?;
        Ok((opened, auth.creds))
    }

    async fn run_session(&self, opened: OpenSession, creds: Credentials) -> Result<SessionExit> {
        let OpenSession { session, events } = opened;

        let handler = Arc::new(SelfForwardHandler::new(
            Arc::clone(&session),
            ForwardContext {
                operator: self.operator.clone(),
                delay: self.timing.forward_delay(),
            },
        ));
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_BUFFER);
        let _forwarder = handler.spawn(batch_rx);

        let mut driver = SessionDriver {
            bot: self,
            session,
            creds: Arc::new(RwLock::new(creds)),
            batch_tx,
            closed: false,
        };
        let exit = driver.drive(events).await;
        driver.session.close().await;
        exit
    }
}

/// Per-session event loop state
struct SessionDriver<'a> {
    bot: &'a WhatsAppBot,
    session: Arc<dyn WaSession>,
    creds: Arc<RwLock<Credentials>>,
    batch_tx: mpsc::Sender<Vec<InboundMessage>>,
    /// The connection has closed but the session is still waiting on pairing
    closed: bool,
}

impl SessionDriver<'_> {
    async fn drive(&mut self, mut events: mpsc::Receiver<SessionEvent>) -> Result<SessionExit> {
        let (control_tx, mut control_rx) = mpsc::channel(8);
        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => {
                    let exit = match event {
                        Some(event) => self.on_event(event, &control_tx).await,
                        None => {
                            events_open = false;
                            if self.closed {
                                None
                            } else {
                                debug!("Event stream ended without a close update");
                                self.on_connection_update(ConnectionUpdate::closed(None), &control_tx).await
                            }
                        }
                    };
                    if let Some(exit) = exit {
                        return Ok(exit);
                    }
                }
                Some(control) = control_rx.recv() => {
                    if let Some(exit) = self.on_control(control, &control_tx).await? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    async fn on_event(&mut self, event: SessionEvent, control_tx: &mpsc::Sender<Control>) -> Option<SessionExit> {
        match event {
            SessionEvent::ConnectionUpdate(update) => {
                return self.on_connection_update(update, control_tx).await;
            }
            SessionEvent::MessagesUpsert { messages } => {
                if self.batch_tx.send(messages).await.is_err() {
                    error!("Forwarding task stopped, dropping message batch");
                }
            }
            SessionEvent::CredsUpdate { creds } => {
                if let Err(e) = self.bot.store.save_creds(&creds).await {
                    error!("Failed to save credentials: {}", e);
                }
                *self.creds.write().await = creds;
            }
        }
        None
    }

    async fn on_connection_update(
        &mut self,
        update: ConnectionUpdate,
        control_tx: &mpsc::Sender<Control>,
    ) -> Option<SessionExit> {
        let registered = self.creds.read().await.registered;
        let actions = self.bot.connection.on_update(&update, registered).await;

        for action in actions {
            match action {
                ConnectionAction::RequestPairingCode { after } => {
                    println!("🔄 Preparing connection...");
                    self.spawn_pairing_request(after, control_tx.clone());
                }
                ConnectionAction::ShowQr(payload) => match qr::render(&payload) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(e) => {
                        warn!("Could not render QR code: {}", e);
                        println!("QR payload: {}", payload);
                    }
                },
                ConnectionAction::Connected { paired } => {
                    info!("Connected to WhatsApp");
                    println!("✅ Connected to WhatsApp");
                    if paired {
                        println!("🎉 Pairing successful, the bot is linked");
                    }
                }
                ConnectionAction::AwaitPairing => {
                    self.closed = true;
                    println!("⏳ Waiting for you to enter the pairing code...");
                }
                ConnectionAction::Reconnect { after } => {
                    info!("Disconnected ({:?}). Reconnecting? true", update.disconnect_reason());
                    return Some(SessionExit::Reconnect(after));
                }
                ConnectionAction::Stop => {
                    info!("Disconnected ({:?}). Reconnecting? false", update.disconnect_reason());
                    return Some(SessionExit::LoggedOut);
                }
            }
        }
        None
    }

    fn spawn_pairing_request(&self, after: Duration, control_tx: mpsc::Sender<Control>) {
        let session = Arc::clone(&self.session);
        let phone = self.bot.operator.phone().clone();

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            println!("📱 Requesting pairing code...");
            let result = session
                .request_pairing_code(&phone)
                .await
                .map_err(|e| e.to_string());
            let _ = control_tx.send(Control::PairingCode(result)).await;
        });
    }

    async fn on_control(
        &mut self,
        control: Control,
        control_tx: &mpsc::Sender<Control>,
    ) -> Result<Option<SessionExit>> {
        match control {
            Control::PairingCode(Ok(code)) => {
                self.bot.connection.pairing_code_issued().await;
                print_pairing_instructions(&code, self.bot.timing.pairing_timeout());

                let timeout = self.bot.timing.pairing_timeout();
                let control_tx = control_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = control_tx.send(Control::PairingExpired).await;
                });
                Ok(None)
            }
            Control::PairingCode(Err(e)) => {
                error!("Failed to request pairing code: {}", e);
                self.bot.connection.pairing_code_failed().await;
                if self.closed {
                    return Ok(Some(SessionExit::Reconnect(self.bot.timing.reconnect_delay())));
                }
                Ok(None)
            }
            Control::PairingExpired => {
                if !self.creds.read().await.registered {
                    println!("⏰ Time is up, the pairing code has expired.");
                    println!("🔄 Restart the bot to get a new code.");
                    return Err(WhatsAppError::PairingTimeout);
                }
                if self.closed {
                    return Ok(Some(SessionExit::Reconnect(self.bot.timing.reconnect_delay())));
                }
                Ok(None)
            }
        }
    }
}

fn print_pairing_instructions(code: &str, timeout: Duration) {
    println!("🔑 Your pairing code is: {}", code);
    println!("💡 On your phone open WhatsApp > Linked devices > Link a device > Link with phone number instead");
    println!("📝 Enter this code: {}", code);
    println!("⏰ You have {} seconds to enter the code...", timeout.as_secs());
}
