//! Connection-state decisions
//!
//! [`ConnectionHandler::on_update`] turns each `connection.update` into the
//! actions the bot should take. The pairing-request flag is a state machine
//! so that only one pairing code is ever requested at a time.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use qf_core::{PairingMode, TimingConfig};

use crate::session::{ConnectionState, ConnectionUpdate, DisconnectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// No pairing request outstanding
    Idle,
    /// A request is scheduled or in flight
    Requested,
    /// A code was issued and is waiting to be entered on the phone
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    RequestPairingCode { after: Duration },
    ShowQr(String),
    Connected { paired: bool },
    /// Closed while a pairing code is outstanding; keep waiting for it
    AwaitPairing,
    Reconnect { after: Duration },
    /// Logged out; credentials are no longer usable
    Stop,
}

pub struct ConnectionHandler {
    mode: PairingMode,
    request_delay: Duration,
    reconnect_delay: Duration,
    pairing: Mutex<PairingState>,
}

impl ConnectionHandler {
    pub fn new(mode: PairingMode, timing: &TimingConfig) -> Self {
        Self {
            mode,
            request_delay: timing.pairing_request_delay(),
            reconnect_delay: timing.reconnect_delay(),
            pairing: Mutex::new(PairingState::Idle),
        }
    }

    pub async fn pairing_state(&self) -> PairingState {
        *self.pairing.lock().await
    }

    /// Decide what to do about a connection update
    ///
    /// `registered` is whether the stored credentials are already linked.
    pub async fn on_update(&self, update: &ConnectionUpdate, registered: bool) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(qr) = &update.qr {
            match self.mode {
                PairingMode::Qr => actions.push(ConnectionAction::ShowQr(qr.clone())),
                PairingMode::Code => debug!("Ignoring QR payload in pairing-code mode"),
            }
        }

        let Some(state) = update.connection else {
            return actions;
        };

        let mut pairing = self.pairing.lock().await;
        match state {
            ConnectionState::Connecting => {
                if self.mode == PairingMode::Code && !registered && *pairing == PairingState::Idle {
                    *pairing = PairingState::Requested;
                    actions.push(ConnectionAction::RequestPairingCode {
                        after: self.request_delay,
                    });
                }
            }
            ConnectionState::Open => {
                let paired = *pairing != PairingState::Idle;
                *pairing = PairingState::Idle;
                actions.push(ConnectionAction::Connected { paired });
            }
            ConnectionState::Close => {
                if *pairing != PairingState::Idle && !registered {
                    actions.push(ConnectionAction::AwaitPairing);
                } else if update.disconnect_reason() == Some(DisconnectReason::LoggedOut) {
                    actions.push(ConnectionAction::Stop);
                } else {
                    actions.push(ConnectionAction::Reconnect {
                        after: self.reconnect_delay,
                    });
                }
            }
        }

        actions
    }

    /// The requested code was issued
    pub async fn pairing_code_issued(&self) {
        let mut pairing = self.pairing.lock().await;
        if *pairing == PairingState::Requested {
            *pairing = PairingState::Pending;
        }
    }

    /// The request failed; a later `connecting` update may request again
    pub async fn pairing_code_failed(&self) {
        *self.pairing.lock().await = PairingState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(mode: PairingMode) -> ConnectionHandler {
        ConnectionHandler::new(mode, &TimingConfig::default())
    }

    fn connecting() -> ConnectionUpdate {
        ConnectionUpdate::state(ConnectionState::Connecting)
    }

    #[tokio::test]
    async fn test_requests_pairing_code_once() {
        let handler = handler(PairingMode::Code);

        let first = handler.on_update(&connecting(), false).await;
        assert_eq!(
            first,
            vec![ConnectionAction::RequestPairingCode {
                after: Duration::from_secs(2)
            }]
        );
        assert_eq!(handler.pairing_state().await, PairingState::Requested);

        let second = handler.on_update(&connecting(), false).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_failed_request_allows_retry() {
        let handler = handler(PairingMode::Code);

        handler.on_update(&connecting(), false).await;
        handler.pairing_code_failed().await;
        assert_eq!(handler.pairing_state().await, PairingState::Idle);

        let retry = handler.on_update(&connecting(), false).await;
        assert_eq!(retry.len(), 1);
    }

    #[tokio::test]
    async fn test_no_pairing_when_registered_or_qr_mode() {
        let code = handler(PairingMode::Code);
        assert!(code.on_update(&connecting(), true).await.is_empty());

        let qr = handler(PairingMode::Qr);
        assert!(qr.on_update(&connecting(), false).await.is_empty());
    }

    #[tokio::test]
    async fn test_qr_payload_shown_only_in_qr_mode() {
        let update = ConnectionUpdate {
            qr: Some("2@ref,noise,identity,adv".to_string()),
            ..Default::default()
        };

        let qr = handler(PairingMode::Qr);
        assert_eq!(
            qr.on_update(&update, false).await,
            vec![ConnectionAction::ShowQr("2@ref,noise,identity,adv".to_string())]
        );

        let code = handler(PairingMode::Code);
        assert!(code.on_update(&update, false).await.is_empty());
    }

    #[tokio::test]
    async fn test_open_after_pairing_resets_state() {
        let handler = handler(PairingMode::Code);
        handler.on_update(&connecting(), false).await;
        handler.pairing_code_issued().await;
        assert_eq!(handler.pairing_state().await, PairingState::Pending);

        let actions = handler
            .on_update(&ConnectionUpdate::state(ConnectionState::Open), true)
            .await;
        assert_eq!(actions, vec![ConnectionAction::Connected { paired: true }]);
        assert_eq!(handler.pairing_state().await, PairingState::Idle);

        let again = handler
            .on_update(&ConnectionUpdate::state(ConnectionState::Open), true)
            .await;
        assert_eq!(again, vec![ConnectionAction::Connected { paired: false }]);
    }

    #[tokio::test]
    async fn test_logged_out_does_not_reconnect() {
        let handler = handler(PairingMode::Code);
        let actions = handler.on_update(&ConnectionUpdate::closed(Some(401)), true).await;
        assert_eq!(actions, vec![ConnectionAction::Stop]);
    }

    #[tokio::test]
    async fn test_other_close_reasons_reconnect_once() {
        let handler = handler(PairingMode::Code);
        for status in [Some(428), Some(515), Some(408), None] {
            let actions = handler.on_update(&ConnectionUpdate::closed(status), true).await;
            assert_eq!(
                actions,
                vec![ConnectionAction::Reconnect {
                    after: Duration::from_secs(5)
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_close_while_pairing_waits() {
        let handler = handler(PairingMode::Code);
        handler.on_update(&connecting(), false).await;
        handler.pairing_code_issued().await;

        let actions = handler.on_update(&ConnectionUpdate::closed(Some(515)), false).await;
        assert_eq!(actions, vec![ConnectionAction::AwaitPairing]);

        let registered = handler.on_update(&ConnectionUpdate::closed(Some(515)), true).await;
        assert_eq!(
            registered,
            vec![ConnectionAction::Reconnect {
                after: Duration::from_secs(5)
            }]
        );
    }
}
