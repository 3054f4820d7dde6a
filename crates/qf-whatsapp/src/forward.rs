//! Quoted-image self-forward
//!
//! When this account replies to a message that quotes an image, the quoted
//! image is downloaded again and sent to the operator's own chat after a
//! short delay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use qf_core::{InboundMessage, OperatorIdentity, OutboundContent};

use crate::session::{DownloadOptions, MediaDownload, WaSession};

/// Where and when forwarded images go
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub operator: OperatorIdentity,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoPayload,
    NotFromMe,
    NoQuotedImage,
}

/// What happened to one inbound message
#[derive(Debug)]
pub enum ForwardOutcome {
    Skipped(SkipReason),
    DownloadFailed,
    /// Downloaded, but the session has no authenticated account yet
    NotAuthenticated,
    /// The delayed send task
    Scheduled(JoinHandle<()>),
}

impl ForwardOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

pub struct SelfForwardHandler {
    session: Arc<dyn WaSession>,
    context: ForwardContext,
}

impl SelfForwardHandler {
    pub fn new(session: Arc<dyn WaSession>, context: ForwardContext) -> Self {
        Self { session, context }
    }

    /// Consume message batches until the sender side is dropped
    pub fn spawn(self: Arc<Self>, mut batches: mpsc::Receiver<Vec<InboundMessage>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let outcomes = self.handle_batch(&batch).await;
                let scheduled = outcomes.iter().filter(|o| o.is_scheduled()).count();
                if scheduled > 0 {
                    debug!("Scheduled {} forward(s) from a batch of {}", scheduled, batch.len());
                }
            }
        })
    }

    /// Process a batch in delivery order. Never fails; errors are logged per message.
    pub async fn handle_batch(&self, messages: &[InboundMessage]) -> Vec<ForwardOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for msg in messages {
            outcomes.push(self.handle_message(msg).await);
        }
        outcomes
    }

    pub async fn handle_message(&self, msg: &InboundMessage) -> ForwardOutcome {
        if msg.message.is_none() {
            return ForwardOutcome::Skipped(SkipReason::NoPayload);
        }
        if !msg.key.from_me {
            return ForwardOutcome::Skipped(SkipReason::NotFromMe);
        }
        let Some((context, quoted)) = msg.quoted_image() else {
            return ForwardOutcome::Skipped(SkipReason::NoQuotedImage);
        };

        let request = MediaDownload {
            key: msg.quoted_download_key(context),
            message: quoted.clone(),
            options: DownloadOptions::with_reupload(),
        };
        let quoted_id = request.key.id.clone();

        let data = match self.session.download_media(request).await {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to download quoted image {}: {}", quoted_id, e);
                return ForwardOutcome::DownloadFailed;
            }
        };

        if self.session.user().await.is_none() {
            debug!("Session not authenticated yet, dropping quoted image {}", quoted_id);
            return ForwardOutcome::NotAuthenticated;
        }

        ForwardOutcome::Scheduled(self.schedule(quoted_id, data))
    }

    fn schedule(&self, quoted_id: String, data: Vec<u8>) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        let to = self.context.operator.jid().clone();
        let delay = self.context.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let size = data.len();
            match session.send_message(&to, OutboundContent::image(data)).await {
                Ok(id) => info!("Forwarded quoted image {} ({} bytes) to {} as {}", quoted_id, size, to, id),
                Err(e) => error!("Failed to forward quoted image {} to {}: {}", quoted_id, to, e),
            }
        })
    }
}
