use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use super::{Broker, Reply, SenderInfo};
use crate::error::CoreError;
use crate::protocol::{BrokerResponse, Envelope};
use crate::scheduler::ExpiryReceiver;
use crate::storage_trait::StorageBackend;

#[derive(Debug)]
pub enum BrokerCommand {
    Dispatch {
        envelope: Envelope,
        sender: SenderInfo,
        reply: oneshot::Sender<Reply>,
    },
}

/// Cloneable address of the broker task.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    commands: mpsc::UnboundedSender<BrokerCommand>,
}

impl BrokerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BrokerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }

    /// Hand an envelope to the broker and get its immediate reply.
    pub async fn dispatch(&self, envelope: Envelope, sender: SenderInfo) -> Result<Reply, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BrokerCommand::Dispatch { envelope, sender, reply })
            .map_err(|_| CoreError::BrokerClosed("broker task has stopped".to_string()))?;
        rx.await
            .map_err(|_| CoreError::BrokerClosed("broker dropped the message".to_string()))
    }

    /// Like [`dispatch`](Self::dispatch), but waits out deferred replies.
    pub async fn request(&self, envelope: Envelope, sender: SenderInfo) -> Result<Option<BrokerResponse>, CoreError> {
        self.dispatch(envelope, sender).await?.settle().await
    }

    /// A channel that presents every message as coming from `sender`.
    pub fn as_sender(&self, sender: SenderInfo) -> SenderChannel {
        SenderChannel { handle: self.clone(), sender }
    }
}

/// [`BrokerHandle`] bound to one sender, e.g. the page a relay serves.
#[derive(Debug, Clone)]
pub struct SenderChannel {
    handle: BrokerHandle,
    sender: SenderInfo,
}

/// Drive the broker until every handle is dropped. Commands and timer
/// expiries are processed one at a time, each to completion.
pub async fn run<S: StorageBackend>(
    mut broker: Broker<S>,
    mut commands: mpsc::UnboundedReceiver<BrokerCommand>,
    mut expired: ExpiryReceiver,
) {
    info!("Request broker started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(BrokerCommand::Dispatch { envelope, sender, reply }) => {
                    let outcome = broker.handle(envelope, &sender).await;
                    if reply.send(outcome).is_err() {
                        debug!("Dispatcher went away before the broker replied");
                    }
                }
                None => break,
            },
            Some(request_id) = expired.recv() => broker.expire(&request_id).await,
        }
    }
    info!("Request broker stopped");
}

/// How relays and the approval surface reach the broker.
/// `Ok(None)` means the broker accepted the message but will not answer it.
#[async_trait(?Send)]
pub trait BrokerChannel {
    async fn send(&self, envelope: Envelope) -> Result<Option<BrokerResponse>, CoreError>;
}

/// Privileged callers such as the approval surface.
#[async_trait(?Send)]
impl BrokerChannel for BrokerHandle {
    async fn send(&self, envelope: Envelope) -> Result<Option<BrokerResponse>, CoreError> {
        self.request(envelope, SenderInfo::default()).await
    }
}

#[async_trait(?Send)]
impl BrokerChannel for SenderChannel {
    async fn send(&self, envelope: Envelope) -> Result<Option<BrokerResponse>, CoreError> {
        self.handle.request(envelope, self.sender.clone()).await
    }
}
