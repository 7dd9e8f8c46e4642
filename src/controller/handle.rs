use crate::controller::session::Controller;
use crate::core::error::ControllerError;
use crate::engine::TransferEngine;
use crate::models::command::{Request, Response};
use crate::models::transfer::Fingerprint;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const INBOX_CAPACITY: usize = 64;

/// Work sent to the controller task
pub enum Message {
    Command {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    SeedPersisted {
        data_dir: PathBuf,
        metadata: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Fingerprint>, ControllerError>>,
    },
}

/// Cloneable sender side of the controller task
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Message>,
    ready: watch::Receiver<bool>,
}

impl ControllerHandle {
    pub async fn dispatch(&self, request: Request) -> Result<Response, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Command { request, reply })
            .await
            .map_err(|_| ControllerError::Unavailable)?;
        rx.await.map_err(|_| ControllerError::Unavailable)
    }

    pub async fn seed_persisted(
        &self,
        data_dir: PathBuf,
        metadata: Vec<u8>,
    ) -> Result<Option<Fingerprint>, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::SeedPersisted {
                data_dir,
                metadata,
                reply,
            })
            .await
            .map_err(|_| ControllerError::Unavailable)?;
        rx.await.map_err(|_| ControllerError::Unavailable)?
    }

    /// Whether the controller has started and not yet stopped
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow() && !self.tx.is_closed()
    }
}

/// Start the controller task.
///
/// Engine events are subscribed before the task starts so none are missed.
pub fn spawn<E: TransferEngine>(controller: Controller<E>) -> (ControllerHandle, JoinHandle<()>) {
    let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
    let (ready_tx, ready) = watch::channel(false);
    let events = controller.engine.subscribe();

    let task = tokio::spawn(controller.run(inbox, events, ready_tx));

    (ControllerHandle { tx, ready }, task)
}
