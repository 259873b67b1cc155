//! Ordered persistence writer
//!
//! The hub hands projections to a single writer task and moves on. Writes
//! happen one after another in submission order; failures are logged.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use tether_persist::PersistenceAdapter;

enum WriteCommand {
    Write(Value),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task
#[derive(Clone)]
pub struct PersistWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl PersistWriter {
    pub fn spawn(storage: Arc<dyn PersistenceAdapter>, key: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    WriteCommand::Write(value) => match storage.write(key, value).await {
                        Ok(()) => tracing::debug!(key, "persisted state written"),
                        Err(e) => tracing::error!(key, error = %e, "failed to persist state"),
                    },
                    WriteCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        PersistWriter { tx }
    }

    /// Queue a write; never waits for it
    pub fn write(&self, value: Value) {
        if self.tx.send(WriteCommand::Write(value)).is_err() {
            tracing::warn!("persistence writer stopped, dropping write");
        }
    }

    /// Signal `done` once every write queued so far has settled
    pub fn flush(&self, done: oneshot::Sender<()>) {
        if let Err(mpsc::error::SendError(WriteCommand::Flush(done))) =
            self.tx.send(WriteCommand::Flush(done))
        {
            let _ = done.send(());
        }
    }
}
