//! Time-windowed accumulation of single requests into batches

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Priority, TranslationRequest};
use crate::core::orchestrator::TranslationOrchestrator;

struct Submission {
    request: TranslationRequest,
    reply: oneshot::Sender<Result<String>>,
}

/// Collects individually submitted requests and dispatches them together.
///
/// A batch is sent as soon as it reaches the current maximum batch size or
/// when the wait window since its first request elapses, whichever comes
/// first.
#[derive(Clone)]
pub struct BatchCollector {
    sender: mpsc::Sender<Submission>,
}

impl BatchCollector {
    /// Spawn the collector loop
    pub fn start(
        orchestrator: Arc<TranslationOrchestrator>,
        max_wait: Duration,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(1024);
        let handle = tokio::spawn(run(orchestrator, receiver, max_wait, cancel_token));
        (Self { sender }, handle)
    }

    /// Queue one request and wait for its translation
    pub async fn submit(&self, request: TranslationRequest) -> Result<String> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Submission { request, reply })
            .await
            .map_err(|_| TranslationError::InternalError("batch collector is not running".to_string()))?;
        response
            .await
            .map_err(|_| TranslationError::InternalError("batch collector stopped".to_string()))?
    }
}

async fn run(
    orchestrator: Arc<TranslationOrchestrator>,
    mut receiver: mpsc::Receiver<Submission>,
    max_wait: Duration,
    cancel_token: CancellationToken,
) {
    info!(max_wait_ms = max_wait.as_millis() as u64, "Batch collector started");

    loop {
        let first = tokio::select! {
            _ = cancel_token.cancelled() => break,
            submission = receiver.recv() => match submission {
                Some(submission) => submission,
                None => break,
            },
        };

        let max_batch_size = orchestrator.degradation().limits().await.max_batch_size;
        let mut batch = vec![first];
        let deadline = tokio::time::sleep(max_wait);
        tokio::pin!(deadline);

        while batch.len() < max_batch_size {
            tokio::select! {
                _ = &mut deadline => break,
                submission = receiver.recv() => match submission {
                    Some(submission) => batch.push(submission),
                    None => break,
                },
            }
        }

        debug!(size = batch.len(), max_batch_size, "Dispatching collected batch");
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let (requests, replies): (Vec<_>, Vec<_>) =
                batch.into_iter().map(|s| (s.request, s.reply)).unzip();
            let results = orchestrator
                .translate_batch_detailed(&requests, Priority::Low)
                .await;
            for (reply, result) in replies.into_iter().zip(results) {
                // receiver may have given up
                let _ = reply.send(result);
            }
        });
    }

    info!("Batch collector shutting down");
}
