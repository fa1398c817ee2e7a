//! Contract between the watchdog and the ripping engines.
//!
//! A handler is created per inserted disc and reports back over an outcome
//! channel handed to it at construction. `Finished` is always the last
//! message a handler sends.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::device::DiscKind;
use super::progress::ProgressSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success { artifact: PathBuf },
    Failure { reason: String },
    Finished,
}

/// An outcome tagged with the handler that produced it.
#[derive(Debug, Clone)]
pub struct OutcomeMessage {
    pub handler_id: Uuid,
    pub device: String,
    pub kind: DiscKind,
    pub outcome: HandlerOutcome,
}

/// Outcome channel endpoint bound to one handler.
#[derive(Debug, Clone)]
pub struct OutcomeSender {
    handler_id: Uuid,
    device: String,
    kind: DiscKind,
    tx: mpsc::UnboundedSender<OutcomeMessage>,
}

impl OutcomeSender {
    pub fn new(
        handler_id: Uuid,
        device: &str,
        kind: DiscKind,
        tx: mpsc::UnboundedSender<OutcomeMessage>,
    ) -> Self {
        Self {
            handler_id,
            device: device.to_string(),
            kind,
            tx,
        }
    }

    pub fn handler_id(&self) -> Uuid {
        self.handler_id
    }

    pub fn success(&self, artifact: PathBuf) {
        self.send(HandlerOutcome::Success { artifact });
    }

    pub fn failure(&self, reason: impl Into<String>) {
        self.send(HandlerOutcome::Failure {
            reason: reason.into(),
        });
    }

    pub fn finished(&self) {
        self.send(HandlerOutcome::Finished);
    }

    fn send(&self, outcome: HandlerOutcome) {
        let msg = OutcomeMessage {
            handler_id: self.handler_id,
            device: self.device.clone(),
            kind: self.kind,
            outcome,
        };

        if self.tx.send(msg).is_err() {
            debug!(device = %self.device, "Supervisor gone, dropping handler outcome");
        }
    }
}

/// Everything a ripper needs to process one disc.
#[derive(Clone)]
pub struct RipRequest {
    pub device: String,
    pub kind: DiscKind,
    /// Top-level output directory for this kind of disc.
    pub outdir: PathBuf,
    /// Opaque rip options from the settings.
    pub options: Map<String, Value>,
    pub progress: ProgressSink,
}

/// A running (or startable) rip for one device.
#[async_trait]
pub trait DiscHandler: Send + Sync {
    /// Spawn the worker. Must not block.
    fn start(&self) -> Result<()>;

    /// Ask the worker to stop. It still reports `Finished` afterwards.
    fn cancel(&self);

    /// Wait until the worker has fully stopped.
    async fn wait(&self);
}

/// Constructs handlers for one kind of disc.
pub trait RipperFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, request: RipRequest, outcomes: OutcomeSender)
    -> Result<Arc<dyn DiscHandler>>;
}

/// Which kinds of disc can currently be ripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub video: bool,
    pub audio: bool,
}

/// Capability table: the ripper factory per disc kind, resolved once at startup.
#[derive(Clone, Default)]
pub struct Rippers {
    video: Option<Arc<dyn RipperFactory>>,
    audio: Option<Arc<dyn RipperFactory>>,
}

impl Rippers {
    pub fn new(
        video: Option<Arc<dyn RipperFactory>>,
        audio: Option<Arc<dyn RipperFactory>>,
    ) -> Self {
        Self { video, audio }
    }

    pub fn get(&self, kind: DiscKind) -> Option<&Arc<dyn RipperFactory>> {
        match kind {
            DiscKind::Video => self.video.as_ref(),
            DiscKind::Audio => self.audio.as_ref(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            video: self.video.is_some(),
            audio: self.audio.is_some(),
        }
    }
}

pub type RipFuture = Pin<Box<dyn Future<Output = Result<PathBuf>> + Send>>;

/// Runs a rip future on its own tokio task and turns its result into
/// outcome messages.
pub struct TaskHandler {
    job: Mutex<Option<RipFuture>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    outcomes: OutcomeSender,
}

impl TaskHandler {
    /// `cancel` must be the token the rip future watches.
    pub fn new(job: RipFuture, cancel: CancellationToken, outcomes: OutcomeSender) -> Self {
        Self {
            job: Mutex::new(Some(job)),
            task: Mutex::new(None),
            cancel,
            outcomes,
        }
    }
}

#[async_trait]
impl DiscHandler for TaskHandler {
    fn start(&self) -> Result<()> {
        let job = self
            .job
            .lock()
            .map_err(|_| anyhow!("handler state poisoned"))?
            .take();
        let Some(job) = job else {
            bail!("handler already started");
        };

        // Hold the slot while spawning so `wait()` cannot miss the handle.
        let mut task = self
            .task
            .lock()
            .map_err(|_| anyhow!("handler state poisoned"))?;

        // The job runs on its own task so a panic still ends in `Finished`.
        let outcomes = self.outcomes.clone();
        *task = Some(tokio::spawn(async move {
            match tokio::spawn(job).await {
                Ok(Ok(artifact)) => outcomes.success(artifact),
                Ok(Err(e)) => outcomes.failure(format!("{e:#}")),
                Err(e) if e.is_panic() => {
                    error!(handler_id = %outcomes.handler_id(), "Ripper panicked");
                    outcomes.failure("ripper panicked");
                }
                Err(e) => outcomes.failure(format!("ripper task aborted: {e}")),
            }
            outcomes.finished();
        }));
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn wait(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(
                    handler_id = %self.outcomes.handler_id(),
                    error = %e,
                    "Handler task ended abnormally"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel() -> (OutcomeSender, mpsc::UnboundedReceiver<OutcomeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            OutcomeSender::new(Uuid::now_v7(), "/dev/sr0", DiscKind::Video, tx),
            rx,
        )
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<OutcomeMessage>) -> Vec<HandlerOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            let done = msg.outcome == HandlerOutcome::Finished;
            outcomes.push(msg.outcome);
            if done {
                break;
            }
        }
        outcomes
    }

    #[tokio::test]
    async fn success_is_followed_by_finished() {
        let (outcomes, mut rx) = channel();
        let handler = TaskHandler::new(
            Box::pin(async { Ok(PathBuf::from("/out/disc")) }),
            CancellationToken::new(),
            outcomes,
        );

        handler.start().unwrap();
        handler.wait().await;

        assert_eq!(
            drain(&mut rx).await,
            vec![
                HandlerOutcome::Success {
                    artifact: PathBuf::from("/out/disc")
                },
                HandlerOutcome::Finished
            ]
        );
    }

    #[tokio::test]
    async fn failure_is_followed_by_finished() {
        let (outcomes, mut rx) = channel();
        let handler = TaskHandler::new(
            Box::pin(async { Err(anyhow!("disc unreadable")) }),
            CancellationToken::new(),
            outcomes,
        );

        handler.start().unwrap();

        assert_eq!(
            drain(&mut rx).await,
            vec![
                HandlerOutcome::Failure {
                    reason: "disc unreadable".to_string()
                },
                HandlerOutcome::Finished
            ]
        );
    }

    #[tokio::test]
    async fn cancel_stops_the_job() {
        let (outcomes, mut rx) = channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handler = TaskHandler::new(
            Box::pin(async move {
                token.cancelled().await;
                Err(anyhow!("cancelled"))
            }),
            cancel,
            outcomes,
        );

        handler.start().unwrap();
        handler.cancel();
        handler.wait().await;

        let outcomes = drain(&mut rx).await;
        assert_eq!(outcomes.last(), Some(&HandlerOutcome::Finished));
    }

    async fn explode() -> Result<PathBuf> {
        panic!("drive fell over")
    }

    #[tokio::test]
    async fn panicking_job_still_finishes() {
        let (outcomes, mut rx) = channel();
        let handler = TaskHandler::new(
            Box::pin(explode()),
            CancellationToken::new(),
            outcomes,
        );

        handler.start().unwrap();
        handler.wait().await;

        assert_eq!(
            drain(&mut rx).await,
            vec![
                HandlerOutcome::Failure {
                    reason: "ripper panicked".to_string()
                },
                HandlerOutcome::Finished
            ]
        );
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let (outcomes, _rx) = channel();
        let handler = TaskHandler::new(
            Box::pin(async { Ok(PathBuf::new()) }),
            CancellationToken::new(),
            outcomes,
        );

        handler.start().unwrap();
        assert!(handler.start().is_err());
    }

    #[test]
    fn capabilities_reflect_configured_rippers() {
        let rippers = Rippers::default();
        assert_eq!(
            rippers.capabilities(),
            Capabilities {
                video: false,
                audio: false
            }
        );
        assert!(rippers.get(DiscKind::Video).is_none());
    }
}
