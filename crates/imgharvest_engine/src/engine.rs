use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use engine_logging::{engine_error, engine_info};
use imgharvest_core::{RunReport, ScrapeRequest};
use tokio_util::sync::CancellationToken;

use crate::fetch::ChannelProgressSink;
use crate::orchestrator::{EngineConfig, Orchestrator};
use crate::EngineEvent;

enum EngineCommand {
    Run {
        request: ScrapeRequest,
        cancel: CancellationToken,
    },
}

/// Runs requests on a background thread that owns a tokio runtime.
/// Requests are processed one at a time; events arrive on [`try_recv`].
///
/// [`try_recv`]: EngineHandle::try_recv
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    current: Canceller,
}

/// Cancels whichever run an [`EngineHandle`] started last. Cheap to clone
/// and usable from other threads, e.g. a signal handler.
#[derive(Clone, Default)]
pub struct Canceller {
    current: Arc<Mutex<CancellationToken>>,
}

impl Canceller {
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    fn replace(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = cancel.clone();
        }
        cancel
    }
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    reject_all(cmd_rx, &event_tx, &format!("tokio runtime: {err}"));
                    return;
                }
            };
            let orchestrator = match Orchestrator::new(config) {
                Ok(orchestrator) => orchestrator,
                Err(err) => {
                    reject_all(cmd_rx, &event_tx, &err.to_string());
                    return;
                }
            };

            while let Ok(command) = cmd_rx.recv() {
                runtime.block_on(handle_command(&orchestrator, command, &event_tx));
            }
        });

        Self {
            cmd_tx,
            event_rx,
            current: Canceller::default(),
        }
    }

    /// Queues `request`. It runs after any request already queued.
    pub fn start(&self, request: ScrapeRequest) {
        let cancel = self.current.replace();
        let _ = self.cmd_tx.send(EngineCommand::Run { request, cancel });
    }

    /// Cancels the most recently started request. The run stops at the
    /// next source, page, card or candidate boundary.
    pub fn cancel(&self) {
        self.current.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.current.clone()
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Blocks until the next event; `None` once the worker is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.event_rx.recv().ok()
    }
}

async fn handle_command(
    orchestrator: &Orchestrator,
    command: EngineCommand,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::Run { request, cancel } => {
            let sink = ChannelProgressSink::new(event_tx.clone());
            let report = match orchestrator.run(request, &cancel, &sink).await {
                Ok(report) => report,
                Err(err) => rejected(&err.to_string()),
            };
            engine_info!(
                "Run finished: {} sources completed, {} failed",
                report.results.len(),
                report.failures.len()
            );
            let _ = event_tx.send(EngineEvent::RunFinished(report));
        }
    }
}

fn rejected(reason: &str) -> RunReport {
    RunReport {
        failures: vec![reason.to_string()],
        aborted: true,
        ..RunReport::default()
    }
}

/// Answers every queued request with an aborted report.
fn reject_all(
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: &mpsc::Sender<EngineEvent>,
    reason: &str,
) {
    engine_error!("Engine unavailable: {}", reason);
    while let Ok(EngineCommand::Run { .. }) = cmd_rx.recv() {
        let _ = event_tx.send(EngineEvent::RunFinished(rejected(reason)));
    }
}
