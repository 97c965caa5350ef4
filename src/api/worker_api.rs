// Worker facade: a session manager on its own task behind command/event channels.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::traits::{EngineAdapter, Prompt};
use crate::config::EngineConfig;
use crate::engine::error::ManagerError;
use crate::engine::events::{EventSink, GenerateRequest, InitRequest, WorkerCommand, WorkerEvent};
use crate::engine::session::SessionManager;

/// Sending half of a worker: post commands and cancel the in-flight operation.
#[derive(Clone)]
pub struct WorkerControl {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
}

impl WorkerControl {
    pub fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("worker has shut down"))
    }

    pub fn init(&self, model_id: impl Into<String>, max_tokens: Option<usize>) -> Result<()> {
        self.send(WorkerCommand::Init(InitRequest {
            model_id: model_id.into(),
            max_tokens,
        }))
    }

    pub fn generate(&self, prompt: Prompt) -> Result<()> {
        self.send(WorkerCommand::Generate(GenerateRequest { prompt }))
    }

    /// Cancel the running acquisition or generation, if any.
    ///
    /// Also queues a `cancel` command, so an operation posted earlier but not
    /// yet picked up by the worker is cancelled as soon as it starts.
    pub fn cancel(&self) {
        if let Some(token) = self.in_flight.lock().as_ref() {
            token.cancel();
        }
        // Closed channel: the worker is already gone.
        let _ = self.commands.send(WorkerCommand::Cancel);
    }
}

/// In-process worker: the `postMessage`/`onmessage` pair of the browser version.
pub struct WorkerHandle {
    control: WorkerControl,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    task: JoinHandle<()>,
}

/// Start a worker task that owns a fresh session manager (and its cache).
pub fn spawn_worker(adapter: Arc<dyn EngineAdapter>, config: EngineConfig) -> Result<WorkerHandle> {
    let (sink, events) = EventSink::channel();
    let manager = SessionManager::new(adapter, &config, sink.clone())?;
    let (commands, command_rx) = mpsc::unbounded_channel();
    let in_flight = Arc::new(Mutex::new(None));

    let task = tokio::spawn(run_worker(manager, command_rx, sink, Arc::clone(&in_flight)));

    Ok(WorkerHandle {
        control: WorkerControl {
            commands,
            in_flight,
        },
        events,
        task,
    })
}

impl WorkerHandle {
    pub fn control(&self) -> &WorkerControl {
        &self.control
    }

    pub fn send(&self, command: WorkerCommand) -> Result<()> {
        self.control.send(command)
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Receive events up to and including the next `ready`, `complete`, or `error`.
    ///
    /// A command rejected as busy also ends the collection: its `error` event
    /// arrives on the same stream and carries no link to the command that caused
    /// it, so the in-flight operation's own terminal event then shows up in the
    /// next call.
    pub async fn events_until_terminal(&mut self) -> Vec<WorkerEvent> {
        let mut collected = Vec::new();
        while let Some(event) = self.events.recv().await {
            let done = event.is_terminal();
            collected.push(event);
            if done {
                break;
            }
        }
        collected
    }

    /// Split into the command side and the event stream. The task stops once
    /// every `WorkerControl` clone is dropped.
    pub fn split(self) -> (WorkerControl, mpsc::UnboundedReceiver<WorkerEvent>) {
        (self.control, self.events)
    }

    /// Stop accepting commands, let the current operation finish, release sessions.
    pub async fn shutdown(self) -> Result<()> {
        let WorkerHandle { control, task, .. } = self;
        drop(control);
        task.await?;
        Ok(())
    }
}

async fn run_worker(
    mut manager: SessionManager,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    sink: EventSink,
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
) {
    info!("worker started");
    while let Some(command) = commands.recv().await {
        if command == WorkerCommand::Cancel {
            debug!("cancel received with nothing in flight");
            continue;
        }

        let activity = command.name();
        let token = CancellationToken::new();
        *in_flight.lock() = Some(token.clone());

        let mut closed = false;
        {
            let op = manager.handle(command, &token);
            tokio::pin!(op);
            loop {
                tokio::select! {
                    _ = &mut op => break,
                    next = commands.recv(), if !closed => match next {
                        Some(WorkerCommand::Cancel) => {
                            info!("cancelling in-flight {}", activity);
                            token.cancel();
                        }
                        Some(other) => {
                            warn!("rejecting {} while {} is in flight", other.name(), activity);
                            sink.error(ManagerError::Busy(activity));
                        }
                        None => closed = true,
                    },
                }
            }
        }

        *in_flight.lock() = None;
        if closed {
            break;
        }
    }

    manager.shutdown().await;
    info!("worker stopped");
}
