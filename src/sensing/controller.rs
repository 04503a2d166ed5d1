use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use log::{error, info};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::error::{SuiteError, SuiteResult};
use crate::models::LogSession;
use crate::sensors::SensorRig;
use crate::settings::SuiteSettings;

use super::loop_worker::{serialization_loop, LoopCommand, SuiteStatus};
use super::scheduler::SamplingScheduler;

/// Owned handle to the sensor suite service.
///
/// Spawning starts one OS thread running a single-threaded runtime; that
/// thread owns the scheduler, the session log and the dispatcher drain side.
/// Every method here only sends it a command. Dropping the controller (or
/// calling [`SuiteController::shutdown`]) stops collection, flushes the log
/// and joins the thread.
pub struct SuiteController {
    commands: mpsc::UnboundedSender<LoopCommand>,
    cancel_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SuiteController {
    pub fn spawn(settings: SuiteSettings, rig: SensorRig) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let worker = thread::Builder::new()
            .name("sensor-suite-loop".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to build serialization runtime")));
                        return;
                    }
                };

                let dispatcher = Dispatcher::new();
                let scheduler = SamplingScheduler::new(settings, rig, dispatcher.handle());
                if ready_tx.send(Ok(())).is_err() {
                    error!("Controller dropped before the serialization loop was ready");
                    return;
                }

                runtime.block_on(serialization_loop(
                    scheduler,
                    dispatcher,
                    command_rx,
                    token_clone,
                ));
                info!("Serialization thread shutting down");
            })
            .context("failed to spawn serialization thread")?;

        ready_rx
            .recv()
            .context("serialization thread exited before signaling readiness")??;

        Ok(Self {
            commands: command_tx,
            cancel_token,
            worker: Some(worker),
        })
    }

    pub async fn start_collection(&self, subject_id: Option<String>) -> SuiteResult<LogSession> {
        self.request(|reply| LoopCommand::Start { subject_id, reply })
            .await?
    }

    /// `Ok(None)` when nothing was being collected.
    pub async fn stop_collection(&self) -> SuiteResult<Option<LogSession>> {
        self.request(|reply| LoopCommand::Stop { reply }).await
    }

    /// Whether the event row was written.
    pub async fn log_event(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> SuiteResult<bool> {
        let (name, value) = (name.into(), value.into());
        self.request(|reply| LoopCommand::LogEvent { name, value, reply })
            .await
    }

    pub async fn apply_settings(&self, settings: SuiteSettings) -> SuiteResult<()> {
        let settings = Box::new(settings);
        self.request(|reply| LoopCommand::ApplySettings { settings, reply })
            .await?
    }

    pub async fn status(&self) -> SuiteResult<SuiteStatus> {
        self.request(|reply| LoopCommand::Status { reply }).await
    }

    pub async fn is_collecting(&self) -> SuiteResult<bool> {
        Ok(self.status().await?.collection.is_running())
    }

    /// Flush buffered rows without ending the session.
    pub fn safety_flush(&self) -> SuiteResult<()> {
        self.commands
            .send(LoopCommand::SafetyFlush)
            .map_err(|_| SuiteError::ServiceStopped)
    }

    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LoopCommand,
    ) -> SuiteResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| SuiteError::ServiceStopped)?;
        reply_rx.await.map_err(|_| SuiteError::ServiceStopped)
    }

    fn stop_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel_token.cancel();
        if let Err(join_err) = worker.join() {
            error!("Failed to join serialization thread: {join_err:?}");
        }
    }
}

impl Drop for SuiteController {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
