use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::error::SuiteResult;
use crate::models::{LogSession, LogStats};
use crate::sensors::SensorCategory;
use crate::settings::SuiteSettings;

use super::scheduler::SamplingScheduler;
use super::state::CollectionState;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Longest the loop sleeps when no task is due, so stale buffers still get
/// flushed on time.
const HOUSEKEEPING_INTERVAL_MS: u64 = 250;
/// How long shutdown waits for background saves to report back.
const SAVE_GRACE_SECS: u64 = 5;

pub(crate) enum LoopCommand {
    Start {
        subject_id: Option<String>,
        reply: oneshot::Sender<SuiteResult<LogSession>>,
    },
    Stop {
        reply: oneshot::Sender<Option<LogSession>>,
    },
    LogEvent {
        name: String,
        value: String,
        reply: oneshot::Sender<bool>,
    },
    ApplySettings {
        settings: Box<SuiteSettings>,
        reply: oneshot::Sender<SuiteResult<()>>,
    },
    SafetyFlush,
    Status {
        reply: oneshot::Sender<SuiteStatus>,
    },
}

/// Point-in-time view of the service, read on the serialization thread.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteStatus {
    pub collection: CollectionState,
    pub session: Option<LogSession>,
    pub log: LogStats,
    pub active_categories: Vec<SensorCategory>,
    pub saves_in_flight: usize,
}

impl SuiteStatus {
    fn of(scheduler: &SamplingScheduler) -> Self {
        Self {
            collection: scheduler.state().clone(),
            session: scheduler.log().current_session(),
            log: scheduler.log_stats(),
            active_categories: scheduler.active_categories(),
            saves_in_flight: scheduler.saves_in_flight(),
        }
    }
}

/// The serialization loop. Every wake-up runs due tasks, drains the
/// dispatcher once and does log housekeeping, all on this thread.
pub(crate) async fn serialization_loop(
    mut scheduler: SamplingScheduler,
    mut dispatcher: Dispatcher<SamplingScheduler>,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
    cancel_token: CancellationToken,
) {
    let housekeeping = Duration::from_millis(HOUSEKEEPING_INTERVAL_MS);

    loop {
        let fallback = Instant::now() + housekeeping;
        let wake_at = scheduler
            .next_deadline()
            .map(Instant::from_std)
            .map_or(fallback, |due| due.min(fallback));

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("serialization loop shutting down");
                break;
            }
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut scheduler, command),
                None => {
                    log_info!("controller dropped; serialization loop exiting");
                    break;
                }
            },
            _ = dispatcher.notified() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }

        scheduler.tick(std::time::Instant::now());
        dispatcher.drain(&mut scheduler);
        scheduler.housekeeping();
    }

    scheduler.stop_collection();
    settle_saves(&mut scheduler, &mut dispatcher).await;
}

fn handle_command(scheduler: &mut SamplingScheduler, command: LoopCommand) {
    match command {
        LoopCommand::Start { subject_id, reply } => {
            let result = scheduler.start_collection(subject_id.as_deref(), std::time::Instant::now());
            if let Err(err) = &result {
                log::error!("Failed to start data collection: {err}");
            }
            let _ = reply.send(result);
        }
        LoopCommand::Stop { reply } => {
            let _ = reply.send(scheduler.stop_collection());
        }
        LoopCommand::LogEvent { name, value, reply } => {
            let _ = reply.send(scheduler.log_event(&name, &value));
        }
        LoopCommand::ApplySettings { settings, reply } => {
            let _ = reply.send(scheduler.apply_settings(*settings));
        }
        LoopCommand::SafetyFlush => scheduler.safety_flush(),
        LoopCommand::Status { reply } => {
            let _ = reply.send(SuiteStatus::of(scheduler));
        }
    }
}

/// Give in-flight saves a bounded window to finish so their files are
/// complete, running whatever they report back.
async fn settle_saves(
    scheduler: &mut SamplingScheduler,
    dispatcher: &mut Dispatcher<SamplingScheduler>,
) {
    let deadline = Instant::now() + Duration::from_secs(SAVE_GRACE_SECS);
    while scheduler.saves_in_flight() > 0 {
        if Instant::now() >= deadline {
            log_warn!(
                "{} background saves still running at shutdown",
                scheduler.saves_in_flight()
            );
            break;
        }
        tokio::select! {
            _ = dispatcher.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }
    dispatcher.drain(scheduler);
}
