mod calendar;
mod conflict;
mod error;
mod materialize;
mod mutations;
mod projection;
mod queries;
mod store;
mod utilization;

pub use calendar::{expand_range, is_weekday, time_diff, weekdays_in};
pub use conflict::{LastWriteWins, OverlapHook, RejectOverlaps};
pub use error::EngineError;
pub use materialize::{day_status, validate_draft};
pub use store::{Collections, UnitOfWork};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one arrives
/// shares a single fsync; callers are answered only after that fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn flush_and_respond(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, events = batch.len(), "WAL flush failed");
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a partial frame does not leak into the
    // next batch. Replay drops it by CRC.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => flush_and_respond(wal, vec![(event, response)]),
    }
}

/// The reconciliation engine: the three collections behind one lock, the WAL
/// writer, change notifications and the overlap policy.
pub struct Engine {
    state: RwLock<Collections>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    overlap_hook: Box<dyn OverlapHook>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a
    /// tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let mut state = Collections::new();
        for event in &events {
            state.apply_event(event);
        }
        tracing::info!(
            events = events.len(),
            assets = state.asset_count(),
            daily_logs = state.daily_log_count(),
            wal = %wal_path.display(),
            "state replayed"
        );

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
            notify,
            overlap_hook: Box::new(LastWriteWins),
        })
    }

    /// Replace the policy applied when a commit overwrites another assignment's days.
    pub fn with_overlap_hook(mut self, hook: impl OverlapHook + 'static) -> Self {
        self.overlap_hook = Box::new(hook);
        self
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply and notify. The caller holds the write guard, so readers
    /// see either none or all of the event.
    async fn persist(&self, state: &mut Collections, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        state.apply_event(&event);
        match &event {
            Event::AssetRegistered { asset } => self.notify.send(asset.id, &event),
            Event::AssignmentCommitted { assignment, .. } => {
                self.notify.send(assignment.asset_id, &event)
            }
            Event::StateRestored { .. } => self.notify.send_all(&event),
        }
        Ok(())
    }
}
