mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{has_completed, summarize};
pub use conflict::{
    check_approvable, check_no_conflict, count_approved_intersections, count_approved_overlaps, now_ms,
    validate_window,
};
pub use error::EngineError;
pub use lifecycle::next_status;
pub use store::{InMemoryStore, SharedLedger};

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!("WAL flush of {} events failed: {e}", batch.len());
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside batch")));
        }
    }
}

/// Reservation store of one tenant: in-memory ledgers backed by a WAL.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by every mutation, exclusive for compaction, so a compaction
    /// snapshot never misses a committed event. Always taken before any
    /// ledger lock.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
        };

        // We're the sole owner of every ledger during replay, so try_write
        // always succeeds. Never block here: this may run inside an async
        // context (lazy tenant creation).
        for event in &events {
            engine.replay_event(event)?;
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}",
                events.len(),
                wal_path.display()
            );
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) -> io::Result<()> {
        let uncontended = |_| io::Error::other("replay: ledger lock contended");
        match event {
            Event::PartyRegistered { .. } => self.store.apply_directory_event(event),
            Event::ItemListed { id, owner_id, .. } => {
                self.store.apply_directory_event(event);
                if let Some(ledger) = self.store.ledger(id) {
                    let mut guard = ledger.try_write().map_err(uncontended)?;
                    self.store.reassign_owner(&mut guard, *owner_id);
                }
            }
            Event::ReservationCreated { item_id, owner_id, .. } => {
                let ledger = self.store.ledger_or_create(*item_id, *owner_id);
                let mut guard = ledger.try_write().map_err(uncontended)?;
                self.store.apply_to_ledger(&mut guard, event);
            }
            Event::ReservationStatusChanged { item_id, .. } => {
                if let Some(ledger) = self.store.ledger(item_id) {
                    let mut guard = ledger.try_write().map_err(uncontended)?;
                    self.store.apply_to_ledger(&mut guard, event);
                }
            }
        }
        Ok(())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn ledger(&self, item_id: &Ulid) -> Option<SharedLedger> {
        self.store.ledger(item_id)
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut ItemLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_ledger(ledger, event);
        Ok(())
    }

    /// Lookup reservation → item, acquire that item's ledger write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ItemLedger>, EngineError> {
        let item_id = self
            .store
            .item_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let ledger = self
            .store
            .ledger(&item_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        Ok(ledger.write_owned().await)
    }
}
