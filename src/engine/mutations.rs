use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_approvable, check_no_conflict};
use super::lifecycle::next_status;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Directory mirror ─────────────────────────────────────

    /// Record that a party exists. Registering twice is a no-op.
    pub async fn register_party(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        if self.store.contains_party(&id) {
            return Ok(());
        }
        if self.store.party_count() >= MAX_PARTIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many parties"));
        }
        let event = Event::PartyRegistered { id };
        self.wal_append(&event).await?;
        self.store.apply_directory_event(&event);
        Ok(())
    }

    /// Upsert an item record. Re-listing may change owner and availability.
    pub async fn list_item(&self, id: Ulid, owner_id: Ulid, available: bool) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let existing = self.store.item(&id);
        if existing.is_none() && self.store.item_count() >= MAX_ITEMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        if existing == Some(ItemRecord { id, owner_id, available }) {
            return Ok(());
        }

        let event = Event::ItemListed { id, owner_id, available };
        match self.store.ledger(&id) {
            Some(ledger) => {
                let mut guard = ledger.write().await;
                self.wal_append(&event).await?;
                self.store.apply_directory_event(&event);
                self.store.reassign_owner(&mut guard, owner_id);
            }
            None => {
                self.wal_append(&event).await?;
                self.store.apply_directory_event(&event);
            }
        }
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Persist a new WAITING reservation for `item`.
    ///
    /// The item's ledger stays write-locked from the overlap check through
    /// the insert, so two creators racing for one item are serialised.
    pub async fn create_reservation(
        &self,
        item: &ItemRecord,
        booker_id: Ulid,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.commit_gate.read().await;
        let ledger = self.store.ledger_or_create(item.id, item.owner_id);
        let mut guard = ledger.write().await;
        self.store.reassign_owner(&mut guard, item.owner_id);
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many reservations on item"));
        }

        check_no_conflict(&guard, &span)?;

        let reservation = Reservation {
            id: Ulid::new(),
            item_id: item.id,
            booker_id,
            span,
            status: ReservationStatus::Waiting,
        };
        let event = Event::ReservationCreated {
            id: reservation.id,
            item_id: reservation.item_id,
            owner_id: guard.owner_id,
            booker_id,
            span,
            status: reservation.status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Approve or reject a WAITING reservation on behalf of the item owner.
    ///
    /// `owner_id` is the item's current owner as the catalog reports it; the
    /// ledger adopts it. Anyone other than the owner gets `NotFound`, exactly
    /// as if the reservation did not exist. Status read, transition check and
    /// write all happen under the item's ledger lock.
    pub async fn set_status(
        &self,
        reservation_id: Ulid,
        caller_id: Ulid,
        owner_id: Ulid,
        approve: bool,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_reservation_write(&reservation_id).await?;
        self.store.reassign_owner(&mut guard, owner_id);
        if owner_id != caller_id {
            return Err(EngineError::NotFound(reservation_id));
        }
        let current = guard
            .get(&reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))?;

        let status = next_status(reservation_id, current.status, approve)?;
        if status == ReservationStatus::Approved {
            check_approvable(&guard, &current.span)?;
        }

        let event = Event::ReservationStatusChanged {
            id: reservation_id,
            item_id: current.item_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::RESERVATION_TRANSITIONS_TOTAL,
            "status" => status.as_str()
        )
        .increment(1);
        Ok(Reservation { status, ..current })
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events: Vec<Event> = self
            .store
            .parties()
            .into_iter()
            .map(|id| Event::PartyRegistered { id })
            .collect();
        events.extend(self.store.items().into_iter().map(|item| Event::ItemListed {
            id: item.id,
            owner_id: item.owner_id,
            available: item.available,
        }));

        for item_id in self.store.ledger_ids() {
            let Some(ledger) = self.store.ledger(&item_id) else {
                continue;
            };
            let guard = ledger.read().await;
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    item_id: r.item_id,
                    owner_id: guard.owner_id,
                    booker_id: r.booker_id,
                    span: r.span,
                    status: r.status,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
