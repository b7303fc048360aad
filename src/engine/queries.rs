use ulid::Ulid;

use crate::model::*;

use super::availability::{has_completed, summarize};
use super::{Engine, EngineError};

impl Engine {
    /// Fetch one reservation for its booker or the item owner. Everyone else
    /// gets `NotFound`. `owner_id` is `None` when the catalog no longer
    /// knows the item, which leaves only the booker.
    pub async fn get_reservation(
        &self,
        reservation_id: Ulid,
        caller_id: Ulid,
        owner_id: Option<Ulid>,
    ) -> Result<Reservation, EngineError> {
        let ledger = self
            .store
            .item_for_reservation(&reservation_id)
            .and_then(|item_id| self.store.ledger(&item_id))
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = ledger.read().await;
        match guard.get(&reservation_id) {
            Some(r) if r.booker_id == caller_id || owner_id == Some(caller_id) => Ok(r.clone()),
            _ => Err(EngineError::NotFound(reservation_id)),
        }
    }

    /// One page of the caller's reservations, newest start first.
    ///
    /// `Role::Booker` lists reservations the caller made; `Role::Owner` lists
    /// reservations on items the caller owns.
    pub async fn list_reservations(
        &self,
        role: Role,
        caller_id: Ulid,
        filter: StateFilter,
        page: PageRequest,
        now: Ms,
    ) -> Vec<Reservation> {
        let mut rows = Vec::new();
        for item_id in self.store.item_ids_for(role, &caller_id) {
            let Some(ledger) = self.store.ledger(&item_id) else {
                continue;
            };
            let guard = ledger.read().await;
            let visible = match role {
                Role::Booker => true,
                Role::Owner => guard.owner_id == caller_id,
            };
            if !visible {
                continue;
            }
            rows.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| role == Role::Owner || r.booker_id == caller_id)
                    .filter(|r| filter.matches(r, now))
                    .cloned(),
            );
        }

        rows.sort_by(|a, b| {
            b.span
                .start
                .cmp(&a.span.start)
                .then_with(|| b.id.cmp(&a.id))
        });
        rows.into_iter().skip(page.skip()).take(page.take()).collect()
    }

    pub fn item_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.store.item_for_reservation(reservation_id)
    }

    /// Items whose ledgers currently name `owner_id` as owner.
    pub fn owned_item_ids(&self, owner_id: &Ulid) -> Vec<Ulid> {
        self.store.item_ids_for(Role::Owner, owner_id)
    }

    /// Point an item's ledger at `owner_id` if it names someone else.
    pub async fn sync_owner(&self, item_id: Ulid, owner_id: Ulid) {
        let Some(ledger) = self.store.ledger(&item_id) else {
            return;
        };
        if ledger.read().await.owner_id == owner_id {
            return;
        }
        let mut guard = ledger.write().await;
        self.store.reassign_owner(&mut guard, owner_id);
    }

    /// Last and next reservation of an item relative to `now`.
    pub async fn summarize_availability(&self, item_id: Ulid, now: Ms) -> AvailabilitySummary {
        match self.store.ledger(&item_id) {
            Some(ledger) => summarize(&*ledger.read().await, now),
            None => AvailabilitySummary::default(),
        }
    }

    pub async fn has_completed_booking(&self, item_id: Ulid, booker_id: Ulid, now: Ms) -> bool {
        match self.store.ledger(&item_id) {
            Some(ledger) => has_completed(&*ledger.read().await, &booker_id, now),
            None => false,
        }
    }

    // ── Directory mirror ─────────────────────────────────────

    pub fn item(&self, id: &Ulid) -> Option<ItemRecord> {
        self.store.item(id)
    }

    pub fn has_party(&self, id: &Ulid) -> bool {
        self.store.contains_party(id)
    }

    pub fn party_count(&self) -> usize {
        self.store.party_count()
    }

    pub fn item_count(&self) -> usize {
        self.store.item_count()
    }
}
