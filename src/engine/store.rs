use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedLedger = Arc<RwLock<ItemLedger>>;

/// Per-tenant reservation storage plus the mirrored collaborator records.
///
/// Reservation rows live inside per-item ledgers; the maps here are indexes
/// that let queries find the right ledgers without scanning all of them.
pub struct InMemoryStore {
    ledgers: DashMap<Ulid, SharedLedger>,
    reservation_to_item: DashMap<Ulid, Ulid>,
    booker_items: DashMap<Ulid, Vec<Ulid>>,
    owner_items: DashMap<Ulid, Vec<Ulid>>,
    items: DashMap<Ulid, ItemRecord>,
    parties: DashSet<Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            ledgers: DashMap::new(),
            reservation_to_item: DashMap::new(),
            booker_items: DashMap::new(),
            owner_items: DashMap::new(),
            items: DashMap::new(),
            parties: DashSet::new(),
        }
    }

    // ── Ledgers ──────────────────────────────────────────────

    pub fn ledger(&self, item_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(item_id).map(|e| e.value().clone())
    }

    /// Fetch the item's ledger, creating an empty one owned by `owner_id`.
    pub fn ledger_or_create(&self, item_id: Ulid, owner_id: Ulid) -> SharedLedger {
        let mut created = false;
        let ledger = self
            .ledgers
            .entry(item_id)
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(ItemLedger::new(item_id, owner_id)))
            })
            .value()
            .clone();
        if created {
            index_push(&self.owner_items, owner_id, item_id);
        }
        ledger
    }

    pub fn ledger_ids(&self) -> Vec<Ulid> {
        self.ledgers.iter().map(|e| *e.key()).collect()
    }

    // ── Reservation index ────────────────────────────────────

    pub fn item_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_item.get(reservation_id).map(|e| *e.value())
    }

    /// Items whose ledgers may hold rows visible to `party` in `role`.
    pub fn item_ids_for(&self, role: Role, party: &Ulid) -> Vec<Ulid> {
        let index = match role {
            Role::Booker => &self.booker_items,
            Role::Owner => &self.owner_items,
        };
        index.get(party).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Move an item between owners in the owner index and on the ledger.
    pub fn reassign_owner(&self, ledger: &mut ItemLedger, owner_id: Ulid) {
        if ledger.owner_id == owner_id {
            return;
        }
        if let Some(mut items) = self.owner_items.get_mut(&ledger.owner_id) {
            items.retain(|i| *i != ledger.item_id);
        }
        index_push(&self.owner_items, owner_id, ledger.item_id);
        ledger.owner_id = owner_id;
    }

    // ── Directory mirror ─────────────────────────────────────

    pub fn item(&self, id: &Ulid) -> Option<ItemRecord> {
        self.items.get(id).map(|e| *e.value())
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> Vec<ItemRecord> {
        self.items.iter().map(|e| *e.value()).collect()
    }

    pub fn contains_party(&self, id: &Ulid) -> bool {
        self.parties.contains(id)
    }

    pub fn party_count(&self) -> usize {
        self.parties.len()
    }

    pub fn parties(&self) -> Vec<Ulid> {
        self.parties.iter().map(|e| *e.key()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a directory event. Owner changes on an existing ledger are the
    /// caller's job, since they need the ledger lock.
    pub fn apply_directory_event(&self, event: &Event) {
        match event {
            Event::PartyRegistered { id } => {
                self.parties.insert(*id);
            }
            Event::ItemListed { id, owner_id, available } => {
                self.items.insert(
                    *id,
                    ItemRecord {
                        id: *id,
                        owner_id: *owner_id,
                        available: *available,
                    },
                );
            }
            Event::ReservationCreated { .. } | Event::ReservationStatusChanged { .. } => {}
        }
    }

    /// Apply a reservation event to its ledger (no locking, caller holds the lock).
    pub fn apply_to_ledger(&self, ledger: &mut ItemLedger, event: &Event) {
        match event {
            Event::ReservationCreated {
                id,
                item_id,
                booker_id,
                span,
                status,
                ..
            } => {
                ledger.insert(Reservation {
                    id: *id,
                    item_id: *item_id,
                    booker_id: *booker_id,
                    span: *span,
                    status: *status,
                });
                self.reservation_to_item.insert(*id, *item_id);
                index_push(&self.booker_items, *booker_id, *item_id);
            }
            Event::ReservationStatusChanged { id, status, .. } => {
                if let Some(r) = ledger.get_mut(id) {
                    r.status = *status;
                }
            }
            Event::PartyRegistered { .. } | Event::ItemListed { .. } => {}
        }
    }
}

fn index_push(index: &DashMap<Ulid, Vec<Ulid>>, key: Ulid, item_id: Ulid) {
    let mut items = index.entry(key).or_default();
    if !items.contains(&item_id) {
        items.push(item_id);
    }
}
