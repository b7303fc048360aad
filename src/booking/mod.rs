//! Booking service: the entry point the transport layer talks to.
//!
//! Pulls item and party records from the collaborators, runs the checks in a
//! fixed order (the order decides which error a caller sees when several
//! apply), and hands persistence to the [`Engine`].


use std::sync::Arc;

use tracing::{debug, info};
use ulid::Ulid;

use crate::directory::{ItemCatalog, PartyRegistry};
use crate::engine::{now_ms, validate_window, Engine, EngineError};
use crate::model::*;

/// Source of "now" in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

/// A booker's request. Either end may be missing; that is reported as a
/// validation failure, not a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReservation {
    pub item_id: Ulid,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

pub struct BookingService {
    engine: Arc<Engine>,
    items: Arc<dyn ItemCatalog>,
    parties: Arc<dyn PartyRegistry>,
    clock: Clock,
}

impl BookingService {
    pub fn new(
        engine: Arc<Engine>,
        items: Arc<dyn ItemCatalog>,
        parties: Arc<dyn PartyRegistry>,
    ) -> Self {
        Self {
            engine,
            items,
            parties,
            clock: Arc::new(now_ms),
        }
    }

    /// Service whose collaborators are the engine's own directory mirror.
    pub fn standalone(engine: Arc<Engine>) -> Self {
        Self::new(engine.clone(), engine.clone(), engine)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn now(&self) -> Ms {
        (self.clock)()
    }

    async fn require_party(&self, id: Ulid) -> Result<(), EngineError> {
        if self.parties.party_exists(id).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(id))
        }
    }

    /// Create a WAITING reservation for `caller_id`.
    ///
    /// Check order: item exists, caller exists, caller is not the owner,
    /// window is valid, item is available and free of approved overlaps.
    /// Booking one's own item reports `NotFound` on purpose.
    pub async fn create(
        &self,
        caller_id: Ulid,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let item = self.items.get_item(request.item_id).await?;
        self.require_party(caller_id).await?;
        if item.owner_id == caller_id {
            debug!("party {caller_id} tried to book own item {}", item.id);
            return Err(EngineError::NotFound(item.id));
        }

        let span = validate_window(request.start, request.end, self.now())?;
        if !item.available {
            return Err(EngineError::Validation("item is not available"));
        }

        let reservation = self.engine.create_reservation(&item, caller_id, span).await?;
        info!(
            "reservation {} created: item {} booker {} [{}, {})",
            reservation.id, item.id, caller_id, span.start, span.end
        );
        Ok(reservation)
    }

    /// Current owner of the item a reservation belongs to, per the catalog.
    /// `None` when either the reservation or the item is unknown.
    async fn reservation_owner(&self, reservation_id: Ulid) -> Result<Option<Ulid>, EngineError> {
        let Some(item_id) = self.engine.item_for_reservation(&reservation_id) else {
            return Ok(None);
        };
        match self.items.get_item(item_id).await {
            Ok(item) => Ok(Some(item.owner_id)),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Owner decision on a WAITING reservation.
    pub async fn set_status(
        &self,
        reservation_id: Ulid,
        caller_id: Ulid,
        approve: bool,
    ) -> Result<Reservation, EngineError> {
        let owner_id = self
            .reservation_owner(reservation_id)
            .await?
            .ok_or(EngineError::NotFound(reservation_id))?;
        let reservation = self
            .engine
            .set_status(reservation_id, caller_id, owner_id, approve)
            .await?;
        info!("reservation {reservation_id} {} by {caller_id}", reservation.status);
        Ok(reservation)
    }

    pub async fn get(&self, reservation_id: Ulid, caller_id: Ulid) -> Result<Reservation, EngineError> {
        let owner_id = self.reservation_owner(reservation_id).await?;
        self.engine
            .get_reservation(reservation_id, caller_id, owner_id)
            .await
    }

    /// Reservations made by `caller_id`.
    pub async fn list_by_booker(
        &self,
        caller_id: Ulid,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.list(Role::Booker, caller_id, state, from, size).await
    }

    /// Reservations on items owned by `caller_id`.
    pub async fn list_by_owner(
        &self,
        caller_id: Ulid,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.list(Role::Owner, caller_id, state, from, size).await
    }

    async fn list(
        &self,
        role: Role,
        caller_id: Ulid,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<Reservation>, EngineError> {
        let filter: StateFilter = state.parse()?;
        let page = PageRequest::new(from, size).ok_or(EngineError::InvalidPagination { from, size })?;
        self.require_party(caller_id).await?;
        if role == Role::Owner {
            self.refresh_owned_items(caller_id).await?;
        }
        Ok(self
            .engine
            .list_reservations(role, caller_id, filter, page, self.now())
            .await)
    }

    /// Drop items the catalog has since handed to someone else from the
    /// caller's owner scope.
    async fn refresh_owned_items(&self, caller_id: Ulid) -> Result<(), EngineError> {
        for item_id in self.engine.owned_item_ids(&caller_id) {
            match self.items.get_item(item_id).await {
                Ok(item) if item.owner_id != caller_id => {
                    debug!("item {item_id} moved from {caller_id} to {}", item.owner_id);
                    self.engine.sync_owner(item_id, item.owner_id).await;
                }
                Ok(_) | Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Last/next reservation for an item listing. Recomputed on every call.
    pub async fn summarize_availability(&self, item_id: Ulid, now: Ms) -> AvailabilitySummary {
        self.engine.summarize_availability(item_id, now).await
    }

    /// [`Self::summarize_availability`] at the service clock's now.
    pub async fn summarize_availability_now(&self, item_id: Ulid) -> AvailabilitySummary {
        self.summarize_availability(item_id, self.now()).await
    }

    /// Upsert an item in the directory mirror on behalf of `caller_id`.
    ///
    /// A new item may be listed by anyone. An existing one may only be
    /// re-listed by its current owner; anyone else gets `NotFound`.
    pub async fn list_item(&self, caller_id: Option<Ulid>, item: ItemRecord) -> Result<(), EngineError> {
        if let Some(current) = self.engine.item(&item.id) {
            if caller_id != Some(current.owner_id) {
                debug!("re-listing of item {} refused for {caller_id:?}", item.id);
                return Err(EngineError::NotFound(item.id));
            }
        }
        self.engine
            .list_item(item.id, item.owner_id, item.available)
            .await
    }

    /// Whether `party_id` finished an approved rental of the item, which is
    /// what entitles them to leave feedback on it.
    pub async fn has_completed_booking(&self, item_id: Ulid, party_id: Ulid) -> bool {
        self.engine
            .has_completed_booking(item_id, party_id, self.now())
            .await
    }
}
