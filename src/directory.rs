//! Collaborator seams: where item and party records come from.
//!
//! The booking core only reads these records. [`Engine`] implements both
//! traits over its mirrored directory so a standalone server needs nothing
//! else; an embedding application can plug in its own catalog instead.

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::ItemRecord;

#[async_trait]
pub trait ItemCatalog: Send + Sync {
    /// `EngineError::NotFound` if no such item is listed.
    async fn get_item(&self, id: Ulid) -> Result<ItemRecord, EngineError>;
}

#[async_trait]
pub trait PartyRegistry: Send + Sync {
    async fn party_exists(&self, id: Ulid) -> Result<bool, EngineError>;
}

#[async_trait]
impl ItemCatalog for Engine {
    async fn get_item(&self, id: Ulid) -> Result<ItemRecord, EngineError> {
        self.item(&id).ok_or(EngineError::NotFound(id))
    }
}

#[async_trait]
impl PartyRegistry for Engine {
    async fn party_exists(&self, id: Ulid) -> Result<bool, EngineError> {
        Ok(self.has_party(&id))
    }
}
