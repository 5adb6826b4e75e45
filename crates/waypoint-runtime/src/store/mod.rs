mod memory;
mod postgres;

pub use memory::InMemoryStateStore;
pub use postgres::PgStateStore;

use std::sync::Arc;

use waypoint_core::config::{StoreBackend, StoreConfig};
use waypoint_core::workflow::StateStore;
use waypoint_core::Result;

/// Create the state store selected by configuration.
pub async fn from_config(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStateStore::new())),
        StoreBackend::Postgres => {
            let store = PgStateStore::from_config(config).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}
