//! Storage backends for the food / nutrient / food_nutrient star schema.
//!
//! A [`CatalogStore`] hands out one [`PageWriter`] per page. Acquiring the
//! writer opens a fresh connection and starts a transaction; `commit` or
//! `rollback` ends it and releases the connection. A writer dropped without
//! either discards its writes.
//!
//! All inserts are insert-or-ignore: the first write of a key wins and later
//! duplicates are no-ops. Generated ids are assigned by the store and must be
//! looked up, never chosen by the caller. The lookup after an insert relies on
//! a single writer; concurrent deleters are not supported.

use async_trait::async_trait;

use crate::config::{DatabaseConfig, StoreBackend};
use crate::database_ops::fdc::normalize::{FoodRecord, NutrientEntry};
use crate::error::IngestResult;

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a connection and begin the transaction for one page.
    async fn begin_page(&self) -> IngestResult<Box<dyn PageWriter>>;

    /// Create or upgrade the schema. Idempotent.
    async fn migrate(&self) -> IngestResult<()>;

    fn backend(&self) -> StoreBackend;
}

/// Transaction-scoped writer for a single page.
#[async_trait]
pub trait PageWriter: Send {
    /// Returns true when a new row was inserted.
    async fn insert_food(&mut self, food: &FoodRecord) -> IngestResult<bool>;

    async fn food_id(&mut self, fdc_id: i64) -> IngestResult<Option<i64>>;

    /// Returns true when a new row was inserted.
    async fn insert_nutrient(&mut self, nutrient: &NutrientEntry) -> IngestResult<bool>;

    async fn nutrient_id(&mut self, number: &str) -> IngestResult<Option<i64>>;

    /// Returns true when a new link row was inserted.
    async fn insert_food_nutrient(
        &mut self,
        food_id: i64,
        nutrient_id: i64,
        amount: Option<f64>,
        unit_name: Option<&str>,
    ) -> IngestResult<bool>;

    async fn commit(self: Box<Self>) -> IngestResult<()>;

    async fn rollback(self: Box<Self>) -> IngestResult<()>;
}

/// Build the store selected by configuration.
pub async fn open_store(cfg: &DatabaseConfig) -> IngestResult<Box<dyn CatalogStore>> {
    let store: Box<dyn CatalogStore> = match cfg.backend {
        StoreBackend::Postgres => Box::new(PgStore::from_url(cfg.postgres_url()?)?),
        StoreBackend::Sqlite => Box::new(SqliteStore::new(&cfg.sqlite_path)),
        StoreBackend::Memory => Box::new(MemoryStore::default()),
    };
    Ok(store)
}
