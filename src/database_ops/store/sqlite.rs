use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Executor};
use tracing::{debug, info, instrument};

use super::{CatalogStore, PageWriter};
use crate::config::StoreBackend;
use crate::database_ops::fdc::normalize::{FoodRecord, NutrientEntry};
use crate::error::IngestResult;
use crate::util::db::{pending, sqlite_connect_options, MIGRATIONS_TABLE, SQLITE_MIGRATIONS};

/// Single-file store for local runs. Same connection-per-page lifecycle as
/// the Postgres store.
#[derive(Clone)]
pub struct SqliteStore {
    options: SqliteConnectOptions,
}

impl SqliteStore {
    pub fn new(path: &Path) -> Self {
        Self {
            options: sqlite_connect_options(path),
        }
    }

    async fn connect(&self) -> IngestResult<SqliteConnection> {
        Ok(SqliteConnection::connect_with(&self.options).await?)
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn begin_page(&self) -> IngestResult<Box<dyn PageWriter>> {
        let mut conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE").await?;
        debug!("sqlite page transaction opened");
        Ok(Box::new(SqlitePage { conn }))
    }

    #[instrument(skip(self))]
    async fn migrate(&self) -> IngestResult<()> {
        let mut conn = self.connect().await?;
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                version INTEGER PRIMARY KEY,
                description TEXT,
                installed_at TEXT DEFAULT CURRENT_TIMESTAMP
             )"
        );
        conn.execute(create.as_str()).await?;

        let select = format!("SELECT version FROM {MIGRATIONS_TABLE}");
        let applied: HashSet<i64> = sqlx::query_scalar::<_, i64>(&select)
            .fetch_all(&mut conn)
            .await?
            .into_iter()
            .collect();

        for migration in pending(SQLITE_MIGRATIONS, &applied) {
            let record = format!(
                "INSERT INTO {MIGRATIONS_TABLE} (version, description) VALUES (?1, ?2)"
            );
            let mut tx = conn.begin().await?;
            (&mut *tx).execute(migration.sql).await?;
            sqlx::query(&record)
                .bind(migration.version)
                .bind(migration.description)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(
                version = migration.version,
                description = migration.description,
                "applied migration"
            );
        }

        conn.close().await?;
        Ok(())
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }
}

struct SqlitePage {
    conn: SqliteConnection,
}

#[async_trait]
impl PageWriter for SqlitePage {
    async fn insert_food(&mut self, food: &FoodRecord) -> IngestResult<bool> {
        let result = sqlx::query(
            "INSERT INTO food (fdc_id, description, data_type, food_category, publication_date, brand_owner, gtin_upc, ndb_number, food_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (fdc_id) DO NOTHING",
        )
        .bind(food.fdc_id)
        .bind(food.description.as_str())
        .bind(food.data_type.as_str())
        .bind(food.food_category.as_deref())
        .bind(food.publication_date)
        .bind(food.brand_owner.as_deref())
        .bind(food.gtin_upc.as_deref())
        .bind(food.ndb_number.as_deref())
        .bind(food.food_code.as_deref())
        .execute(&mut self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn food_id(&mut self, fdc_id: i64) -> IngestResult<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM food WHERE fdc_id = ?1")
            .bind(fdc_id)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(id)
    }

    async fn insert_nutrient(&mut self, nutrient: &NutrientEntry) -> IngestResult<bool> {
        let result = sqlx::query(
            "INSERT INTO nutrient (nutrient_number, name, unit_name, derivation_code, derivation_description)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (nutrient_number) DO NOTHING",
        )
        .bind(nutrient.number.as_str())
        .bind(nutrient.name.as_str())
        .bind(nutrient.unit_name.as_deref())
        .bind(nutrient.derivation_code.as_deref())
        .bind(nutrient.derivation_description.as_deref())
        .execute(&mut self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn nutrient_id(&mut self, number: &str) -> IngestResult<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM nutrient WHERE nutrient_number = ?1")
                .bind(number)
                .fetch_optional(&mut self.conn)
                .await?;
        Ok(id)
    }

    async fn insert_food_nutrient(
        &mut self,
        food_id: i64,
        nutrient_id: i64,
        amount: Option<f64>,
        unit_name: Option<&str>,
    ) -> IngestResult<bool> {
        let result = sqlx::query(
            "INSERT INTO food_nutrient (food_id, nutrient_id, amount, unit_name)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (food_id, nutrient_id) DO NOTHING",
        )
        .bind(food_id)
        .bind(nutrient_id)
        .bind(amount)
        .bind(unit_name)
        .execute(&mut self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> IngestResult<()> {
        let mut conn = self.conn;
        conn.execute("COMMIT").await?;
        conn.close().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> IngestResult<()> {
        let mut conn = self.conn;
        let result = conn.execute("ROLLBACK").await;
        conn.close().await?;
        result?;
        Ok(())
    }
}
