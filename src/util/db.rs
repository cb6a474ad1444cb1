use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;

/// Table recording which embedded migrations have been applied.
pub const MIGRATIONS_TABLE: &str = "_fdc_migrations";

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const POSTGRES_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create_fdc_tables",
    sql: include_str!("../../migrations/postgres/0001_create_fdc_tables.sql"),
}];

pub const SQLITE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create_fdc_tables",
    sql: include_str!("../../migrations/sqlite/0001_create_fdc_tables.sql"),
}];

/// Migrations not yet applied, in version order.
pub fn pending<'a>(migrations: &'a [Migration], applied: &HashSet<i64>) -> Vec<&'a Migration> {
    let mut out: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();
    out.sort_by_key(|m| m.version);
    out
}

/// Connect options for one short-lived Postgres connection.
pub fn pg_connect_options(database_url: &str) -> Result<PgConnectOptions, sqlx::Error> {
    let mut connect_options = PgConnectOptions::from_str(database_url)?;

    // Be explicit so a DSN asking for TLS never silently downgrades
    if database_url.contains("sslmode=require") {
        connect_options = connect_options.ssl_mode(PgSslMode::Require);
    }

    // PgBouncer txn mode safe
    Ok(connect_options.statement_cache_capacity(0))
}

pub fn sqlite_connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_skips_applied_and_sorts() {
        let migrations = [
            Migration {
                version: 3,
                description: "c",
                sql: "",
            },
            Migration {
                version: 1,
                description: "a",
                sql: "",
            },
            Migration {
                version: 2,
                description: "b",
                sql: "",
            },
        ];
        let applied: HashSet<i64> = [2].into_iter().collect();
        let versions: Vec<i64> = pending(&migrations, &applied)
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec![1, 3]);
    }

    #[test]
    fn embedded_schemas_define_all_tables() {
        for set in [POSTGRES_MIGRATIONS, SQLITE_MIGRATIONS] {
            let sql = set[0].sql;
            for table in ["food (", "nutrient (", "food_nutrient ("] {
                assert!(sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
            }
            assert!(sql.contains("UNIQUE (food_id, nutrient_id)"));
        }
    }

    #[test]
    fn rejects_garbage_dsn() {
        assert!(pg_connect_options("not a url").is_err());
        assert!(pg_connect_options("postgres://u:p@localhost:5432/usda?sslmode=require").is_ok());
    }
}
