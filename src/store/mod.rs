mod postgres;
mod sqlite;

use crate::core::{ConnectionDescriptor, PersistedRow, RowSet, Statement, Store, StoreKind, Value};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_TABLE: &str = "bitcoin.bitcoinpriceindex";

/// Store client that opens one connection per statement.
///
/// The descriptor is fixed at construction and never re-read.
pub struct StoreClient {
    descriptor: ConnectionDescriptor,
    table: String,
}

impl StoreClient {
    pub fn new(descriptor: ConnectionDescriptor, table: &str) -> Result<Self> {
        validate_table(table)?;
        if descriptor.kind == StoreKind::Sqlite && descriptor.database.trim().is_empty() {
            bail!("SQLite account has no database path");
        }

        Ok(Self {
            descriptor,
            table: table.to_string(),
        })
    }

    /// `INSERT` with the timestamp and the three rates as bound parameters.
    pub fn insert_statement(&self, row: &PersistedRow) -> Statement {
        let placeholders = match self.descriptor.kind {
            StoreKind::Postgres => "$1, $2, $3, $4",
            StoreKind::Sqlite => "?1, ?2, ?3, ?4",
        };
        let [usd, eur, gbp] = row.rates();

        Statement::new(format!("INSERT INTO {} VALUES ({placeholders})", self.table))
            .bind(row.timestamp.as_str())
            .bind(usd)
            .bind(eur)
            .bind(gbp)
    }
}

#[async_trait]
impl Store for StoreClient {
    async fn execute(&self, statement: &Statement) -> Result<RowSet> {
        debug!(sql = %statement.sql, params = ?statement.params, "Executing statement");
        match self.descriptor.kind {
            StoreKind::Postgres => postgres::execute(&self.descriptor, statement).await,
            StoreKind::Sqlite => sqlite::execute(&self.descriptor, statement).await,
        }
    }

    async fn insert_row(&self, row: &PersistedRow) -> Result<()> {
        let statement = self.insert_statement(row);
        self.execute(&statement)
            .await
            .with_context(|| format!("Failed to insert row into {}", self.table))?;
        Ok(())
    }

    async fn last_timestamp(&self) -> Result<Option<String>> {
        let statement = Statement::new(format!("SELECT MAX(timestamp) FROM {}", self.table));
        let rows = self.execute(&statement).await?;
        Ok(rows
            .scalar()
            .filter(|value| **value != Value::Null)
            .map(Value::to_string))
    }
}

/// Table names are spliced into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
fn validate_table(table: &str) -> Result<()> {
    let is_identifier = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|part| is_identifier(part)) {
        bail!("Invalid table name: '{table}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_descriptor(path: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            kind: StoreKind::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: path.to_string(),
        }
    }

    fn row(timestamp: &str, usd: f64) -> PersistedRow {
        PersistedRow {
            timestamp: timestamp.to_string(),
            usd_rate: usd,
            eur_rate: 38500.55,
            gbp_rate: 33000.77,
        }
    }

    #[test]
    fn test_validate_table() {
        assert!(validate_table("bitcoinpriceindex").is_ok());
        assert!(validate_table("bitcoin.bitcoinpriceindex").is_ok());
        assert!(validate_table("_t1").is_ok());
        assert!(validate_table("").is_err());
        assert!(validate_table("1table").is_err());
        assert!(validate_table("a.b.c").is_err());
        assert!(validate_table("t; DROP TABLE t").is_err());
        assert!(validate_table("bitcoin.").is_err());
    }

    #[test]
    fn test_insert_statement_per_kind() {
        let mut descriptor = sqlite_descriptor("/tmp/x.db");
        let sqlite = StoreClient::new(descriptor.clone(), "prices").unwrap();
        let statement = sqlite.insert_statement(&row("2024-01-01 00:00:00", 42000.12));
        assert_eq!(statement.sql, "INSERT INTO prices VALUES (?1, ?2, ?3, ?4)");
        assert_eq!(
            statement.params,
            vec![
                Value::Text("2024-01-01 00:00:00".to_string()),
                Value::Real(42000.12),
                Value::Real(38500.55),
                Value::Real(33000.77),
            ]
        );

        descriptor.kind = StoreKind::Postgres;
        let postgres = StoreClient::new(descriptor, DEFAULT_TABLE).unwrap();
        let statement = postgres.insert_statement(&row("2024-01-01 00:00:00", 1.0));
        assert_eq!(
            statement.sql,
            "INSERT INTO bitcoin.bitcoinpriceindex VALUES ($1, $2, $3, $4)"
        );
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(StoreClient::new(sqlite_descriptor(""), "prices").is_err());
        assert!(StoreClient::new(sqlite_descriptor("/tmp/x.db"), "prices--").is_err());
    }

    #[tokio::test]
    async fn test_insert_rows_and_last_timestamp() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bpi.db");
        let client = StoreClient::new(sqlite_descriptor(&path.to_string_lossy()), "prices")?;

        client
            .execute(&Statement::new(
                "CREATE TABLE prices (timestamp TEXT, usd_rate REAL, eur_rate REAL, gbp_rate REAL)",
            ))
            .await?;
        assert_eq!(client.last_timestamp().await?, None);

        client.insert_row(&row("2024-01-01 00:00:00", 42000.12)).await?;
        client.insert_row(&row("2024-01-01 00:01:00", 42001.0)).await?;
        // No uniqueness constraint: the same timestamp may land twice.
        client.insert_row(&row("2024-01-01 00:01:00", 42001.0)).await?;

        let rows = client
            .execute(&Statement::new("SELECT COUNT(*) FROM prices"))
            .await?;
        assert_eq!(rows.scalar(), Some(&Value::Integer(3)));
        assert_eq!(
            client.last_timestamp().await?.as_deref(),
            Some("2024-01-01 00:01:00")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_without_table_is_persistence_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bpi.db");
        let client = StoreClient::new(sqlite_descriptor(&path.to_string_lossy()), "prices")?;

        let err = client
            .insert_row(&row("2024-01-01 00:00:00", 1.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to insert row into prices"));
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_port_is_persistence_error() {
        let descriptor = ConnectionDescriptor {
            kind: StoreKind::Postgres,
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "bitcoin_scripts_writer".to_string(),
            password: "secret".to_string(),
            database: "prod".to_string(),
        };
        let client = StoreClient::new(descriptor, DEFAULT_TABLE).unwrap();

        let result = client.insert_row(&row("2024-01-01 00:00:00", 1.0)).await;
        assert!(result.is_err());
    }
}
