use crate::core::{ConnectionDescriptor, RowSet, Statement, Value};
use anyhow::{Context, Result};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use tracing::debug;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn cell(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(format!("<{} byte blob>", b.len())),
    }
}

fn query(conn: &Connection, statement: &Statement) -> Result<RowSet> {
    let mut prepared = conn
        .prepare(&statement.sql)
        .with_context(|| format!("Failed to prepare statement: {}", statement.sql))?;
    let columns: Vec<String> = prepared
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut rows = prepared
        .query(params_from_iter(statement.params.iter()))
        .with_context(|| format!("Statement failed: {}", statement.sql))?;

    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .with_context(|| format!("Statement failed: {}", statement.sql))?
    {
        let cells = (0..columns.len())
            .map(|idx| row.get_ref(idx).map(cell))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(cells);
    }

    Ok(RowSet { columns, rows: out })
}

fn execute_blocking(path: &str, statement: &Statement) -> Result<RowSet> {
    debug!(path, "Opening sqlite connection");
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open sqlite database {path}"))?;

    let result = query(&conn, statement);
    let closed = conn
        .close()
        .map_err(|(_, e)| e)
        .context("Failed to close sqlite connection");
    debug!(path, "Closed sqlite connection");

    let rows = result?;
    closed?;
    Ok(rows)
}

/// `descriptor.database` is the database file. The connection lives on the
/// blocking pool for the duration of the one statement.
pub(super) async fn execute(
    descriptor: &ConnectionDescriptor,
    statement: &Statement,
) -> Result<RowSet> {
    let path = descriptor.database.clone();
    let statement = statement.clone();
    tokio::task::spawn_blocking(move || execute_blocking(&path, &statement))
        .await
        .context("SQLite worker panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StoreKind;
    use tempfile::TempDir;

    fn descriptor(dir: &TempDir) -> ConnectionDescriptor {
        ConnectionDescriptor {
            kind: StoreKind::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: dir.path().join("bpi.db").to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn test_execute_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let descriptor = descriptor(&dir);

        execute(
            &descriptor,
            &Statement::new("CREATE TABLE prices (timestamp TEXT, usd_rate REAL, note TEXT)"),
        )
        .await?;
        let inserted = execute(
            &descriptor,
            &Statement::new("INSERT INTO prices VALUES (?1, ?2, ?3)")
                .bind("2024-01-01 00:00:00")
                .bind(42000.12)
                .bind(Value::Null),
        )
        .await?;
        assert!(inserted.is_empty());

        let rows = execute(&descriptor, &Statement::new("SELECT * FROM prices")).await?;
        assert_eq!(rows.columns, vec!["timestamp", "usd_rate", "note"]);
        assert_eq!(
            rows.rows,
            vec![vec![
                Value::Text("2024-01-01 00:00:00".to_string()),
                Value::Real(42000.12),
                Value::Null,
            ]]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_quotes_in_values_are_data() -> Result<()> {
        let dir = TempDir::new()?;
        let descriptor = descriptor(&dir);
        execute(&descriptor, &Statement::new("CREATE TABLE t (v TEXT)")).await?;

        let hostile = "x'); DROP TABLE t; --";
        execute(&descriptor, &Statement::new("INSERT INTO t VALUES (?1)").bind(hostile)).await?;

        let rows = execute(&descriptor, &Statement::new("SELECT v FROM t")).await?;
        assert_eq!(rows.scalar().and_then(Value::as_text), Some(hostile));
        Ok(())
    }

    #[tokio::test]
    async fn test_statement_error_is_reported() -> Result<()> {
        let dir = TempDir::new()?;
        let descriptor = descriptor(&dir);

        let err = execute(&descriptor, &Statement::new("INSERT INTO missing VALUES (1)"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("missing"));

        execute(&descriptor, &Statement::new("CREATE TABLE t (v REAL)")).await?;
        let wrong_arity = execute(
            &descriptor,
            &Statement::new("INSERT INTO t VALUES (?1)").bind(1.0).bind(2.0),
        )
        .await;
        assert!(wrong_arity.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_unopenable_path_is_error() {
        let mut bad = descriptor(&TempDir::new().unwrap());
        bad.database = "/nonexistent-dir/for/sure/bpi.db".to_string();

        assert!(execute(&bad, &Statement::new("SELECT 1")).await.is_err());
    }
}
