use crate::core::{ConnectionDescriptor, RowSet, Statement, Value};
use anyhow::{Context, Result};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use std::time::Duration;
use tokio_postgres::types::{Format, IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls, Row};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 5432;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

type BoxError = Box<dyn Error + Sync + Send>;

fn is_temporal(ty: &Type) -> bool {
    *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ || *ty == Type::DATE
}

// Rendered timestamps go to timestamp and date columns in the text format, so
// the server reads them with its own input rules whatever output layout was
// configured.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(v) if *ty == Type::INT8 => v.to_sql(ty, out),
            Value::Integer(v) if *ty == Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
            Value::Integer(v) if *ty == Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
            Value::Integer(v) if *ty == Type::FLOAT8 => (*v as f64).to_sql(ty, out),
            Value::Real(v) if *ty == Type::FLOAT8 => v.to_sql(ty, out),
            Value::Real(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            Value::Text(s) if is_temporal(ty) => {
                out.extend_from_slice(s.as_bytes());
                Ok(IsNull::No)
            }
            Value::Text(s) if <&str as ToSql>::accepts(ty) => s.as_str().to_sql(ty, out),
            other => Err(format!("cannot bind {other:?} to a {ty} column").into()),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    fn encode_format(&self, ty: &Type) -> Format {
        match self {
            Value::Text(_) if is_temporal(ty) => Format::Text,
            _ => Format::Binary,
        }
    }

    to_sql_checked!();
}

fn cell(row: &Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_();
    let value = if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(Value::Real)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Real(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Integer(v.into()))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Integer(v.into()))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| Value::Text(v.format(TIMESTAMP_FORMAT).to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Value::Text(v.to_rfc3339()))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)?
            .map(|v| Value::Text(v.to_string()))
    } else {
        row.try_get::<_, Option<String>>(idx)
            .with_context(|| format!("Unsupported column type {ty}"))?
            .map(Value::Text)
    };
    Ok(value.unwrap_or(Value::Null))
}

async fn query(client: &Client, statement: &Statement) -> Result<RowSet> {
    let prepared = client
        .prepare(&statement.sql)
        .await
        .with_context(|| format!("Failed to prepare statement: {}", statement.sql))?;

    let params: Vec<&(dyn ToSql + Sync)> = statement
        .params
        .iter()
        .map(|v| v as &(dyn ToSql + Sync))
        .collect();

    let rows = client
        .query(&prepared, &params)
        .await
        .with_context(|| format!("Statement failed: {}", statement.sql))?;

    let columns = prepared
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|idx| cell(row, idx)).collect())
        .collect::<Result<Vec<Vec<Value>>>>()?;

    Ok(RowSet { columns, rows })
}

/// Opens a connection, runs `statement` and waits for the connection to shut
/// down before returning, whatever the statement's outcome.
pub(super) async fn execute(
    descriptor: &ConnectionDescriptor,
    statement: &Statement,
) -> Result<RowSet> {
    let host = if descriptor.host.is_empty() {
        "localhost"
    } else {
        descriptor.host.as_str()
    };
    let port = if descriptor.port == 0 {
        DEFAULT_PORT
    } else {
        descriptor.port
    };

    let mut config = tokio_postgres::Config::new();
    config
        .host(host)
        .port(port)
        .user(&descriptor.user)
        .password(&descriptor.password)
        .dbname(&descriptor.database)
        .connect_timeout(CONNECT_TIMEOUT);

    debug!(host, port, database = %descriptor.database, "Opening postgres connection");
    let (client, connection) = config.connect(NoTls).await.with_context(|| {
        format!(
            "Failed to connect to postgres at {host}:{port}/{}",
            descriptor.database
        )
    })?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Postgres connection ended with error");
        }
    });

    let result = query(&client, statement).await;

    drop(client);
    if let Err(e) = driver.await {
        debug!(error = %e, "Postgres connection task failed");
    }
    debug!("Closed postgres connection");

    result
}
