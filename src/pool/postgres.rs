//! Postgres sessions over `tokio-postgres`.
//!
//! Sandbox sessions are opened with `default_transaction_read_only=on`, so
//! the server itself refuses writes even if a statement slips past the
//! lexical validator. A plain `SELECT set_config(...)` can still change
//! session settings, so every checkout starts with `DISCARD ALL` and then
//! re-applies the sandbox defaults. The attempt store opens its own
//! writable manager.

use super::{ResultSet, Session, SessionManager};
use crate::config::DatabaseConfig;
use crate::error::DbError;
use crate::outcome::{Column, Row};
use async_trait::async_trait;
use serde_json::{Number, Value as JsonValue};
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// Opens Postgres sessions from a [`DatabaseConfig`].
pub struct PgManager {
    config: tokio_postgres::Config,
    read_only: bool,
}

impl PgManager {
    /// Manager for sandboxed, read-only sessions.
    pub fn read_only(db: &DatabaseConfig) -> Self {
        PgManager::new(db, true)
    }

    /// Manager for sessions that may write (attempt persistence).
    pub fn read_write(db: &DatabaseConfig) -> Self {
        PgManager::new(db, false)
    }

    fn new(db: &DatabaseConfig, read_only: bool) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&db.host)
            .port(db.port)
            .dbname(&db.dbname)
            .user(&db.user)
            .application_name(&db.application_name)
            .connect_timeout(Duration::from_millis(db.connect_timeout_ms));
        if !db.password.is_empty() {
            config.password(&db.password);
        }
        if read_only {
            config.options("-c default_transaction_read_only=on");
        }
        PgManager { config, read_only }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[async_trait]
impl SessionManager for PgManager {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, DbError> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(DbError::from)?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "pg_connection_closed");
            }
        });
        Ok(PgSession {
            client,
            driver,
            read_only: self.read_only,
        })
    }
}

/// One Postgres connection plus the task driving its socket.
pub struct PgSession {
    client: Client,
    driver: JoinHandle<()>,
    read_only: bool,
}

impl PgSession {
    /// Direct access for parameterised statements outside the sandbox path.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Session for PgSession {
    async fn reset(&mut self, statement_timeout: Duration) -> Result<(), DbError> {
        // DISCARD ALL cannot run inside the implicit transaction of a batch
        self.client
            .batch_execute("DISCARD ALL")
            .await
            .map_err(DbError::from)?;
        self.client
            .batch_execute(&session_defaults_sql(self.read_only, statement_timeout))
            .await
            .map_err(DbError::from)
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        // Prepare first so column metadata is known even for empty results
        let statement = self.client.prepare(sql).await.map_err(DbError::from)?;
        let pg_columns = statement.columns();
        let pg_rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(DbError::from)?;

        let columns = pg_columns
            .iter()
            .map(|c| Column::new(c.name(), c.type_().name()))
            .collect();
        let rows = pg_rows
            .iter()
            .map(|row| {
                let mut out = Row::with_capacity(pg_columns.len());
                for (idx, column) in pg_columns.iter().enumerate() {
                    out.insert(column.name().to_string(), decode_value(row, idx, column.type_()));
                }
                out
            })
            .collect();
        Ok(ResultSet { columns, rows })
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }
}

fn session_defaults_sql(read_only: bool, statement_timeout: Duration) -> String {
    let mut sql = String::new();
    if read_only {
        sql.push_str("SET default_transaction_read_only = on; ");
    }
    let _ = write!(sql, "SET statement_timeout = {}", statement_timeout.as_millis());
    sql
}

fn decode_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> JsonValue {
    let decoded = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(|v| v.map(JsonValue::Bool)),
        Type::INT2 => get::<i16>(row, idx).map(|v| v.map(JsonValue::from)),
        Type::INT4 => get::<i32>(row, idx).map(|v| v.map(JsonValue::from)),
        Type::INT8 => get::<i64>(row, idx).map(|v| v.map(JsonValue::from)),
        Type::OID => get::<u32>(row, idx).map(|v| v.map(JsonValue::from)),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| v.map(|f| float(f64::from(f)))),
        Type::FLOAT8 => get::<f64>(row, idx).map(|v| v.map(float)),
        Type::NUMERIC => get::<PgNumeric>(row, idx).map(|v| v.map(|n| JsonValue::String(n.0))),
        Type::JSON | Type::JSONB => get::<JsonValue>(row, idx),
        Type::UUID => get::<uuid::Uuid>(row, idx).map(|v| v.map(|u| JsonValue::String(u.to_string()))),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_rfc3339()))),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_string()))),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)
            .map(|v| v.map(|d| JsonValue::String(d.to_string()))),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_string()))),
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(|v| v.map(|b| JsonValue::String(hex_bytes(&b)))),
        _ => get::<String>(row, idx).map(|v| v.map(JsonValue::String)),
    };
    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => JsonValue::Null,
        Err(e) => {
            debug!(column = idx, pg_type = %ty, error = %e, "pg_value_undecodable");
            JsonValue::Null
        }
    }
}

fn get<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> Result<Option<T>, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(idx)
}

/// NaN and infinities have no JSON number form; they become strings.
fn float(value: f64) -> JsonValue {
    Number::from_f64(value).map_or_else(|| JsonValue::String(value.to_string()), JsonValue::Number)
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// NUMERIC rendered as its exact decimal text.
///
/// Binary layout: ndigits, weight, sign, dscale (all 16-bit), followed by
/// `ndigits` base-10000 digits, most significant first. `weight` is the
/// power of 10000 of the first digit.
struct PgNumeric(String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(PgNumeric(decode_numeric(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn StdError + Sync + Send>> {
    let word = |at: usize| -> Option<u16> {
        raw.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    };
    let header = (word(0), word(2), word(4), word(6));
    let (Some(ndigits), Some(weight), Some(sign), Some(dscale)) = header else {
        return Err("numeric value too short".into());
    };
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let weight = i32::from(weight as i16);
    let dscale = usize::from(dscale);
    let mut digits = Vec::with_capacity(usize::from(ndigits));
    for i in 0..usize::from(ndigits) {
        digits.push(word(8 + i * 2).ok_or("numeric digits truncated")?);
    }
    let digit_at = |pos: i32| -> u16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                let _ = write!(out, "{}", digit_at(pos));
            } else {
                let _ = write!(out, "{:04}", digit_at(pos));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit_at(pos));
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}
