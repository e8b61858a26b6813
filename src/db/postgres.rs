//! PostgreSQL store implementation.
//!
//! Provides `PostgresStore` and its transaction handle using sqlx.
//! Arguments arrive as strings; each statement is prepared first so the
//! server reports the type it inferred for every placeholder, and each
//! string is then encoded as that type before binding. Placeholder types
//! with no encoding here are rejected.

use crate::config::ConnectionConfig;
use crate::db::interval::{format_interval, parse_interval};
use crate::db::{ColumnInfo, QueryResult, Row, StatementStore, StoreTransaction, Value};
use crate::error::{DbExecError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::query::Query;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::{Column as SqlxColumn, Either, Executor, Postgres, Row as SqlxRow, Statement, TypeInfo};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// How long to wait for the single connection to become available.
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// PostgreSQL store backed by a single-connection pool.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to the database described by `config`.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(config.url())
            .await
            .map_err(|e| map_connection_error(e, config))?;

        debug!("Connected to {}", config.display_string());
        Ok(Self { pool })
    }

    /// Creates a store from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatementStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbExecError::transaction(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// An open PostgreSQL transaction. Dropping it without commit rolls back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

/// Placeholder and result-column types reported by the server for a statement.
struct Described {
    parameters: Vec<ParamType>,
    columns: Vec<ColumnInfo>,
}

impl PostgresTransaction {
    async fn describe(&mut self, sql: &str) -> Result<Described> {
        let statement = (&mut *self.tx)
            .prepare(sql)
            .await
            .map_err(|e| DbExecError::query(format_query_error(e)))?;

        let parameters = match statement.parameters() {
            Some(Either::Left(types)) => types.iter().map(ParamType::from_type_info).collect(),
            Some(Either::Right(count)) => vec![ParamType::Named("TEXT".to_string()); count],
            None => Vec::new(),
        };
        let columns = statement
            .columns()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
            .collect();

        Ok(Described {
            parameters,
            columns,
        })
    }

    async fn prepare_query<'q>(
        &mut self,
        sql: &'q str,
        args: &[String],
    ) -> Result<(Query<'q, Postgres, PgArguments>, Vec<ColumnInfo>)> {
        let described = self.describe(sql).await?;

        if described.parameters.len() != args.len() {
            return Err(DbExecError::query(format!(
                "statement expects {} parameter(s) but {} were bound",
                described.parameters.len(),
                args.len()
            )));
        }

        let mut query = sqlx::query(sql);
        for (index, (param_type, raw)) in described.parameters.iter().zip(args).enumerate() {
            let value = BindValue::parse(param_type, raw).map_err(|reason| {
                DbExecError::query(format!("cannot bind parameter ${}: {reason}", index + 1))
            })?;
            query = bind_value(query, value);
        }

        Ok((query, described.columns))
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn fetch(&mut self, sql: &str, args: &[String]) -> Result<QueryResult> {
        let start = Instant::now();
        let (query, columns) = self.prepare_query(sql, args).await?;

        let rows: Vec<PgRow> = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| DbExecError::query(format_query_error(e)))?;

        let rows: Vec<Row> = rows.iter().map(convert_row).collect();
        debug!("Fetched {} rows in {:?}", rows.len(), start.elapsed());

        Ok(QueryResult::with_data(columns, rows).with_execution_time(start.elapsed()))
    }

    async fn execute(&mut self, sql: &str, args: &[String]) -> Result<u64> {
        let (query, _) = self.prepare_query(sql, args).await?;

        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbExecError::query(format_query_error(e)))?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbExecError::transaction(format!("failed to commit transaction: {e}")))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbExecError::transaction(format!("failed to roll back transaction: {e}")))
    }
}

/// Fractional digits of `money` values; PostgreSQL uses 2 for nearly every locale.
const MONEY_FRAC_DIGITS: u32 = 2;

/// Type names whose binary wire form is their text form.
const TEXT_LIKE: &[&str] = &["TEXT", "VARCHAR", "CHAR", "NAME", "CITEXT", "UNKNOWN", "XML"];

/// The type the server inferred for a placeholder, as far as encoding cares.
#[derive(Debug, Clone, PartialEq)]
enum ParamType {
    /// A built-in or extension type, by upper-case name.
    Named(String),
    /// A user-defined enum; labels travel as text.
    Enum,
}

impl ParamType {
    // Types from a prepared statement are always resolved, so `kind()` cannot panic.
    fn from_type_info(type_info: &PgTypeInfo) -> Self {
        match type_info.kind() {
            PgTypeKind::Enum(_) => Self::Enum,
            PgTypeKind::Domain(base) => Self::from_type_info(base),
            _ => Self::Named(type_info.name().to_uppercase()),
        }
    }
}

/// A string argument encoded as the type the server inferred for its placeholder.
#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Text(String),
    Bool(bool),
    Char(i8),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Money(PgMoney),
    Oid(Oid),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(PgInterval),
    Inet(IpNetwork),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl BindValue {
    /// Parses `raw` as the given placeholder type.
    ///
    /// Text is only sent for types whose binary form is text. Other types
    /// without an encoding here are rejected.
    fn parse(param_type: &ParamType, raw: &str) -> std::result::Result<Self, String> {
        let type_name = match param_type {
            ParamType::Enum => return Ok(Self::Text(raw.to_string())),
            ParamType::Named(name) => name.as_str(),
        };
        let invalid = |expected: &str| format!("'{raw}' is not a valid {expected}");
        let trimmed = raw.trim();

        let value = match type_name {
            "BOOL" => Self::Bool(parse_bool(trimmed).ok_or_else(|| invalid("boolean"))?),
            "\"CHAR\"" => Self::Char(parse_char(raw).ok_or_else(|| invalid("single-byte \"char\""))?),
            "INT2" => Self::Int2(trimmed.parse().map_err(|_| invalid("smallint"))?),
            "INT4" => Self::Int4(trimmed.parse().map_err(|_| invalid("integer"))?),
            "INT8" => Self::Int8(trimmed.parse().map_err(|_| invalid("bigint"))?),
            "FLOAT4" => Self::Float4(trimmed.parse().map_err(|_| invalid("real"))?),
            "FLOAT8" => Self::Float8(trimmed.parse().map_err(|_| invalid("double precision"))?),
            "NUMERIC" => Self::Numeric(parse_decimal(trimmed).ok_or_else(|| invalid("numeric"))?),
            "MONEY" => Self::Money(parse_money(trimmed).ok_or_else(|| invalid("money amount"))?),
            "OID" => Self::Oid(Oid(trimmed.parse().map_err(|_| invalid("oid"))?)),
            "UUID" => Self::Uuid(Uuid::parse_str(trimmed).map_err(|_| invalid("uuid"))?),
            "DATE" => Self::Date(
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| invalid("date"))?,
            ),
            "TIME" => Self::Time(
                NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
                    .map_err(|_| invalid("time"))?,
            ),
            "TIMESTAMP" => {
                Self::Timestamp(parse_naive_timestamp(trimmed).ok_or_else(|| invalid("timestamp"))?)
            }
            "TIMESTAMPTZ" => {
                Self::TimestampTz(parse_timestamptz(trimmed).ok_or_else(|| invalid("timestamptz"))?)
            }
            "INTERVAL" => Self::Interval(parse_interval(trimmed).ok_or_else(|| invalid("interval"))?),
            "INET" | "CIDR" => Self::Inet(
                IpNetwork::from_str(trimmed).map_err(|_| invalid("network address"))?,
            ),
            // json shares the text wire format; jsonb carries a version byte
            "JSON" => {
                serde_json::from_str::<serde_json::Value>(raw)
                    .map_err(|e| format!("invalid JSON: {e}"))?;
                Self::Text(raw.to_string())
            }
            "JSONB" => {
                Self::Json(serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?)
            }
            "BYTEA" => Self::Bytes(parse_bytea(raw).ok_or_else(|| invalid("bytea hex string"))?),
            name if TEXT_LIKE.contains(&name) => Self::Text(raw.to_string()),
            name => {
                return Err(format!(
                    "unsupported parameter type {}",
                    name.to_lowercase()
                ))
            }
        };

        Ok(value)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// The internal `"char"` type holds exactly one byte.
fn parse_char(raw: &str) -> Option<i8> {
    match raw.as_bytes() {
        [b] if b.is_ascii() => i8::try_from(*b).ok(),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Accepts `1234.5`, `$1,234.50` and `-$3`. Values that do not fit the
/// 64-bit wire form are rejected instead of truncated.
fn parse_money(raw: &str) -> Option<PgMoney> {
    let (negative, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let digits: String = unsigned
        .strip_prefix('$')
        .unwrap_or(unsigned)
        .chars()
        .filter(|c| *c != ',')
        .collect();

    let mut amount = Decimal::from_str(&digits).ok()?;
    if amount.scale() > MONEY_FRAC_DIGITS || amount.is_sign_negative() {
        return None;
    }
    amount.rescale(MONEY_FRAC_DIGITS);
    let cents = i64::try_from(amount.mantissa()).ok()?;
    Some(PgMoney(if negative { -cents } else { cents }))
}

fn parse_naive_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Offsets are honoured; a timestamp without one is taken as UTC.
fn parse_timestamptz(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_naive_timestamp(raw).map(|naive| naive.and_utc()))
}

/// `\x`-prefixed hex is decoded; anything else is taken as raw bytes.
fn parse_bytea(raw: &str) -> Option<Vec<u8>> {
    let Some(hex) = raw.strip_prefix("\\x") else {
        return Some(raw.as_bytes().to_vec());
    };
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: BindValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        BindValue::Text(s) => query.bind(s),
        BindValue::Bool(b) => query.bind(b),
        BindValue::Char(c) => query.bind(c),
        BindValue::Int2(n) => query.bind(n),
        BindValue::Int4(n) => query.bind(n),
        BindValue::Int8(n) => query.bind(n),
        BindValue::Float4(f) => query.bind(f),
        BindValue::Float8(f) => query.bind(f),
        BindValue::Numeric(d) => query.bind(d),
        BindValue::Money(m) => query.bind(m),
        BindValue::Oid(o) => query.bind(o),
        BindValue::Uuid(u) => query.bind(u),
        BindValue::Date(d) => query.bind(d),
        BindValue::Time(t) => query.bind(t),
        BindValue::Timestamp(ts) => query.bind(ts),
        BindValue::TimestampTz(ts) => query.bind(ts),
        BindValue::Interval(i) => query.bind(i),
        BindValue::Inet(net) => query.bind(net),
        BindValue::Json(j) => query.bind(j),
        BindValue::Bytes(b) => query.bind(b),
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info()))
        .collect()
}

/// Decodes column `index` as `T`, mapping SQL NULL to `Value::Null` and
/// decode failures to `Value::Unsupported`.
fn decode<'r, T>(row: &'r PgRow, index: usize, type_name: &str, wrap: impl FnOnce(T) -> Value) -> Value
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Value::Null,
        Err(_) => Value::Unsupported(type_name.to_string()),
    }
}

/// Decodes a value whose binary form is its text, whatever its declared type.
fn decode_text(row: &PgRow, index: usize, type_name: &str) -> Value {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(Some(v)) => Value::String(v),
        Ok(None) => Value::Null,
        Err(_) => Value::Unsupported(type_name.to_string()),
    }
}

/// Decodes a one-dimensional array column element by element.
fn decode_array<T>(row: &PgRow, index: usize, type_name: &str, wrap: impl Fn(T) -> Value) -> Value
where
    T: for<'a> sqlx::Decode<'a, Postgres> + sqlx::Type<Postgres>,
{
    match row.try_get_unchecked::<Option<Vec<Option<T>>>, _>(index) {
        Ok(Some(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &wrap))
                .collect(),
        ),
        Ok(None) => Value::Null,
        Err(_) => Value::Unsupported(type_name.to_string()),
    }
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_info: &PgTypeInfo) -> Value {
    let type_name = type_info.name();
    match type_info.kind() {
        PgTypeKind::Enum(_) => return decode_text(row, index, type_name),
        PgTypeKind::Array(element) => return convert_array(row, index, type_name, element),
        _ => {}
    }

    match type_name.to_uppercase().as_str() {
        "BOOL" => decode::<bool>(row, index, type_name, Value::Bool),
        "\"CHAR\"" => decode::<i8>(row, index, type_name, |v| {
            Value::String(char::from(v as u8).to_string())
        }),
        "INT2" => decode::<i16>(row, index, type_name, |v| Value::Int(v as i64)),
        "INT4" => decode::<i32>(row, index, type_name, |v| Value::Int(v as i64)),
        "INT8" => decode::<i64>(row, index, type_name, Value::Int),
        "OID" => decode::<Oid>(row, index, type_name, |v| Value::Int(v.0 as i64)),
        "FLOAT4" => decode::<f32>(row, index, type_name, |v| Value::Float(v as f64)),
        "FLOAT8" => decode::<f64>(row, index, type_name, Value::Float),
        "NUMERIC" => decode::<Decimal>(row, index, type_name, Value::Decimal),
        "MONEY" => decode::<PgMoney>(row, index, type_name, |v| {
            Value::Decimal(v.to_decimal(MONEY_FRAC_DIGITS))
        }),
        "BYTEA" => decode::<Vec<u8>>(row, index, type_name, Value::Bytes),
        "UUID" => decode::<Uuid>(row, index, type_name, Value::Uuid),
        "DATE" => decode::<NaiveDate>(row, index, type_name, Value::Date),
        "TIME" => decode::<NaiveTime>(row, index, type_name, Value::Time),
        "TIMESTAMP" => decode::<NaiveDateTime>(row, index, type_name, Value::Timestamp),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, index, type_name, Value::TimestampTz),
        "INTERVAL" => decode::<PgInterval>(row, index, type_name, |v| {
            Value::String(format_interval(&v))
        }),
        "INET" | "CIDR" => decode::<IpNetwork>(row, index, type_name, |v| {
            Value::String(format_network(&v, type_name))
        }),
        "JSON" | "JSONB" => decode::<serde_json::Value>(row, index, type_name, Value::Json),
        name if TEXT_LIKE.contains(&name) => decode_text(row, index, type_name),
        _ => Value::Unsupported(type_name.to_string()),
    }
}

fn convert_array(row: &PgRow, index: usize, type_name: &str, element: &PgTypeInfo) -> Value {
    if matches!(element.kind(), PgTypeKind::Enum(_)) {
        return decode_array::<String>(row, index, type_name, Value::String);
    }

    match element.name().to_uppercase().as_str() {
        "BOOL" => decode_array::<bool>(row, index, type_name, Value::Bool),
        "INT2" => decode_array::<i16>(row, index, type_name, |v| Value::Int(v as i64)),
        "INT4" => decode_array::<i32>(row, index, type_name, |v| Value::Int(v as i64)),
        "INT8" => decode_array::<i64>(row, index, type_name, Value::Int),
        "FLOAT4" => decode_array::<f32>(row, index, type_name, |v| Value::Float(v as f64)),
        "FLOAT8" => decode_array::<f64>(row, index, type_name, Value::Float),
        "NUMERIC" => decode_array::<Decimal>(row, index, type_name, Value::Decimal),
        "UUID" => decode_array::<Uuid>(row, index, type_name, Value::Uuid),
        "DATE" => decode_array::<NaiveDate>(row, index, type_name, Value::Date),
        "TIMESTAMP" => decode_array::<NaiveDateTime>(row, index, type_name, Value::Timestamp),
        "TIMESTAMPTZ" => decode_array::<DateTime<Utc>>(row, index, type_name, Value::TimestampTz),
        "JSONB" => decode_array::<serde_json::Value>(row, index, type_name, Value::Json),
        name if TEXT_LIKE.contains(&name) => {
            decode_array::<String>(row, index, type_name, Value::String)
        }
        _ => Value::Unsupported(type_name.to_string()),
    }
}

/// `inet` host addresses render without their full-length prefix, as psql shows them.
fn format_network(network: &IpNetwork, type_name: &str) -> String {
    let host_prefix = if network.is_ipv4() { 32 } else { 128 };
    if type_name.eq_ignore_ascii_case("INET") && network.prefix() == host_prefix {
        network.ip().to_string()
    } else {
        network.to_string()
    }
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> DbExecError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        DbExecError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        DbExecError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        DbExecError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        DbExecError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        DbExecError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        DbExecError::connection(error.to_string())
    }
}

/// Formats a statement error with the server's detail and hint when present.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(constraint) = pg_error.constraint() {
            result.push_str("\n  CONSTRAINT: ");
            result.push_str(constraint);
        }
    }

    result
}
