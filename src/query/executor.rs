//! Per-frame statement execution against a session's MySQL connection.
//!
//! Statements are classified by their leading keyword: row-producing
//! statements are fetched and serialized column-by-column into JSON with SQL
//! `NULL` preserved as JSON `null`; everything else is executed for its
//! affected-row count. No transaction or isolation behavior is layered on
//! top of the connection's defaults.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, MySqlConnection, Row, TypeInfo, ValueRef};

use crate::error::Result;
use crate::protocol::QueryOutcome;

/// Execute one textual statement against the connection.
pub async fn run_statement(conn: &mut MySqlConnection, sql: &str) -> Result<QueryOutcome> {
    if yields_rows(sql) {
        let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;
        let columns = rows.first().map_or_else(Vec::new, |row| {
            row.columns().iter().map(|c| c.name().to_string()).collect()
        });
        let rows = rows
            .iter()
            .map(row_values)
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryOutcome::Rows { columns, rows })
    } else {
        let done = sqlx::query(sql).execute(&mut *conn).await?;
        Ok(QueryOutcome::Affected {
            affected_rows: done.rows_affected(),
        })
    }
}

/// Whether the statement's leading keyword produces a row set.
fn yields_rows(sql: &str) -> bool {
    let trimmed = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    let keyword: String = trimmed
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "WITH" | "TABLE" | "VALUES"
    )
}

/// Serialize one row in column order.
fn row_values(row: &MySqlRow) -> Result<Vec<Value>> {
    (0..row.columns().len())
        .map(|index| decode_value(row, index))
        .collect()
}

/// Decode one column into JSON.
///
/// The type-name match covers the common MySQL column types; anything else
/// falls back to text, then to base64 for binary payloads, so arbitrary
/// result sets survive the trip into JSON.
fn decode_value(row: &MySqlRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    drop(raw);

    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::from(row.try_get::<i64, _>(index)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => Value::from(row.try_get::<u64, _>(index)?),
        "FLOAT" => Value::from(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => Value::from(row.try_get::<f64, _>(index)?),
        "DECIMAL" => Value::String(row.try_get::<rust_decimal::Decimal, _>(index)?.to_string()),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "DATETIME" => Value::String(row.try_get::<NaiveDateTime, _>(index)?.to_string()),
        "TIMESTAMP" => Value::String(row.try_get::<DateTime<Utc>, _>(index)?.to_string()),
        "JSON" => row.try_get::<Value, _>(index)?,
        _ => match row.try_get::<String, _>(index) {
            Ok(text) => Value::String(text),
            Err(_) => Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(index)?)),
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_producing_keywords() {
        assert!(yields_rows("SELECT 1"));
        assert!(yields_rows("  select * from t"));
        assert!(yields_rows("(SELECT 1) UNION (SELECT 2)"));
        assert!(yields_rows("SHOW TABLES"));
        assert!(yields_rows("DESCRIBE users"));
        assert!(yields_rows("desc users"));
        assert!(yields_rows("EXPLAIN SELECT 1"));
        assert!(yields_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
    }

    #[test]
    fn update_like_keywords() {
        assert!(!yields_rows("UPDATE t SET a = 1"));
        assert!(!yields_rows("insert into t values (1)"));
        assert!(!yields_rows("DELETE FROM t"));
        assert!(!yields_rows("CREATE TABLE t (a INT)"));
        assert!(!yields_rows("SET @x = 1"));
        assert!(!yields_rows(""));
    }
}
