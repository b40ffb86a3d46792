pub mod countries;
pub mod ranking;
pub mod usage;
pub mod users;

use chrono::{Months, NaiveDateTime};
use duckdb::types::Value;
use duckdb::Connection;

/// Timestamp layout used for every bound timestamp parameter.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A parametrized SQL statement: fixed text plus bound values.
///
/// Filter values only ever travel through `params`; `sql` is assembled from
/// constant fragments and enum-derived column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// Prepare and run the statement, mapping every row with `f`.
    pub fn fetch<T, F>(&self, conn: &Connection, f: F) -> Result<Vec<T>, duckdb::Error>
    where
        F: FnMut(&duckdb::Row<'_>) -> Result<T, duckdb::Error>,
    {
        let mut stmt = conn.prepare(&self.sql)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(self.params.clone()), f)?
            .collect::<Result<Vec<T>, _>>()?;
        Ok(rows)
    }
}

/// Bind a timestamp as text; the SQL side wraps it in `CAST(? AS TIMESTAMP)`.
fn timestamp_param(ts: NaiveDateTime) -> Value {
    Value::Text(ts.format(TIMESTAMP_FORMAT).to_string())
}

/// Start of the recency window: `now` minus `months` calendar months.
pub fn recent_cutoff(now: NaiveDateTime, months: u32) -> NaiveDateTime {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDateTime::MIN)
}
