use crate::api::filters::{CountField, Filters};
use crate::api::render::Tabular;
use crate::query::usage::AggregateRow;
use crate::query::{recent_cutoff, timestamp_param, Statement};
use chrono::NaiveDateTime;
use duckdb::types::Value;
use duckdb::Connection;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Column order for profile listings.
pub const PROFILE_COLUMNS: &[&str] = &[
    "email",
    "country",
    "organizationcountry",
    "flags",
    "topics",
    "registrationdate",
];

/// Column order for sign-up counts.
pub const NEW_USERS_COLUMNS: &[&str] = &["date", "count"];

/// Number of users sharing one value of a profile field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCount {
    pub field: CountField,
    pub value: String,
    pub count: u64,
}

/// Serialized as `{"<field>": value, "count": n}`.
impl Serialize for FieldCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.field.column_name(), &self.value)?;
        map.serialize_entry("count", &self.count)?;
        map.end()
    }
}

impl Tabular for FieldCount {
    fn cell(&self, column: &str) -> String {
        if column == "count" {
            self.count.to_string()
        } else if column == self.field.column_name() {
            self.value.clone()
        } else {
            String::new()
        }
    }
}

/// A user profile as exposed by the listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub email: String,
    pub country: Option<String>,
    pub organizationcountry: Option<String>,
    pub flags: Option<String>,
    pub topics: Option<String>,
    pub registrationdate: Option<String>,
}

impl Tabular for Profile {
    fn cell(&self, column: &str) -> String {
        match column {
            "email" => Some(self.email.clone()),
            "country" => self.country.clone(),
            "organizationcountry" => self.organizationcountry.clone(),
            "flags" => self.flags.clone(),
            "topics" => self.topics.clone(),
            "registrationdate" => self.registrationdate.clone(),
            _ => None,
        }
        .unwrap_or_default()
    }
}

const PROFILE_SELECT: &str = "SELECT email, country, organizationcountry, flags, topics,
        strftime(registrationdate, '%Y-%m-%dT%H:%M:%S') AS registered
 FROM usermanagement.users";

fn read_profile(row: &duckdb::Row<'_>) -> Result<Profile, duckdb::Error> {
    Ok(Profile {
        email: row.get(0)?,
        country: row.get(1)?,
        organizationcountry: row.get(2)?,
        flags: row.get(3)?,
        topics: row.get(4)?,
        registrationdate: row.get(5)?,
    })
}

/// Count users per distinct value of `field`.
///
/// Users with a null or empty value are left out of the result.
pub fn query_count_by_field(
    conn: &Connection,
    field: CountField,
) -> Result<Vec<FieldCount>, duckdb::Error> {
    let col = field.column_name();

    // Column name comes from a fixed enum
    let statement = Statement {
        sql: format!(
            "SELECT {col}, COUNT({col}) AS n
             FROM usermanagement.users
             GROUP BY {col}
             ORDER BY {col}"
        ),
        params: Vec::new(),
    };

    let rows = statement.fetch(conn, |row| {
        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, u64>(1)?))
    })?;

    Ok(rows
        .into_iter()
        .filter_map(|(value, count)| {
            value
                .filter(|v| !v.is_empty())
                .map(|value| FieldCount {
                    field,
                    value,
                    count,
                })
        })
        .collect())
}

/// Registrations per month within the recency window, oldest first.
pub fn query_new_users_by_month(
    conn: &Connection,
    now: NaiveDateTime,
    recent_months: u32,
) -> Result<Vec<AggregateRow>, duckdb::Error> {
    let statement = Statement {
        sql: "SELECT strftime(registrationdate, '%Y-%m') AS bucket, COUNT(registrationdate) AS n
              FROM usermanagement.users
              WHERE registrationdate > CAST(? AS TIMESTAMP)
              GROUP BY bucket
              ORDER BY bucket"
            .to_string(),
        params: vec![timestamp_param(recent_cutoff(now, recent_months))],
    };

    statement.fetch(conn, |row| {
        Ok(AggregateRow {
            date: row.get(0)?,
            count: row.get(1)?,
            ..AggregateRow::default()
        })
    })
}

/// List user profiles ordered by email.
///
/// `keywords` is a case-insensitive substring match over email, country and
/// organization country. `limit` and `offset` page through the result.
pub fn query_profiles(conn: &Connection, filters: &Filters) -> Result<Vec<Profile>, duckdb::Error> {
    let mut sql = PROFILE_SELECT.to_string();
    let mut params = Vec::new();

    if let Some(keywords) = &filters.keywords {
        sql.push_str(
            " WHERE (contains(lower(email), ?)
                 OR contains(lower(COALESCE(country, '')), ?)
                 OR contains(lower(COALESCE(organizationcountry, '')), ?))",
        );
        let needle = keywords.to_lowercase();
        for _ in 0..3 {
            params.push(Value::Text(needle.clone()));
        }
    }

    sql.push_str(" ORDER BY email");

    if let Some(limit) = filters.limit {
        sql.push_str(" LIMIT ?");
        params.push(Value::BigInt(i64::from(limit)));
    }
    if let Some(offset) = filters.offset {
        sql.push_str(" OFFSET ?");
        params.push(Value::BigInt(i64::from(offset)));
    }

    Statement { sql, params }.fetch(conn, read_profile)
}

/// Profiles registered within the recency window, newest first.
pub fn query_new_profiles(
    conn: &Connection,
    now: NaiveDateTime,
    recent_months: u32,
) -> Result<Vec<Profile>, duckdb::Error> {
    let statement = Statement {
        sql: format!(
            "{PROFILE_SELECT}
             WHERE registrationdate > CAST(? AS TIMESTAMP)
             ORDER BY registrationdate DESC, email"
        ),
        params: vec![timestamp_param(recent_cutoff(now, recent_months))],
    };
    statement.fetch(conn, read_profile)
}
