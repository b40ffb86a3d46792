use crate::api::filters::Filters;
use crate::api::render::Tabular;
use crate::query::{recent_cutoff, timestamp_param, Statement};
use chrono::NaiveDateTime;
use duckdb::types::Value;
use duckdb::Connection;
use serde::Serialize;

/// Logged action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Download,
    Search,
    Insert,
}

impl Service {
    /// Value stored in the `service` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Search => "search",
            Self::Insert => "insert",
        }
    }

    /// Resolve the route segment naming a metric family.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "downloads" => Some(Self::Download),
            "search" => Some(Self::Search),
            "insert" => Some(Self::Insert),
            _ => None,
        }
    }

    /// Key the rows are wrapped under in the JSON envelope.
    pub const fn result_key(self) -> &'static str {
        match self {
            Self::Download => "downloads",
            Self::Search => "search",
            Self::Insert => "insert",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Download => "Downloads",
            Self::Search => "Search",
            Self::Insert => "Insert",
        }
    }
}

/// Aggregation shapes over the usage log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Rows per (month, collection), oldest month first.
    ByMonth,
    /// Same as `ByMonth`, restricted to the recency window.
    ByRecentMonth,
    /// Rows per (resourceid, collection), busiest first.
    ByProduct,
    /// Rows per (month, collection, resourceid), oldest month first.
    ByProductByMonth,
    /// Rows per user, busiest first.
    ByUser,
}

impl Shape {
    /// Resolve the sub-path following a metric family (`/downloads/<view>`).
    pub fn from_view(view: &str) -> Option<Self> {
        match view {
            "recent" => Some(Self::ByRecentMonth),
            "best" => Some(Self::ByProduct),
            "products" => Some(Self::ByProductByMonth),
            _ => None,
        }
    }

    /// Output columns, in order. Used as the CSV header.
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::ByMonth | Self::ByRecentMonth => &["date", "collection", "count"],
            Self::ByProduct => &["resourceid", "collection", "count"],
            Self::ByProductByMonth => &["date", "resourceid", "collection", "count"],
            Self::ByUser => &["userid", "count"],
        }
    }

    pub fn describe(self, service: Service) -> String {
        let label = service.label();
        match self {
            Self::ByMonth | Self::ByRecentMonth => {
                format!("{label} count by month by collection")
            }
            Self::ByProduct => format!("{label} count by product sort by count"),
            Self::ByProductByMonth => format!("{label} count by product by month"),
            Self::ByUser => format!("{label} count by user sort by count"),
        }
    }

    /// SELECT list, GROUP BY list and ORDER BY list for this shape.
    const fn clauses(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::ByMonth | Self::ByRecentMonth => (
                "strftime(querytime, '%Y-%m') AS bucket, collection",
                "bucket, collection",
                "bucket, collection",
            ),
            Self::ByProduct => (
                "resourceid, collection",
                "resourceid, collection",
                "n DESC, resourceid, collection",
            ),
            Self::ByProductByMonth => (
                "strftime(querytime, '%Y-%m') AS bucket, resourceid, collection",
                "bucket, collection, resourceid",
                "bucket, collection, resourceid",
            ),
            Self::ByUser => ("email AS userid", "email", "n DESC, userid"),
        }
    }

    const fn takes_limit(self) -> bool {
        matches!(self, Self::ByProduct | Self::ByUser)
    }

    fn read_row(self, row: &duckdb::Row<'_>) -> Result<AggregateRow, duckdb::Error> {
        Ok(match self {
            Self::ByMonth | Self::ByRecentMonth => AggregateRow {
                date: row.get(0)?,
                collection: row.get(1)?,
                count: row.get(2)?,
                ..AggregateRow::default()
            },
            Self::ByProduct => AggregateRow {
                resourceid: row.get(0)?,
                collection: row.get(1)?,
                count: row.get(2)?,
                ..AggregateRow::default()
            },
            Self::ByProductByMonth => AggregateRow {
                date: row.get(0)?,
                resourceid: row.get(1)?,
                collection: row.get(2)?,
                count: row.get(3)?,
                ..AggregateRow::default()
            },
            Self::ByUser => AggregateRow {
                userid: row.get(0)?,
                count: row.get(1)?,
                ..AggregateRow::default()
            },
        })
    }
}

/// One aggregate result row. Which keys are set depends on the shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resourceid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userid: Option<String>,
    pub count: u64,
}

impl Tabular for AggregateRow {
    fn cell(&self, column: &str) -> String {
        match column {
            "date" => self.date.clone(),
            "resourceid" => self.resourceid.clone(),
            "collection" => self.collection.clone(),
            "userid" => self.userid.clone(),
            "count" => Some(self.count.to_string()),
            _ => None,
        }
        .unwrap_or_default()
    }
}

/// A usage aggregation request: metric family, shape and filters.
#[derive(Debug, Clone, Copy)]
pub struct UsageQuery<'a> {
    pub service: Service,
    pub shape: Shape,
    pub filters: &'a Filters,
}

impl UsageQuery<'_> {
    /// Translate the request into a parametrized statement.
    ///
    /// `now` anchors the recency window of `ByRecentMonth`; explicit
    /// mindate/maxdate filters are ignored for that shape.
    pub fn build(&self, now: NaiveDateTime, recent_months: u32) -> Statement {
        let (select, group_by, order_by) = self.shape.clauses();

        let mut predicates = vec!["service = ?"];
        let mut params = vec![Value::Text(self.service.as_str().to_string())];

        // Default views exclude the cross-collection '*' pseudo-rows.
        if let Some(collection) = &self.filters.collection {
            predicates.push("collection = ?");
            params.push(Value::Text(collection.clone()));
        } else {
            predicates.push("collection <> '*'");
        }

        if self.shape == Shape::ByRecentMonth {
            predicates.push("querytime > CAST(? AS TIMESTAMP)");
            params.push(timestamp_param(recent_cutoff(now, recent_months)));
        } else {
            if let Some(min) = self.filters.mindate {
                predicates.push("querytime > CAST(? AS TIMESTAMP)");
                params.push(timestamp_param(min));
            }
            if let Some(max) = self.filters.maxdate {
                predicates.push("querytime < CAST(? AS TIMESTAMP)");
                params.push(timestamp_param(max));
            }
        }

        let mut sql = format!(
            "SELECT {select}, COUNT(*) AS n
             FROM usermanagement.history
             WHERE {}
             GROUP BY {group_by}
             ORDER BY {order_by}",
            predicates.join(" AND ")
        );

        if self.shape.takes_limit() {
            if let Some(limit) = self.filters.limit {
                sql.push_str(" LIMIT ?");
                params.push(Value::BigInt(i64::from(limit)));
            }
        }

        Statement { sql, params }
    }
}

/// Run a usage aggregation against the store.
pub fn query_usage(
    conn: &Connection,
    query: &UsageQuery<'_>,
    now: NaiveDateTime,
    recent_months: u32,
) -> Result<Vec<AggregateRow>, duckdb::Error> {
    let shape = query.shape;
    query
        .build(now, recent_months)
        .fetch(conn, |row| shape.read_row(row))
}
