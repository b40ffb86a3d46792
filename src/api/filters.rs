use crate::api::errors::ApiError;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::str::FromStr;

/// Raw query parameters as sent by the client.
///
/// The underscore-prefixed names of the legacy API are accepted as aliases.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FilterParams {
    pub collection: Option<String>,
    #[serde(alias = "_mindate")]
    pub mindate: Option<String>,
    #[serde(alias = "_maxdate")]
    pub maxdate: Option<String>,
    #[serde(alias = "_limit")]
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub keywords: Option<String>,
}

/// Validated filter set. `None` means "no constraint".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Filters {
    pub collection: Option<String>,
    pub mindate: Option<NaiveDateTime>,
    pub maxdate: Option<NaiveDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub keywords: Option<String>,
}

impl FilterParams {
    /// Validate the raw parameters into a [`Filters`] set.
    ///
    /// Empty values are treated as absent. Malformed dates or numbers are
    /// rejected with [`ApiError::InvalidFilter`] instead of reaching the store.
    pub fn resolve(&self) -> Result<Filters, ApiError> {
        let mindate = present(self.mindate.as_deref())
            .map(|v| parse_date("mindate", v))
            .transpose()?;
        let maxdate = present(self.maxdate.as_deref())
            .map(|v| parse_date("maxdate", v))
            .transpose()?;

        if let (Some(min), Some(max)) = (mindate, maxdate) {
            if min > max {
                return Err(ApiError::InvalidFilter(
                    "mindate must not be after maxdate".to_string(),
                ));
            }
        }

        let limit = present(self.limit.as_deref())
            .map(|v| match v.parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(ApiError::InvalidFilter(format!(
                    "limit must be a positive integer, got '{v}'"
                ))),
            })
            .transpose()?;

        let offset = present(self.offset.as_deref())
            .map(|v| {
                v.parse::<u32>().map_err(|_| {
                    ApiError::InvalidFilter(format!(
                        "offset must be a non-negative integer, got '{v}'"
                    ))
                })
            })
            .transpose()?;

        Ok(Filters {
            collection: present(self.collection.as_deref()).map(str::to_string),
            mindate,
            maxdate,
            limit,
            offset,
            keywords: present(self.keywords.as_deref()).map(str::to_string),
        })
    }
}

/// Extracts and validates the filters in one step, so a malformed query
/// string is answered with the same JSON error as a malformed value.
impl<S: Send + Sync> FromRequestParts<S> for Filters {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<FilterParams>::try_from_uri(&parts.uri)?;
        params.resolve()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a date filter. Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` and
/// `YYYY-MM-DD HH:MM:SS`.
fn parse_date(name: &str, value: &str) -> Result<NaiveDateTime, ApiError> {
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            ApiError::InvalidFilter(format!(
                "Invalid {name} '{value}'. Use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS."
            ))
        })
}

/// User profile fields that can be counted by distinct value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountField {
    Country,
    OrganizationCountry,
    Flags,
    Topics,
}

impl CountField {
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::OrganizationCountry => "organizationcountry",
            Self::Flags => "flags",
            Self::Topics => "topics",
        }
    }
}

impl FromStr for CountField {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "country" => Ok(Self::Country),
            "organizationcountry" => Ok(Self::OrganizationCountry),
            "flags" => Ok(Self::Flags),
            "topics" => Ok(Self::Topics),
            other => Err(ApiError::InvalidField(other.to_string())),
        }
    }
}
