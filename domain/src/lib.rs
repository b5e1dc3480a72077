//! Domain library for the job board data-access layer.
//!
//! Holds the record/value types, repository ports (traits), error definitions
//! and the schema-driven machinery shared by every backend: the schema
//! registry, field coercion, the query composer, the in-memory store and the
//! backend facade. Keep SQL and HTTP concerns out of this crate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::query::SortSpec;

/// A single typed column value as stored by either backend.
///
/// Booleans are persisted as `Int(0)` / `Int(1)`; dates travel as ISO-like
/// strings and are never parsed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Non-zero numbers are true; everything else is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            _ => false,
        }
    }

    /// Textual rendering used for substring search. `None` for null.
    pub fn search_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) | Value::Date(s) => Some(s.clone()),
        }
    }

    /// Total ordering matching SQLite's: NULL < numbers < text.
    pub fn cmp_sql(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Int(_) | Value::Float(_) => 1,
                Value::Text(_) | Value::Date(_) => 2,
            }
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = self.as_f64().unwrap_or_default();
                let b = other.as_f64().unwrap_or_default();
                a.total_cmp(&b)
            }
            (Value::Text(a) | Value::Date(a), Value::Text(b) | Value::Date(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// A stored row: column name to value.
pub type Record = BTreeMap<String, Value>;

/// Untrusted field -> value body received from a caller.
pub type Payload = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Pagination, search and sort parameters for list queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub sort: Option<String>,
}

impl PageRequest {
    /// Clamp raw page/limit values: page >= 1, limit in 1..=100.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32;
        let limit = limit
            .unwrap_or(i64::from(DEFAULT_PAGE_LIMIT))
            .clamp(1, i64::from(MAX_PAGE_LIMIT)) as u32;
        Self {
            page,
            limit,
            search: None,
            sort: None,
        }
    }

    pub fn with_search<S: Into<String>>(mut self, search: S) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_sort<S: Into<String>>(mut self, sort: S) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Paginated list result.
#[derive(Clone, Debug)]
pub struct ListResult {
    pub items: Vec<Record>,
    /// Rows matching the search before pagination.
    pub total: usize,
    pub has_more: bool,
    /// The sort that was actually applied (after allow-listing).
    pub sort: SortSpec,
}

/// Generic CRUD port over registered entities. Implemented by the structured
/// (SQLite) repository, the mock repository and the backend facade.
#[async_trait]
pub trait CrudRepository: Send + Sync {
    async fn list(&self, entity: &str, request: &PageRequest) -> Result<ListResult, CoreError>;
    async fn find_by_id(&self, entity: &str, id: i64) -> Result<Option<Record>, CoreError>;
    /// Create a record; an empty resolved payload is a validation error.
    async fn create(&self, entity: &str, payload: &Payload) -> Result<Record, CoreError>;
    /// Partial update. `Ok(None)` when no record has this id; an empty
    /// resolved payload returns the current record untouched.
    async fn update(&self, entity: &str, id: i64, payload: &Payload)
        -> Result<Option<Record>, CoreError>;
    /// Whether a record existed and was deleted.
    async fn remove(&self, entity: &str, id: i64) -> Result<bool, CoreError>;
    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Relational-style reads and guarded writes the job board needs on top of
/// generic CRUD.
#[async_trait]
pub trait JobBoardRepository: Send + Sync {
    /// Active jobs with `company_name` resolved, newest first.
    async fn list_open_jobs(&self, search: Option<&str>) -> Result<Vec<Record>, CoreError>;
    /// Applications of one candidate counted per status.
    async fn application_status_counts(&self, user_id: i64)
        -> Result<BTreeMap<String, i64>, CoreError>;
    /// Applications to a company's jobs with `job_title`, `first_name` and
    /// `last_name` resolved.
    async fn list_company_applications(&self, company_id: i64)
        -> Result<Vec<Record>, CoreError>;
    /// Change an application's status after checking it belongs to one of
    /// the company's jobs.
    async fn set_application_status(
        &self,
        application_id: i64,
        company_id: i64,
        status: &str,
    ) -> Result<Record, CoreError>;
    /// Case-insensitive lookup by name, creating the company when missing.
    /// Not transactional: concurrent callers may both create.
    async fn find_or_create_company(&self, name: &str) -> Result<Record, CoreError>;
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// One or more field-labeled input problems, reported together.
    #[error("{}", .0.join("\n"))]
    Validation(Vec<String>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The structured backend cannot be reached. Consumed by the facade.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        CoreError::Validation(vec![message.into()])
    }
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} - job board data layer", pkg, ver)
}

pub mod adapters;
pub mod backend;
pub mod catalog;
pub mod coerce;
pub mod handlers;
pub mod query;
pub mod schema;
