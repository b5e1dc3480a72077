//! sqlite-adapter — SQLite implementation of the job board repository ports.
//!
//! Purpose
//! - Serve the generic CRUD contract (`CrudRepository`) and the job board
//!   reads (`JobBoardRepository`) from a file-based database.
//! - Render the domain's list plans and mutations as parameterized SQL.
//!   Column and table names only ever come from the schema registry; user
//!   text is always bound.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Registers `unicode_lower(x)` so searches fold case the same way the
//!   in-memory backend does (SQLite's `lower()` is ASCII-only).
//! - Dates are stored as the ISO-like text callers send; booleans as 0/1.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::catalog::{self, APPLICATIONS, COMPANIES, JOBS, OPEN_JOB_SEARCH, USERS};
use domain::coerce::duplicate_message;
use domain::query::{build_mutation, plan_list, MutationMode, SearchPredicate};
use domain::schema::{Schema, SchemaRegistry};
use domain::{
    CoreError, CrudRepository, JobBoardRepository, ListResult, PageRequest, Payload, Record, Value,
};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info, warn};

/// SQLite-backed structured repository.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
    registry: Arc<SchemaRegistry>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P, registry: Arc<SchemaRegistry>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(map_sqerr)?;
        register_functions(&conn).map_err(map_sqerr)?;
        init_schema(&conn)?;
        info!(path = %path.display(), "sqlite database ready");
        Ok(Self {
            conn: Mutex::new(conn),
            registry,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, CoreError>) -> Result<T, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Internal("sqlite mutex poisoned".into()))?;
        f(&conn)
    }
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Null | ValueRef::Blob(_) => None,
                ValueRef::Integer(i) => Some(i.to_string()),
                ValueRef::Real(f) => Some(f.to_string()),
                ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).to_lowercase()),
            })
        },
    )
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    // Relations are plain id columns resolved at read time, as in the
    // in-memory store; nothing is enforced on write or delete.
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = OFF;
        CREATE TABLE IF NOT EXISTS companies (
            company_id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_name TEXT NOT NULL,
            industry TEXT,
            city TEXT,
            website TEXT,
            contact_email TEXT,
            description TEXT
        );
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            role TEXT NOT NULL,
            company_id NUMERIC,
            password_hash TEXT
        );
        CREATE TABLE IF NOT EXISTS jobs (
            job_id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            company_id NUMERIC NOT NULL,
            location TEXT,
            contract_type TEXT,
            salary NUMERIC,
            working_time TEXT,
            description TEXT,
            is_active INTEGER,
            posted_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
        CREATE TABLE IF NOT EXISTS applications (
            application_id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id NUMERIC NOT NULL,
            user_id NUMERIC NOT NULL,
            status TEXT NOT NULL,
            message TEXT,
            applied_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_applications_job ON applications(job_id);
        CREATE INDEX IF NOT EXISTS idx_applications_user ON applications(user_id);
        "#,
    )
    .map_err(map_sqerr)
}

/// Connectivity and file-level failures mean the database is unusable and
/// the facade should fall back; constraint failures are caller errors.
fn map_sqerr(e: rusqlite::Error) -> CoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::DatabaseCorrupt => CoreError::BackendUnavailable(format!("sqlite error: {e}")),
            ErrorCode::ConstraintViolation => {
                warn!(err = %e, "sqlite constraint violation");
                CoreError::validation("Contrainte d'intégrité non respectée")
            }
            _ => CoreError::Internal(format!("sqlite error: {e}")),
        },
        _ => CoreError::Internal(format!("sqlite error: {e}")),
    }
}

/// Like `map_sqerr`, naming the field when a unique column is duplicated.
/// SQLite reports these as `UNIQUE constraint failed: <table>.<column>`.
fn write_error(schema: &Schema, e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(err, Some(message)) = &e {
        if err.code == ErrorCode::ConstraintViolation && message.starts_with("UNIQUE constraint failed") {
            let messages: Vec<String> = schema
                .unique_fields()
                .filter(|f| {
                    message
                        .split([':', ','])
                        .any(|part| part.trim() == format!("{}.{}", schema.table(), f.name))
                })
                .map(duplicate_message)
                .collect();
            if !messages.is_empty() {
                return CoreError::Validation(messages);
            }
        }
    }
    map_sqerr(e)
}

/// An output column: its record key and whether its text is a date.
type OutColumn = (&'static str, bool);

fn out_columns(schema: &Schema) -> Vec<OutColumn> {
    schema
        .selectable_columns()
        .into_iter()
        .map(|c| (c, schema.field(c).is_some_and(|f| f.field_type.is_temporal())))
        .collect()
}

fn quoted(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn select_list(alias: &str, columns: &[OutColumn]) -> String {
    columns
        .iter()
        .map(|(c, _)| format!("{alias}.{}", quoted(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_domain(value: ValueRef<'_>, temporal: bool) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let s = String::from_utf8_lossy(bytes).into_owned();
            if temporal {
                Value::Date(s)
            } else {
                Value::Text(s)
            }
        }
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) | Value::Date(s) => SqlValue::Text(s.clone()),
    }
}

fn read_row(row: &Row<'_>, columns: &[OutColumn]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, (name, temporal)) in columns.iter().enumerate() {
        record.insert(name.to_string(), to_domain(row.get_ref(i)?, *temporal));
    }
    Ok(record)
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    columns: &[OutColumn],
) -> Result<Vec<Record>, CoreError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqerr)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| read_row(row, columns))
        .map_err(map_sqerr)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(map_sqerr)
}

/// `(unicode_lower(a) LIKE ?n ESCAPE '\' OR ...)` with the pattern pushed
/// onto `params`.
fn search_clause(alias: &str, search: &SearchPredicate, params: &mut Vec<SqlValue>) -> String {
    params.push(SqlValue::Text(search.like_pattern()));
    let slot = params.len();
    let ors: Vec<String> = search
        .columns()
        .iter()
        .map(|c| format!("unicode_lower({alias}.{}) LIKE ?{slot} ESCAPE '\\'", quoted(c)))
        .collect();
    format!("({})", ors.join(" OR "))
}

fn select_by_id(conn: &Connection, schema: &Schema, id: i64) -> Result<Option<Record>, CoreError> {
    let columns = out_columns(schema);
    let sql = format!(
        "SELECT {} FROM {} AS t WHERE t.{} = ?1",
        select_list("t", &columns),
        quoted(schema.table()),
        quoted(schema.primary_key()),
    );
    conn.query_row(&sql, params![id], |row| read_row(row, &columns))
        .optional()
        .map_err(map_sqerr)
}

fn insert_row(conn: &Connection, schema: &Schema, values: &[(&'static str, Value)]) -> Result<Record, CoreError> {
    let names: Vec<String> = values.iter().map(|(c, _)| quoted(c)).collect();
    let slots: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(schema.table()),
        names.join(", "),
        slots.join(", "),
    );
    let params: Vec<SqlValue> = values.iter().map(|(_, v)| to_sql(v)).collect();
    conn.execute(&sql, params_from_iter(params.iter()))
        .map_err(|e| write_error(schema, e))?;
    let id = conn.last_insert_rowid();
    select_by_id(conn, schema, id)?
        .ok_or_else(|| CoreError::Internal(format!("row {id} vanished after insert")))
}

fn update_row(
    conn: &Connection,
    schema: &Schema,
    id: i64,
    values: &[(&'static str, Value)],
) -> Result<Option<Record>, CoreError> {
    let sets: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{} = ?{}", quoted(c), i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quoted(schema.table()),
        sets.join(", "),
        quoted(schema.primary_key()),
        values.len() + 1,
    );
    let mut params: Vec<SqlValue> = values.iter().map(|(_, v)| to_sql(v)).collect();
    params.push(SqlValue::Integer(id));
    let changed = conn
        .execute(&sql, params_from_iter(params.iter()))
        .map_err(|e| write_error(schema, e))?;
    if changed == 0 {
        return Ok(None);
    }
    select_by_id(conn, schema, id)
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl CrudRepository for SqliteRepo {
    async fn list(&self, entity: &str, request: &PageRequest) -> Result<ListResult, CoreError> {
        let schema = self.registry.require(entity)?;
        let plan = plan_list(schema, request);
        let columns = out_columns(schema);

        let mut params = Vec::new();
        let where_sql = plan
            .search
            .as_ref()
            .map(|s| format!(" WHERE {}", search_clause("t", s, &mut params)))
            .unwrap_or_default();
        let order_sql = plan
            .order
            .keys()
            .iter()
            .map(|k| format!("t.{} {}", quoted(k.column()), k.direction().as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let count_sql = format!("SELECT COUNT(*) FROM {} AS t{}", quoted(schema.table()), where_sql);
        let select_sql = format!(
            "SELECT {} FROM {} AS t{} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            select_list("t", &columns),
            quoted(schema.table()),
            where_sql,
            order_sql,
            params.len() + 1,
            params.len() + 2,
        );

        let (total, items) = self.with_conn(|conn| {
            let total: i64 = conn
                .query_row(&count_sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(map_sqerr)?;
            let mut page_params = params.clone();
            page_params.push(SqlValue::Integer(clamp_i64(plan.limit)));
            page_params.push(SqlValue::Integer(clamp_i64(plan.offset)));
            let items = query_records(conn, &select_sql, &page_params, &columns)?;
            Ok((total, items))
        })?;

        let total = usize::try_from(total).unwrap_or_default();
        let seen = usize::try_from(plan.offset)
            .unwrap_or(usize::MAX)
            .saturating_add(items.len());
        debug!(entity, total, returned = items.len(), "sqlite list");
        Ok(ListResult {
            items,
            total,
            has_more: seen < total,
            sort: plan.sort,
        })
    }

    async fn find_by_id(&self, entity: &str, id: i64) -> Result<Option<Record>, CoreError> {
        let schema = self.registry.require(entity)?;
        self.with_conn(|conn| select_by_id(conn, schema, id))
    }

    async fn create(&self, entity: &str, payload: &Payload) -> Result<Record, CoreError> {
        let schema = self.registry.require(entity)?;
        let mutation = build_mutation(schema, payload, MutationMode::Create).await?;
        if mutation.is_empty() {
            return Err(CoreError::validation("Aucune donnée fournie"));
        }
        let row = self.with_conn(|conn| insert_row(conn, schema, mutation.assignments()))?;
        debug!(entity, id = ?row.get(schema.primary_key()), "sqlite create");
        Ok(row)
    }

    async fn update(
        &self,
        entity: &str,
        id: i64,
        payload: &Payload,
    ) -> Result<Option<Record>, CoreError> {
        let schema = self.registry.require(entity)?;
        let mutation = build_mutation(schema, payload, MutationMode::Update).await?;
        self.with_conn(|conn| {
            if mutation.is_empty() {
                select_by_id(conn, schema, id)
            } else {
                update_row(conn, schema, id, mutation.assignments())
            }
        })
    }

    async fn remove(&self, entity: &str, id: i64) -> Result<bool, CoreError> {
        let schema = self.registry.require(entity)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quoted(schema.table()),
            quoted(schema.primary_key()),
        );
        let changed = self.with_conn(|conn| conn.execute(&sql, params![id]).map_err(map_sqerr))?;
        Ok(changed > 0)
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(map_sqerr)
        })
    }
}

#[async_trait]
impl JobBoardRepository for SqliteRepo {
    async fn list_open_jobs(&self, search: Option<&str>) -> Result<Vec<Record>, CoreError> {
        let jobs = self.registry.require(JOBS)?;
        let companies = self.registry.require(COMPANIES)?;
        let mut columns = out_columns(jobs);
        let mut sql = format!(
            "SELECT {}, c.company_name FROM {} AS j LEFT JOIN {} AS c ON c.company_id = j.company_id \
             WHERE j.is_active = 1",
            select_list("j", &columns),
            quoted(jobs.table()),
            quoted(companies.table()),
        );
        columns.push(("company_name", false));

        let mut params = Vec::new();
        if let Some(predicate) = search.and_then(|s| SearchPredicate::over(s, OPEN_JOB_SEARCH)) {
            sql.push_str(" AND ");
            sql.push_str(&search_clause("j", &predicate, &mut params));
        }
        sql.push_str(" ORDER BY j.posted_at DESC, j.job_id DESC");

        self.with_conn(|conn| query_records(conn, &sql, &params, &columns))
    }

    async fn application_status_counts(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<String, i64>, CoreError> {
        let applications = self.registry.require(APPLICATIONS)?;
        let sql = format!(
            "SELECT status, COUNT(*) FROM {} WHERE user_id = ?1 AND status IS NOT NULL GROUP BY status",
            quoted(applications.table()),
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
            let rows = stmt
                .query_map(params![user_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(map_sqerr)?;
            rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(map_sqerr)
        })
    }

    async fn list_company_applications(&self, company_id: i64) -> Result<Vec<Record>, CoreError> {
        let applications = self.registry.require(APPLICATIONS)?;
        let jobs = self.registry.require(JOBS)?;
        let users = self.registry.require(USERS)?;
        let mut columns = out_columns(applications);
        let sql = format!(
            "SELECT {}, j.title, u.first_name, u.last_name FROM {} AS a \
             JOIN {} AS j ON j.job_id = a.job_id \
             LEFT JOIN {} AS u ON u.user_id = a.user_id \
             WHERE j.company_id = ?1 ORDER BY a.applied_at DESC, a.application_id DESC",
            select_list("a", &columns),
            quoted(applications.table()),
            quoted(jobs.table()),
            quoted(users.table()),
        );
        columns.extend([("job_title", false), ("first_name", false), ("last_name", false)]);
        self.with_conn(|conn| query_records(conn, &sql, &[SqlValue::Integer(company_id)], &columns))
    }

    async fn set_application_status(
        &self,
        application_id: i64,
        company_id: i64,
        status: &str,
    ) -> Result<Record, CoreError> {
        let status = catalog::application_status(&self.registry, status)?;
        let applications = self.registry.require(APPLICATIONS)?;
        let jobs = self.registry.require(JOBS)?;
        let owner_sql = format!(
            "SELECT j.company_id FROM {} AS a LEFT JOIN {} AS j ON j.job_id = a.job_id \
             WHERE a.application_id = ?1",
            quoted(applications.table()),
            quoted(jobs.table()),
        );

        self.with_conn(|conn| {
            let owner: Option<i64> = conn
                .query_row(&owner_sql, params![application_id], |row| row.get(0))
                .optional()
                .map_err(map_sqerr)?
                .ok_or_else(|| CoreError::NotFound(format!("application {application_id}")))?;
            if owner != Some(company_id) {
                return Err(CoreError::Forbidden(format!(
                    "application {application_id} does not belong to company {company_id}"
                )));
            }
            update_row(conn, applications, application_id, &[("status", status)])?
                .ok_or_else(|| CoreError::NotFound(format!("application {application_id}")))
        })
    }

    async fn find_or_create_company(&self, name: &str) -> Result<Record, CoreError> {
        let companies = self.registry.require(COMPANIES)?;
        let payload = Payload::from_iter([(
            "company_name".to_string(),
            serde_json::Value::String(name.to_string()),
        )]);
        let mutation = build_mutation(companies, &payload, MutationMode::Create).await?;
        let wanted = mutation
            .get("company_name")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default();
        let columns = out_columns(companies);
        let lookup_sql = format!(
            "SELECT {} FROM {} AS t WHERE unicode_lower(t.company_name) = ?1 \
             ORDER BY t.company_id LIMIT 1",
            select_list("t", &columns),
            quoted(companies.table()),
        );

        // Lookup and insert are separate statements with no transaction;
        // another process may insert the same name in between.
        let existing = self.with_conn(|conn| {
            conn.query_row(&lookup_sql, params![wanted], |row| read_row(row, &columns))
                .optional()
                .map_err(map_sqerr)
        })?;
        match existing {
            Some(row) => Ok(row),
            None => self.with_conn(|conn| insert_row(conn, companies, mutation.assignments())),
        }
    }
}
