use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::memory_store::{InMemoryStore, Tables};
use crate::catalog::{self, APPLICATIONS, COMPANIES, JOBS, OPEN_JOB_SEARCH, USERS};
use crate::coerce::duplicate_message;
use crate::query::{build_mutation, plan_list, Mutation, MutationMode, SearchPredicate};
use crate::schema::{Schema, SchemaRegistry};
use crate::{
    CoreError, CrudRepository, JobBoardRepository, ListResult, PageRequest, Payload, Record, Value,
};

/// Repository over the in-memory store, with the same contract and result
/// shapes as the SQLite repository.
///
/// Payloads are resolved (including async field handlers) before the store
/// lock is taken; each read-modify-write then runs under a single lock with
/// no suspension point, so concurrent operations cannot interleave.
#[derive(Clone)]
pub struct MockRepository {
    registry: Arc<SchemaRegistry>,
    store: Arc<InMemoryStore>,
}

impl MockRepository {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<InMemoryStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }
}

fn id_of(row: &Record, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

/// Copy of `row` restricted to `columns`; missing columns read as null.
fn project(row: &Record, columns: &[&'static str]) -> Record {
    columns
        .iter()
        .map(|c| (c.to_string(), row.get(*c).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn lookup<'a>(tables: &'a Tables, table: &str, id: Option<i64>) -> Option<&'a Record> {
    id.and_then(|id| tables.find(table, id))
}

fn column_or_null(row: Option<&Record>, column: &str) -> Value {
    row.and_then(|r| r.get(column)).cloned().unwrap_or(Value::Null)
}

/// Unique fields the mutation would duplicate, ignoring row `own_id`.
fn unique_conflicts(
    tables: &Tables,
    schema: &Schema,
    mutation: &Mutation,
    own_id: Option<i64>,
) -> Result<(), CoreError> {
    let rows = tables.rows(schema.table());
    let messages: Vec<String> = schema
        .unique_fields()
        .filter(|field| {
            let Some(wanted) = mutation.get(field.name).filter(|v| **v != Value::Null) else {
                return false;
            };
            rows.iter().any(|row| {
                id_of(row, schema.primary_key()) != own_id && row.get(field.name) == Some(wanted)
            })
        })
        .map(duplicate_message)
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(messages))
    }
}

fn sorted_by_default(schema: &Schema, mut rows: Vec<Record>) -> Vec<Record> {
    let order = schema.default_sort().with_tiebreak(schema.primary_key());
    rows.sort_by(|a, b| order.compare(a, b));
    rows
}

#[async_trait]
impl CrudRepository for MockRepository {
    async fn list(&self, entity: &str, request: &PageRequest) -> Result<ListResult, CoreError> {
        let schema = self.registry.require(entity)?;
        let plan = plan_list(schema, request);

        let mut matching = self.store.read(|t| {
            t.rows(schema.table())
                .iter()
                .filter(|row| plan.search.as_ref().map_or(true, |s| s.matches(row)))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        matching.sort_by(|a, b| plan.order.compare(a, b));

        let total = matching.len();
        let offset = usize::try_from(plan.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(plan.limit).unwrap_or(usize::MAX);
        let items: Vec<Record> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &plan.columns))
            .collect();
        let has_more = offset.saturating_add(items.len()) < total;
        debug!(entity, total, returned = items.len(), "mock list");

        Ok(ListResult {
            items,
            total,
            has_more,
            sort: plan.sort,
        })
    }

    async fn find_by_id(&self, entity: &str, id: i64) -> Result<Option<Record>, CoreError> {
        let schema = self.registry.require(entity)?;
        let columns = schema.selectable_columns();
        self.store
            .read(|t| t.find(schema.table(), id).map(|row| project(row, &columns)))
    }

    async fn create(&self, entity: &str, payload: &Payload) -> Result<Record, CoreError> {
        let schema = self.registry.require(entity)?;
        let mutation = build_mutation(schema, payload, MutationMode::Create).await?;
        if mutation.is_empty() {
            return Err(CoreError::validation("Aucune donnée fournie"));
        }
        let columns = schema.selectable_columns();
        let created = self.store.write(|t| {
            unique_conflicts(t, schema, &mutation, None)?;
            Ok::<_, CoreError>(t.insert(schema.table(), schema.primary_key(), mutation.into_record()))
        })??;
        debug!(entity, id = ?created.get(schema.primary_key()), "mock create");
        Ok(project(&created, &columns))
    }

    async fn update(
        &self,
        entity: &str,
        id: i64,
        payload: &Payload,
    ) -> Result<Option<Record>, CoreError> {
        let schema = self.registry.require(entity)?;
        let mutation = build_mutation(schema, payload, MutationMode::Update).await?;
        if mutation.is_empty() {
            return self.find_by_id(entity, id).await;
        }
        let columns = schema.selectable_columns();
        let updated = self.store.write(|t| {
            if t.find(schema.table(), id).is_none() {
                return Ok(None);
            }
            unique_conflicts(t, schema, &mutation, Some(id))?;
            Ok::<_, CoreError>(t.update(schema.table(), id, mutation.into_record()))
        })??;
        Ok(updated.map(|row| project(&row, &columns)))
    }

    async fn remove(&self, entity: &str, id: i64) -> Result<bool, CoreError> {
        let schema = self.registry.require(entity)?;
        self.store.write(|t| t.remove(schema.table(), id))
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[async_trait]
impl JobBoardRepository for MockRepository {
    async fn list_open_jobs(&self, search: Option<&str>) -> Result<Vec<Record>, CoreError> {
        let jobs = self.registry.require(JOBS)?;
        let companies = self.registry.require(COMPANIES)?;
        let predicate = search.and_then(|s| SearchPredicate::over(s, OPEN_JOB_SEARCH));
        let columns = jobs.selectable_columns();

        let rows = self.store.read(|t| {
            t.rows(jobs.table())
                .iter()
                .filter(|job| job.get("is_active").is_some_and(Value::is_truthy))
                .filter(|job| predicate.as_ref().map_or(true, |p| p.matches(job)))
                .map(|job| {
                    let company = lookup(t, companies.table(), id_of(job, "company_id"));
                    let mut row = project(job, &columns);
                    row.insert("company_name".into(), column_or_null(company, "company_name"));
                    row
                })
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by_default(jobs, rows))
    }

    async fn application_status_counts(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<String, i64>, CoreError> {
        let applications = self.registry.require(APPLICATIONS)?;
        self.store.read(|t| {
            let mut counts = BTreeMap::new();
            for app in t.rows(applications.table()) {
                if id_of(app, "user_id") != Some(user_id) {
                    continue;
                }
                if let Some(status) = app.get("status").and_then(Value::as_str) {
                    *counts.entry(status.to_string()).or_insert(0) += 1;
                }
            }
            counts
        })
    }

    async fn list_company_applications(&self, company_id: i64) -> Result<Vec<Record>, CoreError> {
        let applications = self.registry.require(APPLICATIONS)?;
        let jobs = self.registry.require(JOBS)?;
        let users = self.registry.require(USERS)?;
        let columns = applications.selectable_columns();

        let rows = self.store.read(|t| {
            t.rows(applications.table())
                .iter()
                .filter_map(|app| {
                    let job = lookup(t, jobs.table(), id_of(app, "job_id"))?;
                    if id_of(job, "company_id") != Some(company_id) {
                        return None;
                    }
                    let candidate = lookup(t, users.table(), id_of(app, "user_id"));
                    let mut row = project(app, &columns);
                    row.insert("job_title".into(), column_or_null(Some(job), "title"));
                    row.insert("first_name".into(), column_or_null(candidate, "first_name"));
                    row.insert("last_name".into(), column_or_null(candidate, "last_name"));
                    Some(row)
                })
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by_default(applications, rows))
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
        let columns = applications.selectable_columns();

        self.store.write(|t| {
            let app = t
                .find(applications.table(), application_id)
                .ok_or_else(|| CoreError::NotFound(format!("application {application_id}")))?;
            let owner = lookup(t, jobs.table(), id_of(app, "job_id"))
                .and_then(|job| id_of(job, "company_id"));
            if owner != Some(company_id) {
                return Err(CoreError::Forbidden(format!(
                    "application {application_id} does not belong to company {company_id}"
                )));
            }
            let changes = Record::from([("status".to_string(), status)]);
            t.update(applications.table(), application_id, changes)
                .map(|row| project(&row, &columns))
                .ok_or_else(|| CoreError::NotFound(format!("application {application_id}")))
        })?
    }

    async fn find_or_create_company(&self, name: &str) -> Result<Record, CoreError> {
        let companies = self.registry.require(COMPANIES)?;
        let payload = Payload::from_iter([(
            "company_name".to_string(),
            JsonValue::String(name.to_string()),
        )]);
        let mutation = build_mutation(companies, &payload, MutationMode::Create).await?;
        let wanted = mutation
            .get("company_name")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default();
        let columns = companies.selectable_columns();

        let row = self.store.write(|t| {
            let existing = t.rows(companies.table()).iter().find(|row| {
                row.get("company_name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| n.to_lowercase() == wanted)
            });
            match existing {
                Some(row) => row.clone(),
                None => t.insert(companies.table(), companies.primary_key(), mutation.into_record()),
            }
        })?;
        Ok(project(&row, &columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::registry;
    use serde_json::json;

    fn repo() -> MockRepository {
        MockRepository::new(Arc::new(registry()), Arc::new(InMemoryStore::job_board()))
    }

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap_or_default()
    }

    fn names(items: &[Record], column: &str) -> Vec<String> {
        items
            .iter()
            .filter_map(|r| r.get(column).and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn create_without_required_field_reports_label() {
        let repo = repo();
        let err = repo.create(COMPANIES, &payload(json!({}))).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("Nom de l'entreprise"));
        assert_eq!(repo.list(COMPANIES, &PageRequest::default()).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn create_returns_generated_key() {
        let repo = repo();
        let row = repo
            .create(COMPANIES, &payload(json!({"company_name": "TechNova"})))
            .await
            .unwrap();
        assert_eq!(row.get("company_id"), Some(&Value::Int(4)));
        assert_eq!(row.get("company_name"), Some(&Value::from("TechNova")));
        assert_eq!(row.get("city"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn create_with_nothing_writable_is_rejected() {
        let repo = repo();
        let err = repo
            .create(APPLICATIONS, &payload(json!({"application_id": 9})))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let repo = repo();
        let result = repo
            .list(COMPANIES, &PageRequest::default().with_search("tech"))
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(names(&result.items, "company_name"), vec!["TechNova"]);
    }

    #[tokio::test]
    async fn default_sort_and_echo() {
        let repo = repo();
        let result = repo.list(JOBS, &PageRequest::default()).await.unwrap();
        let ids: Vec<_> = result.items.iter().filter_map(|r| id_of(r, "job_id")).collect();
        // jobs 2 and 6 share a posting date; job_id DESC breaks the tie
        assert_eq!(ids, vec![5, 6, 2, 1, 3, 4]);
        assert_eq!(result.sort.to_string(), "posted_at:DESC,job_id:DESC");

        let result = repo
            .list(JOBS, &PageRequest::default().with_sort("salary:asc,password:asc"))
            .await
            .unwrap();
        assert_eq!(result.sort.to_string(), "salary:ASC");
        assert_eq!(id_of(&result.items[0], "job_id"), Some(4));
    }

    #[tokio::test]
    async fn pagination_covers_every_row_once() {
        let repo = repo();
        let mut seen = Vec::new();
        for page in 1..=2 {
            let result = repo
                .list(JOBS, &PageRequest::new(Some(page), Some(4)))
                .await
                .unwrap();
            assert_eq!(result.total, 6);
            assert_eq!(result.has_more, page == 1);
            seen.extend(result.items.iter().filter_map(|r| id_of(r, "job_id")));
        }
        assert_eq!(seen.len(), 6);
        let last = repo.list(JOBS, &PageRequest::new(Some(2), Some(4))).await.unwrap();
        assert_eq!(last.items.len(), 2);
        let beyond = repo.list(JOBS, &PageRequest::new(Some(3), Some(4))).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 6);
    }

    #[tokio::test]
    async fn listing_never_exposes_passwords() {
        let repo = repo();
        let result = repo.list(USERS, &PageRequest::default()).await.unwrap();
        for row in &result.items {
            assert!(!row.contains_key("password"));
            assert!(!row.contains_key("password_hash"));
        }
        assert_eq!(names(&result.items, "last_name"), vec!["Durand", "Leroy", "Martin", "Petit"]);
    }

    #[tokio::test]
    async fn round_trip_coerces_inputs() {
        let repo = repo();
        let created = repo
            .create(
                JOBS,
                &payload(json!({
                    "title": " Architecte cloud ", "company_id": "2", "salary": "61000.5",
                    "location": "", "is_active": "1", "posted_at": "2024-04-01"
                })),
            )
            .await
            .unwrap();
        let id = id_of(&created, "job_id").unwrap();
        let fetched = repo.find_by_id(JOBS, id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.get("title"), Some(&Value::from("Architecte cloud")));
        assert_eq!(fetched.get("company_id"), Some(&Value::Int(2)));
        assert_eq!(fetched.get("salary"), Some(&Value::Float(61000.5)));
        assert_eq!(fetched.get("location"), Some(&Value::Null));
        assert_eq!(fetched.get("is_active"), Some(&Value::Int(1)));
        assert_eq!(fetched.get("posted_at"), Some(&Value::Date("2024-04-01".into())));
    }

    #[tokio::test]
    async fn empty_update_returns_current_record() {
        let repo = repo();
        let before = repo.find_by_id(COMPANIES, 2).await.unwrap();
        let after = repo.update(COMPANIES, 2, &Payload::new()).await.unwrap();
        assert_eq!(before, after);
        assert!(repo.update(COMPANIES, 99, &Payload::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_id_is_none() {
        let repo = repo();
        let out = repo
            .update(COMPANIES, 99, &payload(json!({"city": "Nantes"})))
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn delete_then_delete_again() {
        let repo = repo();
        assert!(repo.remove(APPLICATIONS, 1).await.unwrap());
        assert!(repo.find_by_id(APPLICATIONS, 1).await.unwrap().is_none());
        assert!(!repo.remove(APPLICATIONS, 1).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_entity_is_not_found() {
        let repo = repo();
        let err = repo.list("invoices", &PageRequest::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_jobs_resolve_company_names() {
        let repo = repo();
        let jobs = repo.list_open_jobs(None).await.unwrap();
        assert_eq!(jobs.len(), 5);
        assert!(jobs.iter().all(|j| id_of(j, "job_id") != Some(4)));
        assert_eq!(jobs[0].get("company_name"), Some(&Value::from("Maison Béranger")));

        let jobs = repo.list_open_jobs(Some("LYON")).await.unwrap();
        assert_eq!(names(&jobs, "title"), vec!["Chargé de projets solaires"]);
    }

    #[tokio::test]
    async fn status_counts_per_candidate() {
        let repo = repo();
        let counts = repo.application_status_counts(4).await.unwrap();
        assert_eq!(counts.get("reviewed"), Some(&1));
        assert_eq!(counts.get("accepted"), Some(&1));
        assert_eq!(counts.len(), 2);
        assert!(repo.application_status_counts(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn company_applications_resolve_job_and_candidate() {
        let repo = repo();
        let apps = repo.list_company_applications(1).await.unwrap();
        assert_eq!(names(&apps, "job_title"), vec!["Ingénieur DevOps", "Développeur Rust backend"]);
        assert_eq!(names(&apps, "last_name"), vec!["Leroy", "Durand"]);
    }

    #[tokio::test]
    async fn status_change_checks_ownership() {
        let repo = repo();
        let err = repo.set_application_status(1, 2, "reviewed").await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        let err = repo.set_application_status(42, 1, "reviewed").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        let err = repo.set_application_status(1, 1, "hired").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let row = repo.set_application_status(1, 1, "interview").await.unwrap();
        assert_eq!(row.get("status"), Some(&Value::from("interview")));
    }

    #[tokio::test]
    async fn find_or_create_matches_case_insensitively() {
        let repo = repo();
        let found = repo.find_or_create_company("  greenpulse ").await.unwrap();
        assert_eq!(found.get("company_id"), Some(&Value::Int(2)));

        let created = repo.find_or_create_company("Atelier Nord").await.unwrap();
        assert_eq!(created.get("company_id"), Some(&Value::Int(4)));
        assert!(repo.find_or_create_company("").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_with_label() {
        let repo = repo();
        let duplicate = payload(json!({
            "first_name": "Zoé", "last_name": "Martin", "email": "alice.martin@technova.example",
            "role": "candidate", "password": "pw"
        }));
        let err = repo.create(USERS, &duplicate).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.to_string(), "Email est déjà utilisé");
        assert_eq!(repo.list(USERS, &PageRequest::default()).await.unwrap().total, 4);

        // a row keeping its own email is not a conflict
        let same = payload(json!({"email": "alice.martin@technova.example"}));
        assert!(repo.update(USERS, 1, &same).await.unwrap().is_some());
        let err = repo.update(USERS, 2, &same).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(repo.update(USERS, 99, &same).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_operations_do_not_interleave() {
        let repo = repo();
        let orbis = payload(json!({"company_name": "Orbis"}));
        let vela = payload(json!({"company_name": "Vela"}));
        let (a, b, c, d) = tokio::join!(
            repo.find_or_create_company("Atelier Sud"),
            repo.find_or_create_company("atelier sud"),
            repo.create(COMPANIES, &orbis),
            repo.create(COMPANIES, &vela),
        );
        assert_eq!(a.unwrap().get("company_id"), b.unwrap().get("company_id"));
        let c = id_of(&c.unwrap(), "company_id").unwrap();
        let d = id_of(&d.unwrap(), "company_id").unwrap();
        assert_ne!(c, d);
        assert_eq!(repo.list(COMPANIES, &PageRequest::default()).await.unwrap().total, 6);
    }
}
