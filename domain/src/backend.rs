//! Backend facade: dispatches every repository call to the structured
//! backend until it reports itself unavailable, then to the mock for the
//! rest of the process lifetime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::adapters::mock_repo::MockRepository;
use crate::schema::SchemaRegistry;
use crate::{
    CoreError, CrudRepository, JobBoardRepository, ListResult, PageRequest, Payload, Record,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Structured,
    Mock,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Structured => "structured",
            BackendMode::Mock => "mock",
        }
    }
}

/// One-way switch from structured to mock. There is no way back.
#[derive(Debug, Default)]
pub struct ModeSwitch {
    degraded: AtomicBool,
}

impl ModeSwitch {
    pub fn structured() -> Self {
        Self::default()
    }

    pub fn forced_mock() -> Self {
        Self {
            degraded: AtomicBool::new(true),
        }
    }

    pub fn mode(&self) -> BackendMode {
        if self.degraded.load(Ordering::Acquire) {
            BackendMode::Mock
        } else {
            BackendMode::Structured
        }
    }

    /// Flip to mock. Returns true only for the call that actually flipped.
    pub fn degrade(&self) -> bool {
        !self.degraded.swap(true, Ordering::AcqRel)
    }
}

pub struct Backend<S> {
    structured: Option<S>,
    mock: MockRepository,
    switch: ModeSwitch,
}

impl<S> Backend<S> {
    pub fn new(structured: S, mock: MockRepository) -> Self {
        Self {
            structured: Some(structured),
            mock,
            switch: ModeSwitch::structured(),
        }
    }

    /// Facade that never touches a structured backend.
    pub fn mock_only(mock: MockRepository) -> Self {
        Self {
            structured: None,
            mock,
            switch: ModeSwitch::forced_mock(),
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.switch.mode()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.mock.registry()
    }

    fn active_structured(&self) -> Option<&S> {
        match self.switch.mode() {
            BackendMode::Structured => self.structured.as_ref(),
            BackendMode::Mock => None,
        }
    }

    fn fall_back(&self, operation: &str, reason: &str) {
        if self.switch.degrade() {
            // Mock mode serves non-authoritative data until restart.
            warn!(operation, reason, "structured backend unavailable, switching to mock backend");
        }
    }
}

impl<S: CrudRepository> Backend<S> {
    /// Ping the structured backend once; any failure degrades to mock.
    pub async fn check_connectivity(&self) -> BackendMode {
        if let Some(structured) = self.active_structured() {
            if let Err(e) = structured.ping().await {
                self.fall_back("ping", &e.to_string());
            }
        }
        self.mode()
    }
}

/// Run `$call` against the structured backend while it is active; on
/// `BackendUnavailable` degrade and run the same call against the mock.
macro_rules! dispatch {
    ($self:ident, $op:literal, |$repo:ident| $call:expr) => {{
        if let Some($repo) = $self.active_structured() {
            match $call.await {
                Err(CoreError::BackendUnavailable(reason)) => $self.fall_back($op, &reason),
                other => return other,
            }
        }
        let $repo = &$self.mock;
        $call.await
    }};
}

#[async_trait]
impl<S: CrudRepository> CrudRepository for Backend<S> {
    async fn list(&self, entity: &str, request: &PageRequest) -> Result<ListResult, CoreError> {
        dispatch!(self, "list", |repo| repo.list(entity, request))
    }

    async fn find_by_id(&self, entity: &str, id: i64) -> Result<Option<Record>, CoreError> {
        dispatch!(self, "find_by_id", |repo| repo.find_by_id(entity, id))
    }

    async fn create(&self, entity: &str, payload: &Payload) -> Result<Record, CoreError> {
        dispatch!(self, "create", |repo| repo.create(entity, payload))
    }

    async fn update(
        &self,
        entity: &str,
        id: i64,
        payload: &Payload,
    ) -> Result<Option<Record>, CoreError> {
        dispatch!(self, "update", |repo| repo.update(entity, id, payload))
    }

    async fn remove(&self, entity: &str, id: i64) -> Result<bool, CoreError> {
        dispatch!(self, "remove", |repo| repo.remove(entity, id))
    }

    async fn ping(&self) -> Result<(), CoreError> {
        dispatch!(self, "ping", |repo| repo.ping())
    }
}

#[async_trait]
impl<S: JobBoardRepository> JobBoardRepository for Backend<S> {
    async fn list_open_jobs(&self, search: Option<&str>) -> Result<Vec<Record>, CoreError> {
        dispatch!(self, "list_open_jobs", |repo| repo.list_open_jobs(search))
    }

    async fn application_status_counts(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<String, i64>, CoreError> {
        dispatch!(self, "application_status_counts", |repo| repo
            .application_status_counts(user_id))
    }

    async fn list_company_applications(&self, company_id: i64) -> Result<Vec<Record>, CoreError> {
        dispatch!(self, "list_company_applications", |repo| repo
            .list_company_applications(company_id))
    }

    async fn set_application_status(
        &self,
        application_id: i64,
        company_id: i64,
        status: &str,
    ) -> Result<Record, CoreError> {
        dispatch!(self, "set_application_status", |repo| repo
            .set_application_status(application_id, company_id, status))
    }

    async fn find_or_create_company(&self, name: &str) -> Result<Record, CoreError> {
        dispatch!(self, "find_or_create_company", |repo| repo.find_or_create_company(name))
    }
}
