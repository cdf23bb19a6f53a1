//! # contract: interface to the remote test-management service
//!
//! This module defines the [`TestOpsClient`] trait and the plain data types
//! exchanged with the remote service. The transport (HTTP client,
//! authentication, base URL) lives outside this crate; anything that can
//! create runs and accept results can implement the trait.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`, so `MockTestOpsClient` is available
//!   in unit tests and, with the `test-export-mocks` feature, to integration
//!   tests and dependants.
//!
//! ## Errors
//! - Implementors classify failures into [`RemoteError`]. Transient failures
//!   are retried by the orchestrator, rejections are not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::RemoteError;
use crate::model::CaseResult;

/// Payload for creating a run. Cases are attached afterwards, so
/// `case_uids` is normally empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRun {
    pub name: String,
    pub case_uids: Vec<String>,
}

/// A run as created on the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRun {
    pub uid: String,
    pub name: String,
    pub project_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AckStatus {
    Accepted,
    Failed(RemoteError),
}

/// Per-case answer to a `submit_results` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseAck {
    pub external_id: String,
    pub status: AckStatus,
}

impl CaseAck {
    pub fn accepted(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            status: AckStatus::Accepted,
        }
    }

    pub fn failed(external_id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            external_id: external_id.into(),
            status: AckStatus::Failed(error),
        }
    }
}

/// Offset/limit parameters for list calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListParams {
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub title: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub title: String,
}

/// Operations consumed from the remote test-management service.
///
/// List calls return the raw page; wrap them in
/// [`crate::pagination::Catalog`] to get a cursor.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TestOpsClient: Send + Sync {
    /// Create an empty run in a project.
    async fn create_run(&self, project_key: &str, run: NewRun) -> Result<RemoteRun, RemoteError>;

    /// Attach results to a run. Returns one acknowledgement per accepted or
    /// rejected case; cases missing from the answer count as not delivered.
    async fn submit_results(
        &self,
        project_key: &str,
        run: &RemoteRun,
        cases: &[CaseResult],
    ) -> Result<Vec<CaseAck>, RemoteError>;

    /// Mark a run complete, for services that need an explicit close.
    async fn finalize_run(&self, _project_key: &str, _run: &RemoteRun) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn list_projects(&self, params: ListParams) -> Result<Vec<Project>, RemoteError>;

    async fn list_fields(&self, params: ListParams) -> Result<Vec<Field>, RemoteError>;

    async fn list_tags(&self, params: ListParams) -> Result<Vec<Tag>, RemoteError>;

    async fn list_templates(&self, params: ListParams) -> Result<Vec<Template>, RemoteError>;

    async fn list_milestones(&self, params: ListParams) -> Result<Vec<Milestone>, RemoteError>;
}
