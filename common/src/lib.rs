//! A library with common utilities for administering and scoring Synapse challenges.

pub mod annotations;
pub mod client_api;
pub mod createchallenge;
pub mod download_current_lead;
pub mod evaluation_queue;
pub mod helpers;
pub mod lock;
pub mod messages;
pub mod mirrorwiki;
pub mod permissions;
pub mod scoring_harness;
pub mod synapse;
pub mod utils;
pub mod writeup_attacher;

#[cfg(test)]
mod test_support;

use annotations::Annotations;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CLIENT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_API_BASE: &str = "https://repo-prod.prod.sagebase.org";
pub const SYNAPSE_WEB_BASE: &str = "https://www.synapse.org";

/// Annotation values on a submission status are capped by the platform,
/// so failure reasons are cut to this many characters before storing.
pub const MAX_FAILURE_REASON_CHARS: usize = 1000;

pub const PROJECT_TYPE: &str = "org.sagebionetworks.repo.model.Project";
pub const FOLDER_TYPE: &str = "org.sagebionetworks.repo.model.Folder";
pub const FILE_TYPE: &str = "org.sagebionetworks.repo.model.FileEntity";

/// Every status a submission can hold in an evaluation queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Open,
    Closed,
    Scored,
    Invalid,
    Validated,
    EvaluationInProgress,
    Received,
    Rejected,
    Accepted,
}

impl SubmissionState {
    /// The wire name used by the platform and its query service.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Open => "OPEN",
            SubmissionState::Closed => "CLOSED",
            SubmissionState::Scored => "SCORED",
            SubmissionState::Invalid => "INVALID",
            SubmissionState::Validated => "VALIDATED",
            SubmissionState::EvaluationInProgress => "EVALUATION_IN_PROGRESS",
            SubmissionState::Received => "RECEIVED",
            SubmissionState::Rejected => "REJECTED",
            SubmissionState::Accepted => "ACCEPTED",
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota limits on an evaluation queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionQuota {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_round_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_duration_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_rounds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_limit: Option<i64>,
}

/// An evaluation queue. Unknown fields are carried through so a fetched
/// queue can be stored back without losing anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub content_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<SubmissionQuota>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An immutable submission to an evaluation queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub evaluation_id: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_repository_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_digest: Option<String>,
    #[serde(
        default,
        rename = "entityBundleJSON",
        skip_serializing_if = "Option::is_none"
    )]
    pub entity_bundle_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    /// Local path of the downloaded submission file, if it was downloaded.
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Submission {
    fn entity_bundle(&self) -> Option<Value> {
        self.entity_bundle_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// The snapshot of the submitted entity stored with the submission.
    pub fn entity(&self) -> Option<Value> {
        self.entity_bundle().and_then(|b| b.get("entity").cloned())
    }

    pub fn entity_name(&self) -> Option<String> {
        self.entity()
            .and_then(|e| e.get("name").and_then(Value::as_str).map(str::to_string))
    }

    pub fn entity_type(&self) -> Option<String> {
        self.entity().and_then(|e| {
            e.get("concreteType")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    /// The first file handle attached to the submitted entity, as (id, file name).
    pub fn file_handle(&self) -> Option<(String, String)> {
        let bundle = self.entity_bundle()?;
        let handle = bundle.get("fileHandles")?.as_array()?.first()?.clone();
        let id = match handle.get("id")? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let file_name = handle
            .get("fileName")
            .and_then(Value::as_str)
            .unwrap_or("submission")
            .to_string();
        Some((id, file_name))
    }

    pub fn is_docker(&self) -> bool {
        self.docker_repository_name.is_some()
    }

    /// Human readable label for messages and logs.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.clone())
    }
}

/// The single mutable record attached to each submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatus {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub status: SubmissionState,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_cancel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubmissionStatus {
    pub fn new(id: &str, status: SubmissionState) -> Self {
        SubmissionStatus {
            id: id.to_string(),
            etag: None,
            status,
            annotations: Annotations::default(),
            can_cancel: None,
            cancel_requested: None,
            extra: Map::new(),
        }
    }
}

/// A submission paired with its status, as returned by bulk listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBundle {
    pub submission: Submission,
    pub submission_status: SubmissionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub owner_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_public_join: Option<bool>,
}

/// A repository entity (project, folder or file).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub concrete_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file_handle_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity {
    pub fn project(name: &str) -> Self {
        Entity {
            name: name.to_string(),
            concrete_type: PROJECT_TYPE.to_string(),
            ..Default::default()
        }
    }

    pub fn folder(name: &str, parent_id: &str) -> Self {
        Entity {
            name: name.to_string(),
            concrete_type: FOLDER_TYPE.to_string(),
            parent_id: Some(parent_id.to_string()),
            ..Default::default()
        }
    }

    pub fn is_project(&self) -> bool {
        self.concrete_type == PROJECT_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccess {
    pub principal_id: i64,
    pub access_type: Vec<String>,
}

/// Access control list of an entity or an evaluation queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlList {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub resource_access: Vec<ResourceAccess>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiHeader {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_wiki_id: Option<String>,
    #[serde(default)]
    pub attachment_file_handle_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The challenge object linking a project to its participant team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub project_id: String,
    pub participant_team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRow {
    #[serde(default)]
    pub values: Vec<Option<String>>,
}

/// One page of results from the evaluation query service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub total_number_of_results: i64,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<QueryRow>,
}
