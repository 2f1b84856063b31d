//! The seam between challenge tooling and the Synapse platform.
//!
//! Everything in this crate talks to the platform through [`Synapse`], so the
//! REST client in [`crate::client_api`] can be swapped for an in-memory fake.

use crate::{
    AccessControlList, Challenge, Entity, Evaluation, QueryPage, Submission, SubmissionBundle,
    SubmissionState, SubmissionStatus, Team, UserProfile, WikiHeader, WikiPage,
};
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by a platform call.
#[derive(Debug, Error)]
pub enum SynapseError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("platform returned an error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("could not decode platform response: {0}")]
    Decode(String),
    #[error("{0}")]
    Invalid(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SynapseError {
    /// The HTTP status code, if the platform answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            SynapseError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type SynapseResult<T> = Result<T, SynapseError>;

/// Operations the challenge tooling needs from the platform.
pub trait Synapse {
    /// Profile of the authenticated caller.
    fn own_profile(&self) -> SynapseResult<UserProfile>;

    fn user_profile(&self, user_id: &str) -> SynapseResult<UserProfile>;

    /// Resolve a user name to its principal id.
    fn principal_id_for_user_name(&self, user_name: &str) -> SynapseResult<Option<String>>;

    fn team(&self, team_id: &str) -> SynapseResult<Team>;

    /// Find a team by its exact name.
    fn team_by_name(&self, name: &str) -> SynapseResult<Option<Team>>;

    fn create_team(&self, team: &Team) -> SynapseResult<Team>;

    fn get_entity(&self, entity_id: &str) -> SynapseResult<Entity>;

    fn create_entity(&self, entity: &Entity) -> SynapseResult<Entity>;

    /// Copy the children of `source_id` into the container `destination_id`.
    fn copy_entity_contents(&self, source_id: &str, destination_id: &str) -> SynapseResult<()>;

    /// The ACL governing an entity. An entity that inherits its permissions
    /// gets an empty, unsaved ACL of its own.
    fn entity_acl(&self, entity_id: &str) -> SynapseResult<AccessControlList>;

    fn store_entity_acl(&self, acl: &AccessControlList) -> SynapseResult<AccessControlList>;

    fn get_evaluation(&self, evaluation_id: &str) -> SynapseResult<Evaluation>;

    fn store_evaluation(&self, evaluation: &Evaluation) -> SynapseResult<Evaluation>;

    fn evaluations_for_project(&self, project_id: &str) -> SynapseResult<Vec<Evaluation>>;

    fn evaluation_acl(&self, evaluation_id: &str) -> SynapseResult<AccessControlList>;

    fn store_evaluation_acl(&self, acl: &AccessControlList) -> SynapseResult<AccessControlList>;

    /// All submissions of a queue currently in `status`, with their statuses.
    fn submission_bundles(
        &self,
        evaluation_id: &str,
        status: SubmissionState,
    ) -> SynapseResult<Vec<SubmissionBundle>>;

    /// Fetch a submission, downloading its file into `download_location` when given.
    fn get_submission(
        &self,
        submission_id: &str,
        download_location: Option<&Path>,
    ) -> SynapseResult<Submission>;

    fn submission_status(&self, submission_id: &str) -> SynapseResult<SubmissionStatus>;

    fn store_submission_status(&self, status: &SubmissionStatus)
    -> SynapseResult<SubmissionStatus>;

    /// Run one page of an evaluation query. Paging is part of the query text.
    fn query_page(&self, query: &str) -> SynapseResult<QueryPage>;

    fn wiki_headers(&self, owner_id: &str) -> SynapseResult<Vec<WikiHeader>>;

    fn get_wiki(&self, owner_id: &str, wiki_id: &str) -> SynapseResult<WikiPage>;

    fn store_wiki(&self, owner_id: &str, wiki: &WikiPage) -> SynapseResult<WikiPage>;

    fn create_challenge(&self, project_id: &str, participant_team_id: &str)
    -> SynapseResult<Challenge>;

    fn send_message(&self, recipients: &[String], subject: &str, body: &str) -> SynapseResult<()>;
}
