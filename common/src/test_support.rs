//! In-memory platform used by the unit tests.

use crate::synapse::{Synapse, SynapseError, SynapseResult};
use crate::{
    AccessControlList, Challenge, Entity, Evaluation, QueryPage, QueryRow, Submission,
    SubmissionBundle, SubmissionState, SubmissionStatus, Team, UserProfile, WikiHeader, WikiPage,
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// A query table: column headers and rows of optional values.
#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Default)]
pub struct FakeSynapse {
    pub me: UserProfile,
    pub profiles: RefCell<HashMap<String, UserProfile>>,
    pub user_names: RefCell<HashMap<String, String>>,
    pub teams: RefCell<HashMap<String, Team>>,
    pub entities: RefCell<HashMap<String, Entity>>,
    pub evaluations: RefCell<HashMap<String, Evaluation>>,
    pub submissions: RefCell<HashMap<String, Submission>>,
    pub statuses: RefCell<HashMap<String, SubmissionStatus>>,
    pub entity_acls: RefCell<HashMap<String, AccessControlList>>,
    pub evaluation_acls: RefCell<HashMap<String, AccessControlList>>,
    pub wikis: RefCell<HashMap<String, Vec<WikiPage>>>,
    pub tables: RefCell<HashMap<String, FakeTable>>,
    pub challenges: RefCell<Vec<Challenge>>,

    pub sent: RefCell<Vec<SentMessage>>,
    pub queries: RefCell<Vec<String>>,
    pub copies: RefCell<Vec<(String, String)>>,
    pub bundle_calls: RefCell<Vec<(String, SubmissionState)>>,
    pub stored_statuses: RefCell<Vec<SubmissionStatus>>,
    pub fail_store_status: Cell<bool>,
    pub panic_on_bundles: Cell<bool>,
    next_id: Cell<u64>,
}

impl FakeSynapse {
    pub fn new() -> Self {
        FakeSynapse {
            me: UserProfile {
                owner_id: "3000".to_string(),
                user_name: "admin".to_string(),
                ..Default::default()
            },
            next_id: Cell::new(1000),
            ..Default::default()
        }
    }

    pub fn fresh_id(&self, prefix: &str) -> String {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        format!("{prefix}{id}")
    }

    pub fn add_profile(&self, owner_id: &str, user_name: &str, first: Option<&str>, last: Option<&str>) {
        self.profiles.borrow_mut().insert(
            owner_id.to_string(),
            UserProfile {
                owner_id: owner_id.to_string(),
                user_name: user_name.to_string(),
                first_name: first.map(str::to_string),
                last_name: last.map(str::to_string),
            },
        );
        self.user_names
            .borrow_mut()
            .insert(user_name.to_string(), owner_id.to_string());
    }

    pub fn add_team(&self, id: &str, name: &str) {
        self.teams.borrow_mut().insert(
            id.to_string(),
            Team {
                id: Some(id.to_string()),
                name: name.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn add_entity(&self, entity: Entity) {
        if let Some(id) = entity.id.clone() {
            self.entities.borrow_mut().insert(id, entity);
        }
    }

    pub fn add_evaluation(&self, id: &str, name: &str, content_source: &str) {
        self.evaluations.borrow_mut().insert(
            id.to_string(),
            Evaluation {
                id: id.to_string(),
                name: name.to_string(),
                content_source: content_source.to_string(),
                ..Default::default()
            },
        );
    }

    /// Register a submission of a file entity along with its status.
    pub fn add_submission(&self, submission: Submission, state: SubmissionState) {
        let status = SubmissionStatus::new(&submission.id, state);
        self.statuses
            .borrow_mut()
            .insert(submission.id.clone(), status);
        self.submissions
            .borrow_mut()
            .insert(submission.id.clone(), submission);
    }

    pub fn status_of(&self, submission_id: &str) -> Option<SubmissionStatus> {
        self.statuses.borrow().get(submission_id).cloned()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.borrow().clone()
    }
}

/// A file submission whose entity bundle names `file_name`.
pub fn file_submission(id: &str, user_id: &str, evaluation_id: &str, file_name: &str) -> Submission {
    let bundle = json!({
        "entity": {
            "id": "syn222",
            "name": "prediction",
            "concreteType": crate::FILE_TYPE,
            "versionNumber": 2
        },
        "fileHandles": [{"id": "77", "fileName": file_name}]
    });
    Submission {
        id: id.to_string(),
        user_id: user_id.to_string(),
        evaluation_id: evaluation_id.to_string(),
        entity_id: "syn222".to_string(),
        version_number: Some(2),
        name: Some(format!("submission {id}")),
        entity_bundle_json: Some(bundle.to_string()),
        ..Default::default()
    }
}

/// A Docker submission without any file.
pub fn docker_submission(id: &str, user_id: &str, evaluation_id: &str) -> Submission {
    Submission {
        id: id.to_string(),
        user_id: user_id.to_string(),
        evaluation_id: evaluation_id.to_string(),
        entity_id: "syn333".to_string(),
        version_number: Some(1),
        docker_repository_name: Some("docker.synapse.org/syn333/model".to_string()),
        docker_digest: Some("sha256:abc".to_string()),
        ..Default::default()
    }
}

fn not_found(what: &str) -> SynapseError {
    SynapseError::Http {
        status: 404,
        message: format!("{what} not found"),
    }
}

/// Pull `limit N offset M` out of query text.
fn paging(query: &str) -> (usize, usize) {
    let words: Vec<&str> = query.split_whitespace().collect();
    let find = |name: &str| {
        words
            .iter()
            .position(|w| w.eq_ignore_ascii_case(name))
            .and_then(|i| words.get(i + 1))
            .and_then(|v| v.parse().ok())
    };
    (find("limit").unwrap_or(usize::MAX), find("offset").unwrap_or(0))
}

impl Synapse for FakeSynapse {
    fn own_profile(&self) -> SynapseResult<UserProfile> {
        Ok(self.me.clone())
    }

    fn user_profile(&self, user_id: &str) -> SynapseResult<UserProfile> {
        self.profiles
            .borrow()
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found("profile"))
    }

    fn principal_id_for_user_name(&self, user_name: &str) -> SynapseResult<Option<String>> {
        Ok(self.user_names.borrow().get(user_name).cloned())
    }

    fn team(&self, team_id: &str) -> SynapseResult<Team> {
        self.teams
            .borrow()
            .get(team_id)
            .cloned()
            .ok_or_else(|| not_found("team"))
    }

    fn team_by_name(&self, name: &str) -> SynapseResult<Option<Team>> {
        Ok(self.teams.borrow().values().find(|t| t.name == name).cloned())
    }

    fn create_team(&self, team: &Team) -> SynapseResult<Team> {
        let mut created = team.clone();
        let id = self.fresh_id("");
        created.id = Some(id.clone());
        self.teams.borrow_mut().insert(id, created.clone());
        Ok(created)
    }

    fn get_entity(&self, entity_id: &str) -> SynapseResult<Entity> {
        self.entities
            .borrow()
            .get(entity_id)
            .cloned()
            .ok_or_else(|| not_found("entity"))
    }

    fn create_entity(&self, entity: &Entity) -> SynapseResult<Entity> {
        let mut created = entity.clone();
        let id = self.fresh_id("syn");
        created.id = Some(id.clone());
        self.entities.borrow_mut().insert(id, created.clone());
        Ok(created)
    }

    fn copy_entity_contents(&self, source_id: &str, destination_id: &str) -> SynapseResult<()> {
        self.copies
            .borrow_mut()
            .push((source_id.to_string(), destination_id.to_string()));
        Ok(())
    }

    fn entity_acl(&self, entity_id: &str) -> SynapseResult<AccessControlList> {
        Ok(self
            .entity_acls
            .borrow()
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| AccessControlList {
                id: entity_id.to_string(),
                ..Default::default()
            }))
    }

    fn store_entity_acl(&self, acl: &AccessControlList) -> SynapseResult<AccessControlList> {
        self.entity_acls
            .borrow_mut()
            .insert(acl.id.clone(), acl.clone());
        Ok(acl.clone())
    }

    fn get_evaluation(&self, evaluation_id: &str) -> SynapseResult<Evaluation> {
        self.evaluations
            .borrow()
            .get(evaluation_id)
            .cloned()
            .ok_or_else(|| not_found("evaluation"))
    }

    fn store_evaluation(&self, evaluation: &Evaluation) -> SynapseResult<Evaluation> {
        self.evaluations
            .borrow_mut()
            .insert(evaluation.id.clone(), evaluation.clone());
        Ok(evaluation.clone())
    }

    fn evaluations_for_project(&self, project_id: &str) -> SynapseResult<Vec<Evaluation>> {
        let mut found: Vec<Evaluation> = self
            .evaluations
            .borrow()
            .values()
            .filter(|e| e.content_source == project_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn evaluation_acl(&self, evaluation_id: &str) -> SynapseResult<AccessControlList> {
        Ok(self
            .evaluation_acls
            .borrow()
            .get(evaluation_id)
            .cloned()
            .unwrap_or_else(|| AccessControlList {
                id: evaluation_id.to_string(),
                etag: Some("etag".to_string()),
                ..Default::default()
            }))
    }

    fn store_evaluation_acl(&self, acl: &AccessControlList) -> SynapseResult<AccessControlList> {
        self.evaluation_acls
            .borrow_mut()
            .insert(acl.id.clone(), acl.clone());
        Ok(acl.clone())
    }

    fn submission_bundles(
        &self,
        evaluation_id: &str,
        status: SubmissionState,
    ) -> SynapseResult<Vec<SubmissionBundle>> {
        assert!(!self.panic_on_bundles.get(), "bundle listing blew up");
        self.bundle_calls
            .borrow_mut()
            .push((evaluation_id.to_string(), status));
        let statuses = self.statuses.borrow();
        let mut bundles: Vec<SubmissionBundle> = self
            .submissions
            .borrow()
            .values()
            .filter(|s| s.evaluation_id == evaluation_id)
            .filter_map(|s| {
                statuses
                    .get(&s.id)
                    .filter(|st| st.status == status)
                    .map(|st| SubmissionBundle {
                        submission: s.clone(),
                        submission_status: st.clone(),
                    })
            })
            .collect();
        bundles.sort_by(|a, b| a.submission.id.cmp(&b.submission.id));
        Ok(bundles)
    }

    fn get_submission(
        &self,
        submission_id: &str,
        download_location: Option<&Path>,
    ) -> SynapseResult<Submission> {
        let mut submission = self
            .submissions
            .borrow()
            .get(submission_id)
            .cloned()
            .ok_or_else(|| not_found("submission"))?;
        if let Some(location) = download_location
            && !submission.is_docker()
        {
            let path = location.join(format!("submission-{submission_id}"));
            if location.is_dir() {
                fs::write(&path, "prediction")?;
            }
            submission.file_path = Some(path);
        }
        Ok(submission)
    }

    fn submission_status(&self, submission_id: &str) -> SynapseResult<SubmissionStatus> {
        self.status_of(submission_id)
            .ok_or_else(|| not_found("submission status"))
    }

    fn store_submission_status(
        &self,
        status: &SubmissionStatus,
    ) -> SynapseResult<SubmissionStatus> {
        if self.fail_store_status.get() {
            return Err(SynapseError::Http {
                status: 412,
                message: "etag mismatch".to_string(),
            });
        }
        self.stored_statuses.borrow_mut().push(status.clone());
        self.statuses
            .borrow_mut()
            .insert(status.id.clone(), status.clone());
        Ok(status.clone())
    }

    fn query_page(&self, query: &str) -> SynapseResult<QueryPage> {
        self.queries.borrow_mut().push(query.to_string());
        let tables = self.tables.borrow();
        let table = query
            .split_whitespace()
            .find_map(|word| tables.get(word))
            .ok_or_else(|| not_found("evaluation"))?;
        let (limit, offset) = paging(query);
        let rows = table
            .rows
            .iter()
            .skip(offset)
            .take(limit)
            .map(|values| QueryRow {
                values: values.clone(),
            })
            .collect();
        Ok(QueryPage {
            total_number_of_results: i64::try_from(table.rows.len()).unwrap_or(i64::MAX),
            headers: table.headers.clone(),
            rows,
        })
    }

    fn wiki_headers(&self, owner_id: &str) -> SynapseResult<Vec<WikiHeader>> {
        Ok(self
            .wikis
            .borrow()
            .get(owner_id)
            .map(|pages| {
                pages
                    .iter()
                    .map(|p| WikiHeader {
                        id: p.id.clone().unwrap_or_default(),
                        title: p.title.clone(),
                        parent_id: p.parent_wiki_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_wiki(&self, owner_id: &str, wiki_id: &str) -> SynapseResult<WikiPage> {
        self.wikis
            .borrow()
            .get(owner_id)
            .and_then(|pages| pages.iter().find(|p| p.id.as_deref() == Some(wiki_id)).cloned())
            .ok_or_else(|| not_found("wiki"))
    }

    fn store_wiki(&self, owner_id: &str, wiki: &WikiPage) -> SynapseResult<WikiPage> {
        let mut wikis = self.wikis.borrow_mut();
        let pages = wikis.entry(owner_id.to_string()).or_default();
        match pages.iter_mut().find(|p| p.id == wiki.id) {
            Some(existing) => *existing = wiki.clone(),
            None => pages.push(wiki.clone()),
        }
        Ok(wiki.clone())
    }

    fn create_challenge(
        &self,
        project_id: &str,
        participant_team_id: &str,
    ) -> SynapseResult<Challenge> {
        let challenge = Challenge {
            id: Some(self.fresh_id("")),
            project_id: project_id.to_string(),
            participant_team_id: participant_team_id.to_string(),
            etag: None,
        };
        self.challenges.borrow_mut().push(challenge.clone());
        Ok(challenge)
    }

    fn send_message(&self, recipients: &[String], subject: &str, body: &str) -> SynapseResult<()> {
        self.sent.borrow_mut().push(SentMessage {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
