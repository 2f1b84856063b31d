//! Synchronous REST client for the Synapse platform with retry handling.

use crate::synapse::{Synapse, SynapseError, SynapseResult};
use crate::{
    AccessControlList, CLIENT_REQUEST_TIMEOUT_SECS, CLIENT_VERSION, Challenge, Entity, Evaluation,
    FILE_TYPE, FOLDER_TYPE, PROJECT_TYPE, QueryPage, Submission, SubmissionBundle,
    SubmissionState, SubmissionStatus, Team, UserProfile, WikiHeader, WikiPage,
};
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::{thread, time::Duration};

/// Page size used for every paginated listing.
const PAGE_LIMIT: usize = 100;

/// Name a transport failure and say whether another attempt may succeed.
/// Timeouts, refused connections and DNS failures are transient; a broken
/// body or undecodable payload will fail the same way again.
fn classify_transport_error(e: &reqwest::Error) -> (&'static str, bool) {
    if e.is_timeout() {
        ("timeout", true)
    } else if e.is_connect() {
        ("connection", true)
    } else if e.is_request() {
        ("request", true)
    } else if e.is_body() {
        ("body", false)
    } else if e.is_decode() {
        ("decode", false)
    } else {
        ("transport", false)
    }
}

/// Only the last component of a participant-supplied file name is used,
/// so downloads stay inside the download location.
fn local_file_name(name: &str) -> &OsStr {
    Path::new(name)
        .file_name()
        .unwrap_or_else(|| OsStr::new("submission"))
}

/// Throttling and server errors are worth another attempt.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Turn any non-success response into a [`SynapseError::Http`].
fn check_status(response: Response) -> SynapseResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(SynapseError::Http {
        status: status.as_u16(),
        message,
    })
}

fn decode<T: DeserializeOwned>(response: Response) -> SynapseResult<T> {
    let response = check_status(response)?;
    response
        .json::<T>()
        .map_err(|e| SynapseError::Decode(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaginatedResults<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    total_number_of_results: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildHeader {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildrenPage {
    #[serde(default)]
    page: Vec<ChildHeader>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChildrenRequest<'a> {
    parent_id: &'a str,
    include_types: [&'static str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedHandles {
    list: Vec<Map<String, Value>>,
}

/// A blocking Synapse client authenticated with a personal access token.
pub struct SynapseClient {
    http: Client,
    repo_endpoint: String,
    file_endpoint: String,
    auth_token: String,
    max_retries: u32,
}

impl SynapseClient {
    /// Build a client without contacting the platform.
    ///
    /// # Errors
    /// Returns an error if no token is given or the HTTP client cannot be built.
    pub fn new(api_base: &str, auth_token: &str, max_retries: u32) -> SynapseResult<Self> {
        if auth_token.trim().is_empty() {
            return Err(SynapseError::Authentication(
                "Must provide a Synapse personal access token".to_string(),
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(CLIENT_REQUEST_TIMEOUT_SECS))
            .user_agent(format!("challengeutils/{CLIENT_VERSION}"))
            .build()
            .map_err(|e| SynapseError::Network(format!("Failed to build HTTP client: {e}")))?;
        let api_base = api_base.trim_end_matches('/');
        Ok(SynapseClient {
            http,
            repo_endpoint: format!("{api_base}/repo/v1"),
            file_endpoint: format!("{api_base}/file/v1"),
            auth_token: auth_token.to_string(),
            max_retries: max_retries.max(1),
        })
    }

    /// Build a client and confirm the token by fetching the caller's profile.
    ///
    /// # Errors
    /// Returns [`SynapseError::Authentication`] when the platform rejects the token.
    pub fn login(api_base: &str, auth_token: &str, max_retries: u32) -> SynapseResult<Self> {
        let client = SynapseClient::new(api_base, auth_token, max_retries)?;
        match client.own_profile() {
            Ok(profile) => {
                debug!("Logged in as {} ({})", profile.user_name, profile.owner_id);
                Ok(client)
            }
            Err(SynapseError::Http { status, message }) if status == 401 || status == 403 => {
                Err(SynapseError::Authentication(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Send `request_fn` until the answer is not throttled or a server error,
    /// waiting 1, 2, 4... seconds between attempts, at most `max_retries`
    /// attempts in all. The last response goes to `process_response`
    /// whatever its status, so a 412 comes back on the first try.
    fn retry_request<F, P, T>(&self, request_fn: F, process_response: P) -> SynapseResult<T>
    where
        F: Fn() -> Result<Response, reqwest::Error>,
        P: FnOnce(Response) -> SynapseResult<T>,
    {
        let max_retries = self.max_retries;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match request_fn() {
                Ok(response) => {
                    if is_retryable_status(response.status()) && attempts < max_retries {
                        let sleep_secs = 2_u64.pow(attempts.saturating_sub(1));
                        let status = response.status();
                        let body = response.text().unwrap_or_default();
                        warn!(
                            "Platform answered {status} ({body}), retrying in {sleep_secs} seconds... (attempt {attempts}/{max_retries})"
                        );
                        thread::sleep(Duration::from_secs(sleep_secs));
                        continue;
                    }
                    return process_response(response);
                }
                Err(e) => {
                    let (kind, transient) = classify_transport_error(&e);
                    if transient && attempts < max_retries {
                        let sleep_secs = 2_u64.pow(attempts.saturating_sub(1));
                        warn!(
                            "{kind} failure, retrying in {sleep_secs} seconds... (attempt {attempts}/{max_retries}): {e}"
                        );
                        thread::sleep(Duration::from_secs(sleep_secs));
                        continue;
                    }
                    return Err(SynapseError::Network(format!(
                        "{kind} failure after {attempts} attempts: {e}"
                    )));
                }
            }
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}{}", self.repo_endpoint, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.auth_token)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> SynapseResult<T> {
        let url = self.repo_url(path);
        self.retry_request(|| self.authed(self.http.get(&url)).send(), decode)
    }

    fn get_json_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SynapseResult<T> {
        let url = self.repo_url(path);
        self.retry_request(
            || self.authed(self.http.get(&url)).query(query).send(),
            decode,
        )
    }

    fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SynapseResult<T> {
        let url = self.repo_url(path);
        self.retry_request(|| self.authed(self.http.post(&url)).json(body).send(), decode)
    }

    fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SynapseResult<T> {
        let url = self.repo_url(path);
        self.retry_request(|| self.authed(self.http.put(&url)).json(body).send(), decode)
    }

    /// Walk a limit/offset listing until every result has been collected.
    fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        extra_query: &[(&str, String)],
    ) -> SynapseResult<Vec<T>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let mut query: Vec<(&str, String)> = extra_query.to_vec();
            query.push(("limit", PAGE_LIMIT.to_string()));
            query.push(("offset", offset.to_string()));
            let page: PaginatedResults<T> = self.get_json_with(path, &query)?;
            let fetched = page.results.len();
            all.extend(page.results);
            offset += fetched;
            if fetched == 0 || offset >= page.total_number_of_results {
                return Ok(all);
            }
        }
    }

    fn entity_children(&self, parent_id: &str) -> SynapseResult<Vec<ChildHeader>> {
        let mut children = Vec::new();
        let mut token = None;
        loop {
            let request = ChildrenRequest {
                parent_id,
                include_types: ["folder", "file"],
                next_page_token: token,
            };
            let page: ChildrenPage = self.post_json("/entity/children", &request)?;
            children.extend(page.page);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(children),
            }
        }
    }

    /// Recreate `source` under `destination`: folders are rebuilt and files
    /// point at the same file handle.
    fn copy_entity(&self, source: &Entity, destination_id: &str) -> SynapseResult<()> {
        let source_id = source.id.clone().unwrap_or_default();
        match source.concrete_type.as_str() {
            FOLDER_TYPE => {
                let folder = self.create_entity(&Entity::folder(&source.name, destination_id))?;
                let folder_id = folder.id.ok_or_else(|| {
                    SynapseError::Decode(format!("created folder {} has no id", source.name))
                })?;
                self.copy_children(&source_id, &folder_id)
            }
            FILE_TYPE => {
                let copy = Entity {
                    name: source.name.clone(),
                    concrete_type: FILE_TYPE.to_string(),
                    parent_id: Some(destination_id.to_string()),
                    data_file_handle_id: source.data_file_handle_id.clone(),
                    ..Default::default()
                };
                self.create_entity(&copy)?;
                Ok(())
            }
            other => {
                warn!("Skipping {source_id} ({other}): only folders and files are copied");
                Ok(())
            }
        }
    }

    fn copy_children(&self, source_id: &str, destination_id: &str) -> SynapseResult<()> {
        for child in self.entity_children(source_id)? {
            debug!("Copying {} ({}) into {destination_id}", child.name, child.id);
            let entity = self.get_entity(&child.id)?;
            self.copy_entity(&entity, destination_id)?;
        }
        Ok(())
    }

    /// Download the file attached to a submission. Returns `None` for
    /// submissions without a file, such as Docker submissions.
    fn download_submission_file(
        &self,
        submission: &Submission,
        download_location: &Path,
    ) -> SynapseResult<Option<PathBuf>> {
        let Some((handle_id, file_name)) = submission.file_handle() else {
            return Ok(None);
        };
        let url = self.repo_url(&format!(
            "/evaluation/submission/{}/file/{handle_id}",
            submission.id
        ));
        let presigned = self.retry_request(
            || {
                self.authed(self.http.get(&url))
                    .query(&[("redirect", "false")])
                    .send()
            },
            |response| {
                check_status(response)?
                    .text()
                    .map_err(|e| SynapseError::Decode(e.to_string()))
            },
        )?;

        fs::create_dir_all(download_location)?;
        let path = download_location.join(local_file_name(&file_name));
        self.retry_request(
            || self.http.get(presigned.trim()).send(),
            |response| {
                let mut response = check_status(response)?;
                let mut file = File::create(&path)?;
                response
                    .copy_to(&mut file)
                    .map_err(|e| SynapseError::Network(e.to_string()))?;
                Ok(())
            },
        )?;
        debug!("Downloaded submission {} to {}", submission.id, path.display());
        Ok(Some(path))
    }

    /// Upload a message body so it can be referenced by a message.
    fn upload_message_body(&self, body: &str) -> SynapseResult<String> {
        let url = format!("{}/fileHandle", self.file_endpoint);
        let handles: UploadedHandles = self.retry_request(
            || {
                let part = Part::bytes(body.as_bytes().to_vec())
                    .file_name("message.txt")
                    .mime_str("text/plain")?;
                let form = Form::new().part("file", part);
                self.authed(self.http.post(&url)).multipart(form).send()
            },
            decode,
        )?;
        handles
            .list
            .first()
            .and_then(|h| h.get("id"))
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| SynapseError::Decode("upload returned no file handle".to_string()))
    }
}

impl Synapse for SynapseClient {
    fn own_profile(&self) -> SynapseResult<UserProfile> {
        self.get_json("/userProfile")
    }

    fn user_profile(&self, user_id: &str) -> SynapseResult<UserProfile> {
        self.get_json(&format!("/userProfile/{user_id}"))
    }

    fn principal_id_for_user_name(&self, user_name: &str) -> SynapseResult<Option<String>> {
        let body = json!({"alias": user_name, "type": "USER_NAME"});
        match self.post_json::<_, Value>("/principal/alias", &body) {
            Ok(found) => Ok(found.get("principalId").map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn team(&self, team_id: &str) -> SynapseResult<Team> {
        self.get_json(&format!("/team/{team_id}"))
    }

    fn team_by_name(&self, name: &str) -> SynapseResult<Option<Team>> {
        let teams: Vec<Team> = self.get_all_pages("/teams", &[("fragment", name.to_string())])?;
        Ok(teams.into_iter().find(|t| t.name == name))
    }

    fn create_team(&self, team: &Team) -> SynapseResult<Team> {
        self.post_json("/team", team)
    }

    fn get_entity(&self, entity_id: &str) -> SynapseResult<Entity> {
        self.get_json(&format!("/entity/{entity_id}"))
    }

    fn create_entity(&self, entity: &Entity) -> SynapseResult<Entity> {
        self.post_json("/entity", entity)
    }

    fn copy_entity_contents(&self, source_id: &str, destination_id: &str) -> SynapseResult<()> {
        let source = self.get_entity(source_id)?;
        match source.concrete_type.as_str() {
            PROJECT_TYPE | FOLDER_TYPE => self.copy_children(source_id, destination_id),
            _ => self.copy_entity(&source, destination_id),
        }
    }

    fn entity_acl(&self, entity_id: &str) -> SynapseResult<AccessControlList> {
        let benefactor: Value = self.get_json(&format!("/entity/{entity_id}/benefactor"))?;
        if benefactor.get("id").and_then(Value::as_str) == Some(entity_id) {
            self.get_json(&format!("/entity/{entity_id}/acl"))
        } else {
            Ok(AccessControlList {
                id: entity_id.to_string(),
                ..Default::default()
            })
        }
    }

    fn store_entity_acl(&self, acl: &AccessControlList) -> SynapseResult<AccessControlList> {
        let path = format!("/entity/{}/acl", acl.id);
        if acl.etag.is_some() {
            self.put_json(&path, acl)
        } else {
            self.post_json(&path, acl)
        }
    }

    fn get_evaluation(&self, evaluation_id: &str) -> SynapseResult<Evaluation> {
        self.get_json(&format!("/evaluation/{evaluation_id}"))
    }

    fn store_evaluation(&self, evaluation: &Evaluation) -> SynapseResult<Evaluation> {
        self.put_json(&format!("/evaluation/{}", evaluation.id), evaluation)
    }

    fn evaluations_for_project(&self, project_id: &str) -> SynapseResult<Vec<Evaluation>> {
        self.get_all_pages(&format!("/entity/{project_id}/evaluation"), &[])
    }

    fn evaluation_acl(&self, evaluation_id: &str) -> SynapseResult<AccessControlList> {
        self.get_json(&format!("/evaluation/{evaluation_id}/acl"))
    }

    fn store_evaluation_acl(&self, acl: &AccessControlList) -> SynapseResult<AccessControlList> {
        self.put_json("/evaluation/acl", acl)
    }

    fn submission_bundles(
        &self,
        evaluation_id: &str,
        status: SubmissionState,
    ) -> SynapseResult<Vec<SubmissionBundle>> {
        self.get_all_pages(
            &format!("/evaluation/{evaluation_id}/submission/bundle/all"),
            &[("status", status.as_str().to_string())],
        )
    }

    fn get_submission(
        &self,
        submission_id: &str,
        download_location: Option<&Path>,
    ) -> SynapseResult<Submission> {
        let mut submission: Submission =
            self.get_json(&format!("/evaluation/submission/{submission_id}"))?;
        if let Some(location) = download_location {
            submission.file_path = self.download_submission_file(&submission, location)?;
        }
        Ok(submission)
    }

    fn submission_status(&self, submission_id: &str) -> SynapseResult<SubmissionStatus> {
        self.get_json(&format!("/evaluation/submission/{submission_id}/status"))
    }

    fn store_submission_status(
        &self,
        status: &SubmissionStatus,
    ) -> SynapseResult<SubmissionStatus> {
        self.put_json(&format!("/evaluation/submission/{}/status", status.id), status)
    }

    fn query_page(&self, query: &str) -> SynapseResult<QueryPage> {
        self.get_json_with("/evaluation/submission/query", &[("query", query.to_string())])
    }

    fn wiki_headers(&self, owner_id: &str) -> SynapseResult<Vec<WikiHeader>> {
        match self.get_all_pages(&format!("/entity/{owner_id}/wikiheadertree"), &[]) {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    fn get_wiki(&self, owner_id: &str, wiki_id: &str) -> SynapseResult<WikiPage> {
        self.get_json(&format!("/entity/{owner_id}/wiki/{wiki_id}"))
    }

    fn store_wiki(&self, owner_id: &str, wiki: &WikiPage) -> SynapseResult<WikiPage> {
        match &wiki.id {
            Some(id) => self.put_json(&format!("/entity/{owner_id}/wiki/{id}"), wiki),
            None => self.post_json(&format!("/entity/{owner_id}/wiki"), wiki),
        }
    }

    fn create_challenge(
        &self,
        project_id: &str,
        participant_team_id: &str,
    ) -> SynapseResult<Challenge> {
        let challenge = Challenge {
            project_id: project_id.to_string(),
            participant_team_id: participant_team_id.to_string(),
            ..Default::default()
        };
        self.post_json("/challenge", &challenge)
    }

    fn send_message(&self, recipients: &[String], subject: &str, body: &str) -> SynapseResult<()> {
        let file_handle_id = self.upload_message_body(body)?;
        let message = json!({
            "recipients": recipients,
            "subject": subject,
            "fileHandleId": file_handle_id,
        });
        let _: Value = self.post_json("/message", &message)?;
        Ok(())
    }
}
