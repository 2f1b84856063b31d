//! Helpers behind the smaller `challengeutils` commands.

use crate::annotations::{merge_annotations, to_submission_status_annotations};
use crate::synapse::{Synapse, SynapseError, SynapseResult};
use crate::{Entity, Evaluation, SubmissionState, SubmissionStatus};
use anyhow::{Context, Result, bail};
use chrono::DateTime;
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{thread, time::Duration};

/// Status codes worth retrying an annotation update on. 412 is an etag
/// conflict, which a fresh read-modify-write resolves.
pub const ANNOTATION_RETRY_STATUS_CODES: [u16; 6] = [412, 429, 500, 502, 503, 504];

/// Rows returned by the evaluation query service, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn column_or_insert(&mut self, name: &str) -> usize {
        if let Some(index) = self.column(name) {
            return index;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.headers.len() - 1
    }

    /// Write the table as CSV with a header line.
    ///
    /// # Errors
    /// Fails if the writer fails.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.headers)?;
        for row in &self.rows {
            csv.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        csv.flush()?;
        Ok(())
    }
}

/// Run `query` page by page, `limit` rows at a time starting at `offset`,
/// until a page comes back empty.
///
/// # Errors
/// Propagates platform errors.
pub fn evaluation_queue_query(
    syn: &dyn Synapse,
    query: &str,
    limit: usize,
    offset: usize,
) -> SynapseResult<QueryTable> {
    let limit = limit.max(1);
    let mut offset = offset;
    let mut table = QueryTable::default();
    loop {
        let page = syn.query_page(&format!("{query} limit {limit} offset {offset}"))?;
        if page.rows.is_empty() {
            return Ok(table);
        }
        let columns: Vec<usize> = page
            .headers
            .iter()
            .map(|h| table.column_or_insert(h))
            .collect();
        for row in &page.rows {
            let mut values = vec![None; table.headers.len()];
            for (value, &column) in row.values.iter().zip(&columns) {
                values[column] = value.clone();
            }
            table.rows.push(values);
        }
        offset += page.rows.len();
        let total = usize::try_from(page.total_number_of_results).unwrap_or(0);
        if total > 0 && offset >= total {
            return Ok(table);
        }
    }
}

/// Name of a submitter, which is either a user or a team.
///
/// # Errors
/// Fails if the id is neither a user nor a team.
pub fn get_submitter_name(syn: &dyn Synapse, submitter_id: &str) -> SynapseResult<String> {
    match syn.user_profile(submitter_id) {
        Ok(profile) => Ok(profile.user_name),
        Err(e) if e.is_not_found() => Ok(syn.team(submitter_id)?.name),
        Err(e) => Err(e),
    }
}

fn epoch_millis_to_timestamp(value: &str) -> Option<String> {
    let millis: i64 = value.parse().ok()?;
    DateTime::from_timestamp_millis(millis).map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

/// Add a `submitterName` column and turn epoch-millisecond `createdOn` values into timestamps.
///
/// # Errors
/// Fails if a submitter name cannot be resolved.
pub fn render(syn: &dyn Synapse, table: &mut QueryTable) -> SynapseResult<()> {
    if let Some(submitter) = table.column("submitterId") {
        let name_column = table.column_or_insert("submitterName");
        for row in &mut table.rows {
            if let Some(id) = row[submitter].clone() {
                row[name_column] = Some(get_submitter_name(syn, &id)?);
            }
        }
    }
    if let Some(created) = table.column("createdOn") {
        for row in &mut table.rows {
            if let Some(converted) = row[created].as_deref().and_then(epoch_millis_to_timestamp) {
                row[created] = Some(converted);
            }
        }
    }
    Ok(())
}

/// Set the status label of a submission.
///
/// # Errors
/// Propagates platform errors.
pub fn change_submission_status(
    syn: &dyn Synapse,
    submission_id: &str,
    status: SubmissionState,
) -> SynapseResult<SubmissionStatus> {
    let mut submission_status = syn.submission_status(submission_id)?;
    submission_status.status = status;
    syn.store_submission_status(&submission_status)
}

/// Merge `values` into a submission's annotations and store the result.
/// Null values are skipped.
///
/// # Errors
/// Fails on privacy conflicts without `force`, or platform errors.
pub fn annotate_submission(
    syn: &dyn Synapse,
    submission_id: &str,
    values: &Map<String, Value>,
    is_private: bool,
    force: bool,
) -> Result<SubmissionStatus> {
    let mut status = syn.submission_status(submission_id)?;
    let add = to_submission_status_annotations(values, is_private);
    status.annotations = merge_annotations(&status.annotations, &add, force)?;
    let stored = syn.store_submission_status(&status)?;
    Ok(stored)
}

/// [`annotate_submission`] with values read from a JSON object file.
///
/// # Errors
/// Fails if the file is not a JSON object, or as [`annotate_submission`].
pub fn annotate_submission_with_json(
    syn: &dyn Synapse,
    submission_id: &str,
    json_path: &Path,
    is_private: bool,
    force: bool,
) -> Result<SubmissionStatus> {
    let text = fs::read_to_string(json_path)
        .with_context(|| format!("reading {}", json_path.display()))?;
    let values: Map<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} must hold a JSON object", json_path.display()))?;
    annotate_submission(syn, submission_id, &values, is_private, force)
}

/// Call `f` until it succeeds, retrying up to `retries` times when it fails
/// with a platform error whose status is in `status_codes`.
///
/// # Errors
/// The last error once retries run out, or any non-retryable error.
pub fn with_retry<T>(
    mut f: impl FnMut() -> Result<T>,
    wait: Duration,
    retries: u32,
    status_codes: &[u16],
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let retryable = e
                    .downcast_ref::<SynapseError>()
                    .and_then(SynapseError::status)
                    .is_some_and(|status| status_codes.contains(&status));
                if !retryable || attempt >= retries {
                    return Err(e);
                }
                attempt += 1;
                warn!("{e}, retrying in {}s ({attempt}/{retries})", wait.as_secs());
                thread::sleep(wait);
            }
        }
    }
}

/// Everything a workflow needs to know about a downloaded submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionDownload {
    pub docker_repository: Option<String>,
    pub docker_digest: Option<String>,
    pub entity_id: Option<String>,
    pub entity_version: Option<i64>,
    pub entity_type: Option<String>,
    pub evaluation_id: String,
    pub file_path: Option<PathBuf>,
}

/// Fetch a submission, downloading its file into `download_location`.
///
/// # Errors
/// Propagates platform errors.
pub fn download_submission(
    syn: &dyn Synapse,
    submission_id: &str,
    download_location: Option<&Path>,
) -> SynapseResult<SubmissionDownload> {
    let submission = syn.get_submission(submission_id, download_location)?;
    let entity = submission.entity();
    let entity_field = |key: &str| entity.as_ref().and_then(|e| e.get(key).cloned());
    Ok(SubmissionDownload {
        docker_repository: submission.docker_repository_name.clone(),
        docker_digest: submission.docker_digest.clone(),
        entity_id: entity_field("id")
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| Some(submission.entity_id.clone()).filter(|id| !id.is_empty())),
        entity_version: entity_field("versionNumber")
            .and_then(|v| v.as_i64())
            .or(submission.version_number),
        entity_type: submission.entity_type(),
        evaluation_id: submission.evaluation_id.clone(),
        file_path: submission.file_path.clone(),
    })
}

/// Evaluation queues whose content source is `project_id`.
///
/// # Errors
/// Propagates platform errors.
pub fn list_evaluations(syn: &dyn Synapse, project_id: &str) -> SynapseResult<Vec<Evaluation>> {
    let evaluations = syn.evaluations_for_project(project_id)?;
    for evaluation in &evaluations {
        info!("Evaluation- {}({})", evaluation.name, evaluation.id);
    }
    Ok(evaluations)
}

/// Create a project called `name` holding a copy of `source_id`'s contents.
///
/// # Errors
/// Fails unless `source_id` is a project.
pub fn copy_project(syn: &dyn Synapse, source_id: &str, name: &str) -> Result<Entity> {
    let source = syn.get_entity(source_id)?;
    if !source.is_project() {
        bail!("Did not pass in synapse project");
    }
    let project = syn.create_entity(&Entity::project(name))?;
    let project_id = project
        .id
        .clone()
        .context("created project has no id")?;
    syn.copy_entity_contents(source_id, &project_id)?;
    Ok(project)
}
