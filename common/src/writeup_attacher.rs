//! Archive participants' writeups and link them to their scored submissions.

use crate::annotations::{Annotation, update_single_submission_status};
use crate::synapse::Synapse;
use crate::{Entity, Submission, SubmissionState};
use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use std::collections::{BTreeMap, HashMap};

pub const ARCHIVED_KEY: &str = "archived";
pub const WRITEUP_KEY: &str = "writeup";
pub const ARCHIVED_WRITEUP_KEY: &str = "archived_writeup";

fn archive_name(submission: &Submission, unix_millis: i64) -> String {
    let entity_name = submission
        .entity_name()
        .unwrap_or_else(|| submission.entity_id.clone());
    format!(
        "Archived {entity_name} {unix_millis} {} {}",
        submission.id, submission.entity_id
    )
}

/// Create a project holding a copy of the submitted writeup.
///
/// # Errors
/// Propagates platform errors.
pub fn create_archive_writeup(syn: &dyn Synapse, submission: &Submission) -> Result<Entity> {
    let name = archive_name(submission, Utc::now().timestamp_millis());
    let project = syn.create_entity(&Entity::project(&name))?;
    let project_id = project.id.clone().context("archive project has no id")?;
    syn.copy_entity_contents(&submission.entity_id, &project_id)
        .with_context(|| format!("copying {} into {project_id}", submission.entity_id))?;
    info!("Archived {} as {project_id}", submission.entity_id);
    Ok(project)
}

/// Archive the writeup of one submission and return the archive's id.
///
/// A submission that already has an `archived` annotation is left alone
/// unless `rearchive` is set.
///
/// # Errors
/// Propagates platform and annotation errors.
pub fn archive_writeup(syn: &dyn Synapse, submission_id: &str, rearchive: bool) -> Result<String> {
    let submission = syn.get_submission(submission_id, None)?;
    let status = syn.submission_status(submission_id)?;
    if let Some(archived) = status.annotations.get_str(ARCHIVED_KEY)
        && !archived.is_empty()
        && !rearchive
    {
        return Ok(archived.to_string());
    }

    let project = create_archive_writeup(syn, &submission)?;
    let project_id = project.id.context("archive project has no id")?;
    let add = BTreeMap::from([(
        ARCHIVED_KEY.to_string(),
        Annotation::new(project_id.clone(), true),
    )]);
    let status = update_single_submission_status(status, &add, false)?;
    syn.store_submission_status(&status)?;
    Ok(project_id)
}

/// Archive the writeups of every submission of a queue in `status`.
///
/// Each submission is archived on its own; a failure is logged and the
/// rest carry on.
///
/// # Errors
/// Fails only if the queue or its submissions cannot be listed.
pub fn archive_writeups(
    syn: &dyn Synapse,
    evaluation_id: &str,
    status: SubmissionState,
    rearchive: bool,
) -> Result<Vec<String>> {
    let evaluation = syn.get_evaluation(evaluation_id)?;
    let bundles = syn.submission_bundles(&evaluation.id, status)?;
    let mut archived = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        match archive_writeup(syn, &bundle.submission.id, rearchive) {
            Ok(id) => archived.push(id),
            Err(e) => error!("Could not archive submission {}: {e:#}", bundle.submission.id),
        }
    }
    Ok(archived)
}

fn submitter(submission: &Submission) -> &str {
    submission.team_id.as_deref().unwrap_or(&submission.user_id)
}

/// Annotate each scored submission in `submission_queue` with its submitter's
/// validated writeup from `writeup_queue`. Returns how many were annotated.
///
/// # Errors
/// Propagates platform and annotation errors.
pub fn attach_writeup(syn: &dyn Synapse, writeup_queue: &str, submission_queue: &str) -> Result<usize> {
    let mut writeups: HashMap<String, (String, String)> = HashMap::new();
    for bundle in syn.submission_bundles(writeup_queue, SubmissionState::Validated)? {
        let archived = bundle
            .submission_status
            .annotations
            .get_str(ARCHIVED_KEY)
            .unwrap_or_default()
            .to_string();
        writeups.insert(
            submitter(&bundle.submission).to_string(),
            (bundle.submission.entity_id.clone(), archived),
        );
    }

    let mut attached = 0;
    for bundle in syn.submission_bundles(submission_queue, SubmissionState::Scored)? {
        let Some((writeup, archived)) = writeups.get(submitter(&bundle.submission)) else {
            continue;
        };
        let add = BTreeMap::from([
            (WRITEUP_KEY.to_string(), Annotation::new(writeup.as_str(), false)),
            (ARCHIVED_WRITEUP_KEY.to_string(), Annotation::new(archived.as_str(), false)),
        ]);
        let status = update_single_submission_status(bundle.submission_status, &add, true)?;
        syn.store_submission_status(&status)?;
        attached += 1;
    }
    info!("Attached {attached} writeups to queue {submission_queue}");
    Ok(attached)
}
