//! Fetch a submitter's current leading submission so a new one can be compared against it.

use crate::SubmissionState;
use crate::synapse::Synapse;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// File name the lead submission is saved under.
pub const PREVIOUS_SUBMISSION_FILE: &str = "previous_submission.csv";

fn first_value(syn: &dyn Synapse, query: &str, column: &str) -> Result<Option<String>> {
    let page = syn.query_page(&format!("{query} limit 1 offset 0"))?;
    let Some(index) = page.headers.iter().position(|h| h == column) else {
        return Ok(None);
    };
    Ok(page
        .rows
        .first()
        .and_then(|row| row.values.get(index).cloned().flatten()))
}

/// Who made `submission_id` in `queue` (an `evaluation_<id>` name).
///
/// # Errors
/// Propagates platform errors.
pub fn get_submitter_id(syn: &dyn Synapse, submission_id: &str, queue: &str) -> Result<Option<String>> {
    first_value(
        syn,
        &format!("select submitterId from {queue} where objectId == {submission_id}"),
        "submitterId",
    )
}

/// Download the newest scored submission of `submitter_id` whose
/// `cutoff_annotation` is `true`, saving it as [`PREVIOUS_SUBMISSION_FILE`].
///
/// # Errors
/// Propagates platform and file system errors.
pub fn get_submitters_lead_submission(
    syn: &dyn Synapse,
    submitter_id: &str,
    queue: &str,
    cutoff_annotation: &str,
    download_location: &Path,
) -> Result<Option<PathBuf>> {
    let query = format!(
        "select objectId from {queue} where submitterId == {submitter_id} \
         and prediction_file_status == 'SCORED' and {cutoff_annotation} == 'true' \
         order by createdOn DESC"
    );
    let Some(lead_id) = first_value(syn, &query, "objectId")? else {
        info!("Downloading no file");
        return Ok(None);
    };

    let submission = syn.get_submission(&lead_id, Some(download_location))?;
    let Some(path) = submission.file_path else {
        info!("Submission {lead_id} has no file");
        return Ok(None);
    };
    let target = download_location.join(PREVIOUS_SUBMISSION_FILE);
    fs::rename(&path, &target)
        .with_context(|| format!("moving {} to {}", path.display(), target.display()))?;
    Ok(Some(target))
}

/// For a submission in `status` VALIDATED, download its submitter's current
/// lead. Any other status downloads nothing.
///
/// # Errors
/// Propagates platform and file system errors.
pub fn download_current_lead_submission(
    syn: &dyn Synapse,
    submission_id: &str,
    status: SubmissionState,
    cutoff_annotation: &str,
    download_location: &Path,
) -> Result<Option<PathBuf>> {
    if status != SubmissionState::Validated {
        return Ok(None);
    }
    let current = syn.get_submission(submission_id, None)?;
    let queue = format!("evaluation_{}", current.evaluation_id);
    let Some(submitter_id) = get_submitter_id(syn, submission_id, &queue)? else {
        return Ok(None);
    };
    get_submitters_lead_submission(syn, &submitter_id, &queue, cutoff_annotation, download_location)
}
