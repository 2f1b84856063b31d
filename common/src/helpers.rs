//! Operations on running Docker submissions.

use crate::utils::{annotate_submission, evaluation_queue_query};
use anyhow::{Result, bail};
use log::info;
use serde_json::{Map, Value};

pub const WORKFLOW_LAST_UPDATED_KEY: &str =
    "orgSagebionetworksSynapseWorkflowOrchestratorWorkflowLastUpdated";
pub const WORKFLOW_START_KEY: &str = "orgSagebionetworksSynapseWorkflowOrchestratorSubmissionStartTime";
pub const TIME_REMAINING_KEY: &str = "orgSagebionetworksSynapseWorkflowOrchestratorTimeRemaining";

const QUERY_PAGE_SIZE: usize = 20;

/// Ask the workflow orchestrator to stop every in-progress submission that
/// has been running longer than `quota_millis`, by setting its remaining
/// time to zero. Returns the ids of the submissions that were stopped.
///
/// # Errors
/// Fails if the quota is below one millisecond, or on platform errors.
pub fn kill_docker_submission_over_quota(
    syn: &dyn crate::synapse::Synapse,
    evaluation_id: &str,
    quota_millis: i64,
) -> Result<Vec<String>> {
    if quota_millis < 1 {
        bail!("quota must be larger than 1");
    }
    let query = format!(
        "select * from evaluation_{evaluation_id} where status == 'EVALUATION_IN_PROGRESS'"
    );
    let table = evaluation_queue_query(syn, &query, QUERY_PAGE_SIZE, 0)?;
    let (Some(object), Some(last_updated), Some(started)) = (
        table.column("objectId"),
        table.column(WORKFLOW_LAST_UPDATED_KEY),
        table.column(WORKFLOW_START_KEY),
    ) else {
        return Ok(Vec::new());
    };

    let millis = |row: &[Option<String>], column: usize| -> Option<i64> {
        row[column].as_deref().and_then(|v| v.parse().ok())
    };
    let mut over_quota = Vec::new();
    for row in &table.rows {
        let (Some(id), Some(updated), Some(start)) =
            (row[object].clone(), millis(row, last_updated), millis(row, started))
        else {
            continue;
        };
        if updated - start > quota_millis {
            over_quota.push(id);
        }
    }

    let mut annotations = Map::new();
    annotations.insert(TIME_REMAINING_KEY.to_string(), Value::from(0));
    for id in &over_quota {
        info!("Submission {id} is over quota, stopping it");
        annotate_submission(syn, id, &annotations, false, true)?;
    }
    Ok(over_quota)
}
