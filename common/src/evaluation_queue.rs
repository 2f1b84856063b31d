//! Submission quotas on evaluation queues.

use crate::synapse::{Synapse, SynapseError};
use crate::{Evaluation, SubmissionQuota};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

const INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Can only specify round_end or round_duration")]
    EndAndDuration,
    #[error("If round_end is specified, round_start must also be specified")]
    EndWithoutStart,
    #[error("round_end must be after round_start")]
    EndBeforeStart,
    #[error("{0} is not a YEAR-MM-DDTHH:MM:SS time")]
    BadTime(String),
    #[error(transparent)]
    Synapse(#[from] SynapseError),
}

/// The requested limits, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct QuotaRequest<'a> {
    pub round_start: Option<&'a str>,
    pub round_end: Option<&'a str>,
    pub round_duration: Option<i64>,
    pub number_of_rounds: Option<i64>,
    pub submission_limit: Option<i64>,
}

fn parse_local(text: &str) -> Result<DateTime<Utc>, QuotaError> {
    let naive = NaiveDateTime::parse_from_str(text, INPUT_FORMAT)
        .map_err(|_| QuotaError::BadTime(text.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| QuotaError::BadTime(text.to_string()))
}

/// Build a quota. Start and end times are local times; the end is turned
/// into a round duration.
///
/// # Errors
/// Fails when both an end and a duration are given, when an end has no
/// start, or when the end is not after the start.
pub fn create_quota(request: &QuotaRequest) -> Result<SubmissionQuota, QuotaError> {
    if request.round_end.is_some() && request.round_duration.is_some() {
        return Err(QuotaError::EndAndDuration);
    }
    if request.round_end.is_some() && request.round_start.is_none() {
        return Err(QuotaError::EndWithoutStart);
    }

    let start = request.round_start.map(parse_local).transpose()?;
    let mut round_duration = request.round_duration;
    if let (Some(start), Some(end)) = (start, request.round_end) {
        let end = parse_local(end)?;
        if end <= start {
            return Err(QuotaError::EndBeforeStart);
        }
        round_duration = Some((end - start).num_milliseconds());
    }

    Ok(SubmissionQuota {
        first_round_start: start.map(|s| s.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
        round_duration_millis: round_duration,
        number_of_rounds: request.number_of_rounds,
        submission_limit: request.submission_limit,
    })
}

/// Replace the quota of an evaluation queue.
///
/// # Errors
/// Fails on an invalid request or a platform error.
pub fn set_evaluation_quota(
    syn: &dyn Synapse,
    evaluation_id: &str,
    request: &QuotaRequest,
) -> Result<Evaluation, QuotaError> {
    let quota = create_quota(request)?;
    let mut evaluation = syn.get_evaluation(evaluation_id)?;
    evaluation.quota = Some(quota);
    Ok(syn.store_evaluation(&evaluation)?)
}
