//! The validation and scoring harness.
//!
//! Each pass pulls every submission in one status bucket of a queue, runs the
//! organizer's check on it, writes the resulting status back and only then
//! notifies whoever needs to know. A failing check never stops the pass; a
//! failing platform call does, and is reported to the admins by [`run`].

pub mod checks;
pub mod config;

use crate::annotations::{Annotation, update_single_submission_status};
use crate::lock::{LockError, acquire_lock_or_fail};
use crate::messages::{self, ADMIN_DISPLAY_NAME, MessageContext};
use crate::synapse::Synapse;
use crate::{MAX_FAILURE_REASON_CHARS, Submission, SubmissionState, SubmissionStatus};
use anyhow::{Context, Result};
use checks::{CheckError, ScoreReport, Scorer, SubmissionInput, Validator};
use config::QueueConfig;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOCK_NAME: &str = "challenge";
pub const LOCK_MAX_AGE: Duration = Duration::from_secs(4 * 60 * 60);
pub const FAILURE_REASON: &str = "FAILURE_REASON";

/// Who caused a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Participant,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid { message: String },
    Invalid { reason: String, fault: Fault },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoringOutcome {
    Scored(ScoreReport),
    Failed { message: String },
}

/// Everything a pass needs besides the queue itself.
#[derive(Debug, Clone, Default)]
pub struct HarnessOptions {
    pub challenge_id: String,
    pub challenge_name: String,
    pub admin_user_ids: Vec<String>,
    pub download_location: PathBuf,
    pub notifications: bool,
    pub send_messages: bool,
    pub acknowledge_receipt: bool,
    pub dry_run: bool,
    pub remove_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessCommand {
    Validate,
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Another run holds the lock.
    Locked,
    Failed,
}

impl RunStatus {
    /// 75 is EX_TEMPFAIL from sysexits.h.
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::Locked => 75,
            RunStatus::Failed => 1,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "check panicked".to_string()
    }
}

/// Run `check`, turning panics into internal errors.
fn guarded<T>(check: impl FnOnce() -> Result<T, CheckError>) -> Result<T, CheckError> {
    panic::catch_unwind(AssertUnwindSafe(check)).unwrap_or_else(|payload| {
        Err(CheckError::Internal(anyhow::anyhow!(
            "{}",
            panic_message(payload.as_ref())
        )))
    })
}

/// Run the validator on one submission.
pub fn validate_single_submission(
    submission: &Submission,
    validator: &dyn Validator,
    goldstandard: &Path,
) -> ValidationOutcome {
    info!("validating {} {}", submission.id, submission.display_name());
    let input = SubmissionInput::from_submission(submission);
    match guarded(|| validator.validate(input, goldstandard)) {
        Ok(message) => ValidationOutcome::Valid { message },
        Err(e) => {
            error!("Exception during validation of {}: {e:#}", submission.id);
            let fault = match e {
                CheckError::Rejected(_) => Fault::Participant,
                CheckError::Internal(_) => Fault::Infrastructure,
            };
            ValidationOutcome::Invalid {
                reason: format!("{e:#}"),
                fault,
            }
        }
    }
}

/// Run the scorer on one submission.
pub fn score_single_submission(
    submission: &Submission,
    scorer: &dyn Scorer,
    goldstandard: &Path,
) -> ScoringOutcome {
    let input = SubmissionInput::from_submission(submission);
    match guarded(|| scorer.score(input, goldstandard)) {
        Ok(report) => {
            info!(
                "scored: {} {} {} {:?}",
                submission.id,
                submission.display_name(),
                submission.user_id,
                report.score
            );
            ScoringOutcome::Scored(report)
        }
        Err(e) => {
            error!(
                "Error scoring submission {} {}: {e:#}",
                submission.display_name(),
                submission.id
            );
            ScoringOutcome::Failed {
                message: format!("{e:#}"),
            }
        }
    }
}

/// The status to store after validation.
///
/// # Errors
/// Fails if `FAILURE_REASON` already exists as a private annotation.
pub fn apply_validation(
    mut status: SubmissionStatus,
    outcome: &ValidationOutcome,
) -> Result<SubmissionStatus> {
    let reason = match outcome {
        ValidationOutcome::Valid { .. } => {
            status.status = SubmissionState::Validated;
            String::new()
        }
        ValidationOutcome::Invalid { reason, .. } => {
            status.status = SubmissionState::Invalid;
            truncate(reason, MAX_FAILURE_REASON_CHARS)
        }
    };
    let add = BTreeMap::from([(FAILURE_REASON.to_string(), Annotation::new(reason, false))]);
    Ok(update_single_submission_status(status, &add, false)?)
}

/// The status to store after scoring, and the outcome to report.
///
/// Metrics are stored as private annotations. If they cannot be merged, for
/// instance because a metric key is already public, the submission is INVALID
/// and the merge error is reported like any other scoring failure.
pub fn apply_scoring(
    status: SubmissionStatus,
    outcome: ScoringOutcome,
) -> (SubmissionStatus, ScoringOutcome) {
    let report = match outcome {
        ScoringOutcome::Scored(report) => report,
        failed @ ScoringOutcome::Failed { .. } => {
            return (with_state(status, SubmissionState::Invalid), failed);
        }
    };
    let add = crate::annotations::to_submission_status_annotations(&report.score, true);
    match update_single_submission_status(status.clone(), &add, false) {
        Ok(scored) => (
            with_state(scored, SubmissionState::Scored),
            ScoringOutcome::Scored(report),
        ),
        Err(e) => {
            error!("Could not annotate submission {}: {e}", status.id);
            (
                with_state(status, SubmissionState::Invalid),
                ScoringOutcome::Failed {
                    message: e.to_string(),
                },
            )
        }
    }
}

fn with_state(mut status: SubmissionStatus, state: SubmissionState) -> SubmissionStatus {
    status.status = state;
    status
}

fn store(syn: &dyn Synapse, status: &SubmissionStatus, opts: &HarnessOptions) -> Result<()> {
    if opts.dry_run {
        info!("Dry run, not storing status {} of {}", status.status, status.id);
        return Ok(());
    }
    syn.store_submission_status(status)
        .with_context(|| format!("storing status of submission {}", status.id))?;
    Ok(())
}

fn remove_cached(submission: &Submission) {
    if let Some(path) = &submission.file_path
        && let Err(e) = fs::remove_file(path)
    {
        warn!("Could not remove {}: {e}", path.display());
    }
}

fn fetch_with_file(syn: &dyn Synapse, submission_id: &str, opts: &HarnessOptions) -> Result<Submission> {
    fs::create_dir_all(&opts.download_location).with_context(|| {
        format!("creating download location {}", opts.download_location.display())
    })?;
    syn.get_submission(submission_id, Some(&opts.download_location))
        .with_context(|| format!("fetching submission {submission_id}"))
}

/// Validate every RECEIVED submission of a queue.
///
/// # Errors
/// Platform failures abort the pass; failing checks do not.
pub fn validate(
    syn: &dyn Synapse,
    queue: &QueueConfig,
    opts: &HarnessOptions,
) -> Result<Vec<(String, ValidationOutcome)>> {
    let evaluation = syn
        .get_evaluation(&queue.id)
        .with_context(|| format!("fetching evaluation {}", queue.id))?;
    info!("Validating {} {}", evaluation.id, evaluation.name);

    let mut outcomes = Vec::new();
    for bundle in syn.submission_bundles(&evaluation.id, SubmissionState::Received)? {
        let submission = fetch_with_file(syn, &bundle.submission.id, opts)?;
        let outcome =
            validate_single_submission(&submission, queue.validator.as_ref(), &queue.goldstandard_path);
        let status = apply_validation(bundle.submission_status, &outcome)?;
        store(syn, &status, opts)?;

        let profile = syn.user_profile(&submission.user_id)?;
        let username = messages::get_user_name(&profile);
        let submission_name = submission.display_name();
        let mut ctx = MessageContext {
            username: &username,
            queue_name: &evaluation.name,
            submission_id: &submission.id,
            submission_name: &submission_name,
            challenge_id: &opts.challenge_id,
        };
        let submitter = vec![submission.user_id.clone()];
        let (message, enabled) = match &outcome {
            ValidationOutcome::Valid { .. } => (
                messages::validation_passed(submitter, &ctx),
                opts.acknowledge_receipt,
            ),
            ValidationOutcome::Invalid { reason, fault } => {
                let recipients = match fault {
                    Fault::Participant => submitter,
                    Fault::Infrastructure => {
                        ctx.username = ADMIN_DISPLAY_NAME;
                        opts.admin_user_ids.clone()
                    }
                };
                (
                    messages::validation_failed(recipients, &ctx, &truncate(reason, MAX_FAILURE_REASON_CHARS)),
                    opts.send_messages,
                )
            }
        };
        messages::dispatch(syn, &message, enabled, opts.dry_run)?;

        if opts.remove_cache && matches!(outcome, ValidationOutcome::Invalid { .. }) {
            remove_cached(&submission);
        }
        outcomes.push((submission.id, outcome));
    }
    Ok(outcomes)
}

/// Score every VALIDATED submission of a queue.
///
/// # Errors
/// Platform failures abort the pass; failing scorers do not.
pub fn score(
    syn: &dyn Synapse,
    queue: &QueueConfig,
    opts: &HarnessOptions,
) -> Result<Vec<(String, ScoringOutcome)>> {
    let evaluation = syn
        .get_evaluation(&queue.id)
        .with_context(|| format!("fetching evaluation {}", queue.id))?;
    info!("Scoring {} {}", evaluation.id, evaluation.name);

    let mut outcomes = Vec::new();
    for bundle in syn.submission_bundles(&evaluation.id, SubmissionState::Validated)? {
        let submission = fetch_with_file(syn, &bundle.submission.id, opts)?;
        let outcome = score_single_submission(&submission, queue.scorer.as_ref(), &queue.goldstandard_path);
        let (status, outcome) = apply_scoring(bundle.submission_status, outcome);
        store(syn, &status, opts)?;

        let submission_name = submission.display_name();
        let message = match &outcome {
            ScoringOutcome::Scored(report) => {
                let profile = syn.user_profile(&submission.user_id)?;
                let username = messages::get_user_name(&profile);
                let ctx = MessageContext {
                    username: &username,
                    queue_name: &evaluation.name,
                    submission_id: &submission.id,
                    submission_name: &submission_name,
                    challenge_id: &opts.challenge_id,
                };
                messages::scoring_succeeded(vec![submission.user_id.clone()], &ctx, &report.message)
            }
            ScoringOutcome::Failed { message } => {
                let ctx = MessageContext {
                    username: ADMIN_DISPLAY_NAME,
                    queue_name: &evaluation.name,
                    submission_id: &submission.id,
                    submission_name: &submission_name,
                    challenge_id: &opts.challenge_id,
                };
                messages::scoring_error(opts.admin_user_ids.clone(), &ctx, message)
            }
        };
        messages::dispatch(syn, &message, opts.send_messages, opts.dry_run)?;

        if opts.remove_cache && matches!(outcome, ScoringOutcome::Scored(_)) {
            remove_cached(&submission);
        }
        outcomes.push((submission.id, outcome));
    }
    Ok(outcomes)
}

fn run_queues(
    syn: &dyn Synapse,
    queues: &[&QueueConfig],
    command: HarnessCommand,
    opts: &HarnessOptions,
) -> Result<()> {
    for queue in queues {
        match command {
            HarnessCommand::Validate => {
                validate(syn, queue, opts)?;
            }
            HarnessCommand::Score => {
                score(syn, queue, opts)?;
            }
        }
    }
    Ok(())
}

/// Run `command` over `queues` while holding the harness lock in `lock_dir`.
///
/// An error or panic during the run is reported to the admins (when
/// notifications are enabled) and the lock is released on every path.
pub fn run(
    syn: &dyn Synapse,
    queues: &[&QueueConfig],
    command: HarnessCommand,
    opts: &HarnessOptions,
    lock_dir: &Path,
) -> RunStatus {
    let lock = match acquire_lock_or_fail(lock_dir, LOCK_NAME, LOCK_MAX_AGE) {
        Ok(lock) => lock,
        Err(LockError::Held(path)) => {
            error!(
                "Is the scoring script already running? Can't acquire lock {}",
                path.display()
            );
            return RunStatus::Locked;
        }
        Err(e) => {
            error!("{e}");
            return RunStatus::Failed;
        }
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| run_queues(syn, queues, command, opts)))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "harness panicked: {}",
                panic_message(payload.as_ref())
            ))
        });
    let status = match result {
        Ok(()) => RunStatus::Completed,
        Err(e) => {
            error!("Error in harness: {e:#}");
            let message = messages::error_notification(
                opts.admin_user_ids.clone(),
                &opts.challenge_name,
                &format!("{e:#}"),
            );
            if let Err(send_err) = messages::dispatch(syn, &message, opts.notifications, opts.dry_run) {
                error!("Could not notify admins: {send_err}");
            }
            RunStatus::Failed
        }
    };

    if let Err(e) = lock.release() {
        warn!("{e}");
    }
    status
}

/// Admin ids to notify: the given ones, or the caller when none are given.
///
/// # Errors
/// Fails if the caller's profile cannot be fetched.
pub fn default_admins(syn: &dyn Synapse, admin_user_ids: Vec<String>) -> Result<Vec<String>> {
    if !admin_user_ids.is_empty() {
        return Ok(admin_user_ids);
    }
    Ok(vec![syn.own_profile()?.owner_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSynapse, docker_submission, file_submission};
    use checks::CheckResult;
    use serde_json::{Map, Value};

    fn always_valid(_: SubmissionInput<'_>, _: &Path) -> CheckResult<String> {
        Ok("all good".to_string())
    }

    fn reject_missing_column(_: SubmissionInput<'_>, _: &Path) -> CheckResult<String> {
        Err(CheckError::Rejected("missing column 'id'".to_string()))
    }

    fn crash(_: SubmissionInput<'_>, _: &Path) -> CheckResult<String> {
        Err(CheckError::Internal(anyhow::anyhow!("disk on fire")))
    }

    fn panics(_: SubmissionInput<'_>, _: &Path) -> CheckResult<String> {
        panic!("index out of range")
    }

    fn long_rejection(_: SubmissionInput<'_>, _: &Path) -> CheckResult<String> {
        Err(CheckError::Rejected("x".repeat(2500)))
    }

    fn needs_file(input: SubmissionInput<'_>, _: &Path) -> CheckResult<String> {
        match input {
            SubmissionInput::File(path) => Ok(path.display().to_string()),
            SubmissionInput::Submission(s) => Err(CheckError::Rejected(format!("{} has no file", s.id))),
        }
    }

    fn auc_scorer(_: SubmissionInput<'_>, _: &Path) -> CheckResult<ScoreReport> {
        let mut score = Map::new();
        score.insert("auc".to_string(), Value::from(0.75));
        score.insert("rank".to_string(), Value::from(1));
        Ok(ScoreReport {
            score,
            message: "AUC 0.75".to_string(),
        })
    }

    fn failing_scorer(_: SubmissionInput<'_>, _: &Path) -> CheckResult<ScoreReport> {
        Err(CheckError::Rejected("wrong number of rows".to_string()))
    }

    struct Setup {
        syn: FakeSynapse,
        dir: tempfile::TempDir,
        opts: HarnessOptions,
    }

    fn setup(state: SubmissionState) -> Setup {
        let syn = FakeSynapse::new();
        syn.add_evaluation("9614112", "Round 1", "syn100");
        syn.add_profile("111", "jane", Some("Jane"), Some("Doe"));
        syn.add_submission(file_submission("501", "111", "9614112", "pred.csv"), state);
        let dir = tempfile::tempdir().unwrap();
        let opts = HarnessOptions {
            challenge_id: "syn100".to_string(),
            challenge_name: "My Challenge".to_string(),
            admin_user_ids: vec!["3000".to_string()],
            download_location: dir.path().join("downloads"),
            notifications: true,
            send_messages: true,
            acknowledge_receipt: true,
            ..Default::default()
        };
        Setup { syn, dir, opts }
    }

    fn queue(validator: impl Validator + 'static, scorer: impl Scorer + 'static) -> QueueConfig {
        QueueConfig::new("9614112", "truth.csv", validator, scorer)
    }

    #[test_log::test]
    fn test_valid_submission_is_validated_and_acknowledged() {
        let s = setup(SubmissionState::Received);
        let q = queue(always_valid, auc_scorer);

        let outcomes = validate(&s.syn, &q, &s.opts).unwrap();

        assert_eq!(outcomes.len(), 1);
        let status = s.syn.status_of("501").unwrap();
        assert_eq!(status.status, SubmissionState::Validated);
        assert_eq!(status.annotations.get(FAILURE_REASON), Some(&Annotation::new("", false)));

        let sent = s.syn.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["111".to_string()]);
        assert!(sent[0].body.starts_with("Hello Jane Doe,"));
    }

    #[test_log::test]
    fn test_acknowledgement_needs_flag() {
        let mut s = setup(SubmissionState::Received);
        s.opts.acknowledge_receipt = false;

        validate(&s.syn, &queue(always_valid, auc_scorer), &s.opts).unwrap();

        assert_eq!(s.syn.status_of("501").unwrap().status, SubmissionState::Validated);
        assert!(s.syn.sent_messages().is_empty());
    }

    #[test_log::test]
    fn test_rejection_goes_to_submitter() {
        let s = setup(SubmissionState::Received);

        let outcomes = validate(&s.syn, &queue(reject_missing_column, auc_scorer), &s.opts).unwrap();

        assert_eq!(
            outcomes[0].1,
            ValidationOutcome::Invalid {
                reason: "missing column 'id'".to_string(),
                fault: Fault::Participant
            }
        );
        let status = s.syn.status_of("501").unwrap();
        assert_eq!(status.status, SubmissionState::Invalid);
        assert_eq!(status.annotations.get_str(FAILURE_REASON), Some("missing column 'id'"));

        let sent = s.syn.sent_messages();
        assert_eq!(sent[0].recipients, vec!["111".to_string()]);
        assert!(sent[0].body.contains("missing column 'id'"));
    }

    #[test_log::test]
    fn test_internal_error_goes_to_admins() {
        let s = setup(SubmissionState::Received);

        validate(&s.syn, &queue(crash, auc_scorer), &s.opts).unwrap();

        assert_eq!(s.syn.status_of("501").unwrap().status, SubmissionState::Invalid);
        let sent = s.syn.sent_messages();
        assert_eq!(sent[0].recipients, vec!["3000".to_string()]);
        assert!(sent[0].body.starts_with("Hello Challenge Administrator,"));
    }

    #[test_log::test]
    fn test_panic_is_captured_as_internal() {
        let submission = file_submission("1", "2", "3", "pred.csv");

        let outcome = validate_single_submission(&submission, &panics, Path::new("truth.csv"));

        assert_eq!(
            outcome,
            ValidationOutcome::Invalid {
                reason: "index out of range".to_string(),
                fault: Fault::Infrastructure
            }
        );
    }

    #[test_log::test]
    fn test_failure_reason_is_truncated() {
        let s = setup(SubmissionState::Received);

        validate(&s.syn, &queue(long_rejection, auc_scorer), &s.opts).unwrap();

        let status = s.syn.status_of("501").unwrap();
        let reason = status.annotations.get_str(FAILURE_REASON).unwrap();
        assert_eq!(reason.chars().count(), MAX_FAILURE_REASON_CHARS);
    }

    #[test_log::test]
    fn test_file_and_docker_inputs() {
        let s = setup(SubmissionState::Received);
        s.syn
            .add_submission(docker_submission("502", "111", "9614112"), SubmissionState::Received);

        let outcomes = validate(&s.syn, &queue(needs_file, auc_scorer), &s.opts).unwrap();

        assert!(matches!(outcomes[0].1, ValidationOutcome::Valid { ref message } if message.ends_with("submission-501")));
        assert!(matches!(outcomes[1].1, ValidationOutcome::Invalid { fault: Fault::Participant, .. }));
    }

    #[test_log::test]
    fn test_store_failure_sends_nothing() {
        let s = setup(SubmissionState::Received);
        s.syn.fail_store_status.set(true);

        let result = validate(&s.syn, &queue(always_valid, auc_scorer), &s.opts);

        assert!(result.is_err());
        assert!(s.syn.sent_messages().is_empty());
    }

    #[test_log::test]
    fn test_dry_run_stores_and_sends_nothing() {
        let mut s = setup(SubmissionState::Received);
        s.opts.dry_run = true;

        let outcomes = validate(&s.syn, &queue(reject_missing_column, auc_scorer), &s.opts).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(s.syn.stored_statuses.borrow().is_empty());
        assert_eq!(s.syn.status_of("501").unwrap().status, SubmissionState::Received);
        assert!(s.syn.sent_messages().is_empty());
    }

    #[test_log::test]
    fn test_remove_cache_after_invalid() {
        let mut s = setup(SubmissionState::Received);
        s.opts.remove_cache = true;

        validate(&s.syn, &queue(reject_missing_column, auc_scorer), &s.opts).unwrap();

        assert!(!s.opts.download_location.join("submission-501").exists());
    }

    #[test_log::test]
    fn test_scoring_stores_private_metrics() {
        let s = setup(SubmissionState::Validated);

        let outcomes = score(&s.syn, &queue(always_valid, auc_scorer), &s.opts).unwrap();

        assert!(matches!(outcomes[0].1, ScoringOutcome::Scored(_)));
        let status = s.syn.status_of("501").unwrap();
        assert_eq!(status.status, SubmissionState::Scored);
        assert_eq!(status.annotations.get("auc"), Some(&Annotation::new(0.75, true)));
        assert_eq!(status.annotations.get("rank"), Some(&Annotation::new(1_i64, true)));

        let sent = s.syn.sent_messages();
        assert_eq!(sent[0].recipients, vec!["111".to_string()]);
        assert!(sent[0].body.contains("AUC 0.75"));
    }

    #[test_log::test]
    fn test_scoring_failure_is_invalid_and_goes_to_admins() {
        let s = setup(SubmissionState::Validated);

        score(&s.syn, &queue(always_valid, failing_scorer), &s.opts).unwrap();

        let status = s.syn.status_of("501").unwrap();
        assert_eq!(status.status, SubmissionState::Invalid);
        assert!(status.annotations.is_empty());

        let sent = s.syn.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["3000".to_string()]);
        assert!(sent[0].body.contains("wrong number of rows"));
        assert!(sent[0].body.contains("syn100"));
    }

    #[test_log::test]
    fn test_public_metric_conflict_does_not_stop_the_queue() {
        let s = setup(SubmissionState::Validated);
        s.syn
            .add_submission(file_submission("502", "111", "9614112", "pred.csv"), SubmissionState::Validated);
        s.syn
            .statuses
            .borrow_mut()
            .get_mut("501")
            .unwrap()
            .annotations
            .entries
            .insert("auc".to_string(), Annotation::new(0.1, false));

        let outcomes = score(&s.syn, &queue(always_valid, auc_scorer), &s.opts).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].1, ScoringOutcome::Failed { ref message } if message.contains("auc")));
        assert!(matches!(outcomes[1].1, ScoringOutcome::Scored(_)));

        let first = s.syn.status_of("501").unwrap();
        assert_eq!(first.status, SubmissionState::Invalid);
        assert_eq!(first.annotations.get("auc"), Some(&Annotation::new(0.1, false)));
        let second = s.syn.status_of("502").unwrap();
        assert_eq!(second.status, SubmissionState::Scored);
        assert_eq!(second.annotations.get("auc"), Some(&Annotation::new(0.75, true)));

        let sent = s.syn.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipients, vec!["3000".to_string()]);
        assert!(sent[0].body.starts_with("Hello Challenge Administrator,"));
        assert_eq!(sent[1].recipients, vec!["111".to_string()]);
    }

    #[test_log::test]
    fn test_only_matching_bucket_is_processed() {
        let s = setup(SubmissionState::Validated);

        let outcomes = validate(&s.syn, &queue(always_valid, auc_scorer), &s.opts).unwrap();

        assert!(outcomes.is_empty());
        assert_eq!(
            *s.syn.bundle_calls.borrow(),
            vec![("9614112".to_string(), SubmissionState::Received)]
        );
    }

    #[test_log::test]
    fn test_run_notifies_admins_on_error() {
        let s = setup(SubmissionState::Received);
        let q = QueueConfig::new("404", "truth.csv", always_valid, auc_scorer);

        let status = run(&s.syn, &[&q], HarnessCommand::Validate, &s.opts, s.dir.path());

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(status.exit_code(), 1);
        let sent = s.syn.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["3000".to_string()]);
        assert!(sent[0].subject.contains("My Challenge"));
        assert!(!s.dir.path().join("challenge.lock").exists());
    }

    #[test_log::test]
    fn test_run_reports_panic_outside_checks() {
        let s = setup(SubmissionState::Received);
        s.syn.panic_on_bundles.set(true);
        let q = queue(always_valid, auc_scorer);

        let status = run(&s.syn, &[&q], HarnessCommand::Validate, &s.opts, s.dir.path());

        assert_eq!(status, RunStatus::Failed);
        let sent = s.syn.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["3000".to_string()]);
        assert!(sent[0].body.contains("harness panicked"));
        assert!(!s.dir.path().join("challenge.lock").exists());
    }

    #[test_log::test]
    fn test_run_when_locked() {
        let s = setup(SubmissionState::Received);
        let q = queue(always_valid, auc_scorer);
        let _held = acquire_lock_or_fail(s.dir.path(), LOCK_NAME, LOCK_MAX_AGE).unwrap();

        let status = run(&s.syn, &[&q], HarnessCommand::Validate, &s.opts, s.dir.path());

        assert_eq!(status, RunStatus::Locked);
        assert_eq!(status.exit_code(), 75);
        assert_eq!(s.syn.status_of("501").unwrap().status, SubmissionState::Received);
    }

    #[test_log::test]
    fn test_run_completes_and_releases() {
        let s = setup(SubmissionState::Received);
        let q = queue(always_valid, auc_scorer);

        let status = run(&s.syn, &[&q], HarnessCommand::Validate, &s.opts, s.dir.path());

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(status.exit_code(), 0);
        assert!(!s.dir.path().join("challenge.lock").exists());
    }

    #[test]
    fn test_default_admins() {
        let syn = FakeSynapse::new();
        assert_eq!(default_admins(&syn, vec![]).unwrap(), vec!["3000".to_string()]);
        assert_eq!(default_admins(&syn, vec!["1".to_string()]).unwrap(), vec!["1".to_string()]);
    }
}
