//! Validation and scoring functions supplied by challenge organizers.

use crate::Submission;
use anyhow::{Context, anyhow};
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::process::{Command, Output};
use thiserror::Error;

/// What a check function receives: the downloaded file, or the submission
/// itself when it has no file (Docker submissions).
#[derive(Debug, Clone, Copy)]
pub enum SubmissionInput<'a> {
    File(&'a Path),
    Submission(&'a Submission),
}

impl<'a> SubmissionInput<'a> {
    pub fn from_submission(submission: &'a Submission) -> Self {
        match &submission.file_path {
            Some(path) => SubmissionInput::File(path),
            None => SubmissionInput::Submission(submission),
        }
    }

    /// Command-line form: a file path, or `repository@digest` for Docker images.
    pub fn as_arg(&self) -> String {
        match self {
            SubmissionInput::File(path) => path.display().to_string(),
            SubmissionInput::Submission(s) => match (&s.docker_repository_name, &s.docker_digest) {
                (Some(repo), Some(digest)) => format!("{repo}@{digest}"),
                (Some(repo), None) => repo.clone(),
                _ => s.id.clone(),
            },
        }
    }
}

/// Why a check did not succeed.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The submission itself is at fault; the submitter is told why.
    #[error("{0}")]
    Rejected(String),
    /// Anything else; only the admins hear about it.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CheckResult<T> = Result<T, CheckError>;

/// Decides whether a submission is acceptable, returning a message for the submitter.
pub trait Validator {
    fn validate(&self, input: SubmissionInput<'_>, goldstandard: &Path) -> CheckResult<String>;
}

impl<F> Validator for F
where
    F: Fn(SubmissionInput<'_>, &Path) -> CheckResult<String>,
{
    fn validate(&self, input: SubmissionInput<'_>, goldstandard: &Path) -> CheckResult<String> {
        self(input, goldstandard)
    }
}

/// Metrics and a message produced by scoring a submission.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScoreReport {
    pub score: Map<String, Value>,
    #[serde(default)]
    pub message: String,
}

pub trait Scorer {
    fn score(&self, input: SubmissionInput<'_>, goldstandard: &Path) -> CheckResult<ScoreReport>;
}

impl<F> Scorer for F
where
    F: Fn(SubmissionInput<'_>, &Path) -> CheckResult<ScoreReport>,
{
    fn score(&self, input: SubmissionInput<'_>, goldstandard: &Path) -> CheckResult<ScoreReport> {
        self(input, goldstandard)
    }
}

fn run_command(program: &[String], input: SubmissionInput<'_>, goldstandard: &Path) -> anyhow::Result<Output> {
    let (exe, args) = program
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    debug!("Running {} on {}", program.join(" "), input.as_arg());
    Command::new(exe)
        .args(args)
        .arg(input.as_arg())
        .arg(goldstandard)
        .output()
        .with_context(|| format!("failed to run {exe}"))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Runs an external program as `program... <input> <goldstandard>`.
///
/// Exit 0 means valid and stdout is the message. Exit 1 is a rejection whose
/// reason is stderr, or stdout if stderr is empty. Any other exit is an
/// internal error.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    pub program: Vec<String>,
}

impl Validator for CommandValidator {
    fn validate(&self, input: SubmissionInput<'_>, goldstandard: &Path) -> CheckResult<String> {
        let output = run_command(&self.program, input, goldstandard)?;
        let stdout = lossy(&output.stdout);
        let stderr = lossy(&output.stderr);
        match output.status.code() {
            Some(0) => Ok(stdout),
            Some(1) => Err(CheckError::Rejected(if stderr.is_empty() { stdout } else { stderr })),
            _ => Err(CheckError::Internal(anyhow!(
                "validation command exited with {}: {stderr}",
                output.status
            ))),
        }
    }
}

/// Runs an external program as `program... <input> <goldstandard>` and reads
/// `{"score": {...}, "message": "..."}` from its stdout.
#[derive(Debug, Clone)]
pub struct CommandScorer {
    pub program: Vec<String>,
}

impl Scorer for CommandScorer {
    fn score(&self, input: SubmissionInput<'_>, goldstandard: &Path) -> CheckResult<ScoreReport> {
        let output = run_command(&self.program, input, goldstandard)?;
        if !output.status.success() {
            return Err(CheckError::Internal(anyhow!(
                "scoring command exited with {}: {}",
                output.status,
                lossy(&output.stderr)
            )));
        }
        let report = serde_json::from_slice(&output.stdout)
            .context("scoring command did not print a score report")?;
        Ok(report)
    }
}
