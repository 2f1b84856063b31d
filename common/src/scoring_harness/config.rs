use super::checks::{CommandScorer, CommandValidator, Scorer, Validator};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const MISSING_KEYS: &str = "You must specify 'id', 'validation_command', 'scoring_command', \
     'goldstandard_path' for each of your evaluation queues in your configuration";

/// One evaluation queue the harness works on.
pub struct QueueConfig {
    pub id: String,
    pub goldstandard_path: PathBuf,
    pub validator: Box<dyn Validator>,
    pub scorer: Box<dyn Scorer>,
}

impl QueueConfig {
    pub fn new(
        id: &str,
        goldstandard_path: impl Into<PathBuf>,
        validator: impl Validator + 'static,
        scorer: impl Scorer + 'static,
    ) -> Self {
        QueueConfig {
            id: id.to_string(),
            goldstandard_path: goldstandard_path.into(),
            validator: Box::new(validator),
            scorer: Box::new(scorer),
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("id", &self.id)
            .field("goldstandard_path", &self.goldstandard_path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct HarnessConfig {
    pub download_location: PathBuf,
    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    download_location: Option<PathBuf>,
    #[serde(default)]
    queues: Vec<RawQueue>,
}

#[derive(Debug, Deserialize)]
struct RawQueue {
    id: Option<toml::Value>,
    goldstandard_path: Option<PathBuf>,
    validation_command: Option<Vec<String>>,
    scoring_command: Option<Vec<String>>,
}

fn queue_id(value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        other => bail!("queue id must be a string or an integer, got {other}"),
    }
}

impl HarnessConfig {
    /// Read a TOML configuration. Relative paths resolve against the file's directory.
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed, or a queue misses a key.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Error reading configuration {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
            .with_context(|| format!("Error loading configuration {}", path.display()))
    }

    /// Parse configuration text, resolving relative paths against `base`.
    ///
    /// # Errors
    /// Fails on malformed TOML, a missing queue key or an empty command.
    pub fn parse(text: &str, base: &Path) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;
        if raw.queues.is_empty() {
            bail!("no evaluation queues configured");
        }

        let mut queues = Vec::with_capacity(raw.queues.len());
        for queue in raw.queues {
            let (Some(id), Some(goldstandard), Some(validation), Some(scoring)) = (
                queue.id,
                queue.goldstandard_path,
                queue.validation_command,
                queue.scoring_command,
            ) else {
                bail!(MISSING_KEYS);
            };
            let id = queue_id(&id)?;
            if validation.is_empty() || scoring.is_empty() {
                bail!("queue {id}: commands must not be empty");
            }
            if queues.iter().any(|q: &QueueConfig| q.id == id) {
                bail!("queue {id} is configured twice");
            }
            queues.push(QueueConfig::new(
                &id,
                base.join(goldstandard),
                CommandValidator { program: validation },
                CommandScorer { program: scoring },
            ));
        }

        let download_location = base.join(raw.download_location.unwrap_or_else(|| PathBuf::from("submissions")));
        Ok(HarnessConfig {
            download_location,
            queues,
        })
    }

    /// The queues named by `ids`, or every queue when `ids` is empty.
    ///
    /// # Errors
    /// Fails if any id does not match a configured queue.
    pub fn select(&self, ids: &[String]) -> Result<Vec<&QueueConfig>> {
        if ids.is_empty() {
            return Ok(self.queues.iter().collect());
        }
        ids.iter()
            .map(|id| {
                self.queues
                    .iter()
                    .find(|q| &q.id == id)
                    .with_context(|| {
                        format!("If evaluation is specified, must match an 'id' in the configuration: {id}")
                    })
            })
            .collect()
    }
}
