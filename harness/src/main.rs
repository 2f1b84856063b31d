//! Validates and scores the submissions of a Synapse challenge, one pass per invocation.
//! Meant to be run on a schedule; a lock keeps passes from overlapping.

#![warn(clippy::all, clippy::pedantic)]

extern crate challenge_common;
use challenge_common::client_api::SynapseClient;
use challenge_common::scoring_harness::config::HarnessConfig;
use challenge_common::scoring_harness::{HarnessCommand, HarnessOptions, default_admins, run};
use challenge_common::synapse::Synapse;
use challenge_common::{DEFAULT_API_BASE, DEFAULT_MAX_RETRIES};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Mode {
    Validate,
    Score,
}

impl From<Mode> for HarnessCommand {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Validate => HarnessCommand::Validate,
            Mode::Score => HarnessCommand::Score,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Synapse id of the challenge project
    challenge_id: String,

    /// TOML file describing the evaluation queues
    config: PathBuf,

    /// Validate or score
    #[arg(value_enum)]
    mode: Mode,

    /// Only process these queues
    #[arg(long = "evaluation")]
    evaluations: Vec<String>,

    /// Users to notify of harness errors; defaults to the caller
    #[arg(short = 'a', long = "admin-user-ids")]
    admin_user_ids: Vec<String>,

    /// Send error notifications to the admins
    #[arg(long)]
    notifications: bool,

    /// Send results to the submitters
    #[arg(long)]
    send_messages: bool,

    /// Tell submitters their submission was accepted
    #[arg(long)]
    acknowledge_receipt: bool,

    /// Don't store statuses or send messages
    #[arg(long)]
    dry_run: bool,

    /// Delete downloaded submission files after each pass
    #[arg(long)]
    remove_cache: bool,

    /// Where the lock is kept; defaults to the directory of the configuration
    #[arg(long)]
    lock_dir: Option<PathBuf>,

    /// Synapse personal access token
    #[arg(long, env = "SYNAPSE_AUTH_TOKEN", hide_env_values = true)]
    auth_token: String,

    /// The base API URL to connect to
    #[arg(long, default_value = DEFAULT_API_BASE, env = "SYNAPSE_API_BASE")]
    api_base: String,

    /// Show debug output
    #[arg(long)]
    debug: bool,
}

fn prepare(syn: &dyn Synapse, cli: &Cli) -> Result<(HarnessConfig, HarnessOptions)> {
    let challenge = syn.get_entity(&cli.challenge_id).with_context(|| {
        format!(
            "Must provide correct Synapse id of challenge site or have permissions to access it: {}",
            cli.challenge_id
        )
    })?;
    let admin_user_ids = default_admins(syn, cli.admin_user_ids.clone())?;
    let config = HarnessConfig::from_path(&cli.config)?;

    let opts = HarnessOptions {
        challenge_id: cli.challenge_id.clone(),
        challenge_name: challenge.name,
        admin_user_ids,
        download_location: config.download_location.clone(),
        notifications: cli.notifications,
        send_messages: cli.send_messages,
        acknowledge_receipt: cli.acknowledge_receipt,
        dry_run: cli.dry_run,
        remove_cache: cli.remove_cache,
    };
    Ok((config, opts))
}

fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up logger
    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("=================================================");
    info!("STARTING HARNESS");

    let syn = match SynapseClient::login(&cli.api_base, &cli.auth_token, DEFAULT_MAX_RETRIES) {
        Ok(syn) => syn,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let (config, opts) = match prepare(&syn, &cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    let queues = match config.select(&cli.evaluations) {
        Ok(queues) => queues,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let lock_dir = cli.lock_dir.clone().unwrap_or_else(|| {
        cli.config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf()
    });
    let status = run(&syn, &queues, cli.mode.into(), &opts, &lock_dir);

    info!("ENDING HARNESS");
    info!("=================================================");
    ExitCode::from(status.exit_code())
}
