//! Command line tools for running challenges on Synapse.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::too_many_lines)]

extern crate challenge_common;
use challenge_common::client_api::SynapseClient;
use challenge_common::createchallenge::create_challenge;
use challenge_common::download_current_lead::download_current_lead_submission;
use challenge_common::evaluation_queue::{QuotaRequest, set_evaluation_quota};
use challenge_common::helpers::kill_docker_submission_over_quota;
use challenge_common::messages::send_email;
use challenge_common::mirrorwiki::mirror_wiki;
use challenge_common::permissions::{
    EntityPermission, EvaluationPermission, set_entity_permissions, set_evaluation_permissions,
};
use challenge_common::synapse::Synapse;
use challenge_common::utils::{
    ANNOTATION_RETRY_STATUS_CODES, annotate_submission_with_json, change_submission_status,
    download_submission, evaluation_queue_query, list_evaluations, render, with_retry,
};
use challenge_common::writeup_attacher::{archive_writeups, attach_writeup};
use challenge_common::{CLIENT_VERSION, DEFAULT_API_BASE, DEFAULT_MAX_RETRIES, SubmissionState};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Synapse personal access token
    #[arg(long, env = "SYNAPSE_AUTH_TOKEN", hide_env_values = true)]
    auth_token: String,

    /// The base API URL to connect to
    #[arg(long, default_value = DEFAULT_API_BASE, env = "SYNAPSE_API_BASE")]
    api_base: String,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the projects and teams of a new challenge
    #[command(name = "createchallenge")]
    CreateChallenge {
        challengename: String,
        /// Use this existing project as the live site
        #[arg(long)]
        livesiteid: Option<String>,
    },

    /// Mirror wiki pages of one project onto the pages of the same title in another
    #[command(name = "mirrorwiki")]
    MirrorWiki {
        /// Project whose wiki changes are staged
        entityid: String,
        /// Project whose wiki is updated
        destinationid: String,
        /// Update pages even if they are the same
        #[arg(long)]
        forceupdate: bool,
        /// Only show which pages would change
        #[arg(long)]
        dryrun: bool,
    },

    /// Query an evaluation queue and print the results as CSV
    Query {
        uri: String,
        /// Write the results here instead of stdout
        #[arg(long)]
        outputfile: Option<PathBuf>,
        /// Show submitter names and readable creation times
        #[arg(long)]
        render: bool,
        /// Records per request
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Record offset to start from
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Change the status of a submission
    #[command(name = "changestatus")]
    ChangeStatus {
        submissionid: String,
        #[arg(value_enum)]
        status: SubmissionState,
    },

    /// Attach writeups to the scored submissions of the main queue
    #[command(name = "attachwriteup")]
    AttachWriteup {
        writeupqueue: String,
        submissionqueue: String,
    },

    /// Archive the writeups submitted to a queue
    #[command(name = "archivewriteups")]
    ArchiveWriteups {
        evaluationid: String,
        #[arg(long, value_enum, default_value = "VALIDATED")]
        status: SubmissionState,
        /// Archive again even if an archive exists
        #[arg(long)]
        rearchive: bool,
    },

    /// Set the permissions of an entity; use `public` for everyone
    #[command(name = "setentityacl")]
    SetEntityAcl {
        entityid: String,
        principalid: String,
        #[arg(value_enum)]
        permission_level: EntityPermission,
    },

    /// Set the permissions of an evaluation queue; use `public` for everyone
    #[command(name = "setevaluationacl")]
    SetEvaluationAcl {
        evaluationid: String,
        principalid: String,
        #[arg(value_enum)]
        permission_level: EvaluationPermission,
    },

    /// Replace the quota of an evaluation queue
    #[command(name = "setevaluationquota")]
    SetEvaluationQuota {
        evaluationid: String,
        /// Round start, local time, YEAR-MM-DDTHH:MM:SS
        #[arg(long = "round_start")]
        round_start: Option<String>,
        /// Round end, local time, YEAR-MM-DDTHH:MM:SS
        #[arg(long = "round_end", conflicts_with = "round_duration")]
        round_end: Option<String>,
        /// Round duration in milliseconds
        #[arg(long = "round_duration")]
        round_duration: Option<i64>,
        /// Number of rounds
        #[arg(long = "num_rounds")]
        num_rounds: Option<i64>,
        /// Submissions allowed per team
        #[arg(long = "sub_limit")]
        sub_limit: Option<i64>,
    },

    /// List the evaluation queues of a project
    #[command(name = "listevaluations")]
    ListEvaluations { projectid: String },

    /// Download a submission and describe it as JSON
    #[command(name = "downloadsubmission")]
    DownloadSubmission {
        submissionid: String,
        #[arg(long = "download_location", default_value = ".")]
        download_location: PathBuf,
        /// Write the description to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Download a participant's current leading submission
    #[command(name = "download_current_lead_submission")]
    DownloadCurrentLeadSubmission {
        #[arg(short = 'i', long = "submissionid")]
        submissionid: String,
        #[arg(short = 's', long, value_enum)]
        status: SubmissionState,
        #[arg(short = 'a', long = "cutoff_annotation", default_value = "met_cutoff")]
        cutoff_annotation: String,
    },

    /// Annotate a submission with a JSON file of key/value pairs
    #[command(name = "annotatesubmission")]
    AnnotateSubmission {
        submissionid: String,
        annotation_values: PathBuf,
        /// Make the annotations public
        #[arg(short = 'p', long = "to_public")]
        to_public: bool,
        /// Change the privacy of existing keys
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Send a Synapse message
    #[command(name = "sendemail")]
    SendEmail {
        #[arg(long, num_args = 1.., required = true)]
        userids: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        message: String,
    },

    /// Stop Docker submissions that ran longer than the quota
    #[command(name = "killdockeroverquota")]
    KillDockerOverQuota {
        evaluationid: String,
        /// Time quota in milliseconds
        quota: i64,
    },
}

fn run(syn: &dyn Synapse, command: Command) -> Result<()> {
    match command {
        Command::CreateChallenge {
            challengename,
            livesiteid,
        } => {
            let components = create_challenge(syn, &challengename, livesiteid.as_deref())?;
            println!("\n{}", components.summary(&challengename));
        }
        Command::MirrorWiki {
            entityid,
            destinationid,
            forceupdate,
            dryrun,
        } => {
            let report = mirror_wiki(syn, &entityid, &destinationid, forceupdate, dryrun)?;
            for title in &report.updated {
                println!("{} {title}", if dryrun { "Would update" } else { "Updated" });
            }
        }
        Command::Query {
            uri,
            outputfile,
            render: should_render,
            limit,
            offset,
        } => {
            let mut table = evaluation_queue_query(syn, &uri, limit, offset)?;
            if should_render {
                render(syn, &mut table)?;
            }
            match outputfile {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    table.write_csv(file)?;
                }
                None => table.write_csv(std::io::stdout().lock())?,
            }
        }
        Command::ChangeStatus {
            submissionid,
            status,
        } => {
            let stored = change_submission_status(syn, &submissionid, status)?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Command::AttachWriteup {
            writeupqueue,
            submissionqueue,
        } => {
            let attached = attach_writeup(syn, &writeupqueue, &submissionqueue)?;
            println!("Attached {attached} writeups");
        }
        Command::ArchiveWriteups {
            evaluationid,
            status,
            rearchive,
        } => {
            for id in archive_writeups(syn, &evaluationid, status, rearchive)? {
                println!("{id}");
            }
        }
        Command::SetEntityAcl {
            entityid,
            principalid,
            permission_level,
        } => {
            let acl = set_entity_permissions(syn, &entityid, Some(&principalid), permission_level)?;
            println!("{}", serde_json::to_string_pretty(&acl)?);
        }
        Command::SetEvaluationAcl {
            evaluationid,
            principalid,
            permission_level,
        } => {
            let acl =
                set_evaluation_permissions(syn, &evaluationid, Some(&principalid), permission_level)?;
            println!("{}", serde_json::to_string_pretty(&acl)?);
        }
        Command::SetEvaluationQuota {
            evaluationid,
            round_start,
            round_end,
            round_duration,
            num_rounds,
            sub_limit,
        } => {
            let request = QuotaRequest {
                round_start: round_start.as_deref(),
                round_end: round_end.as_deref(),
                round_duration,
                number_of_rounds: num_rounds,
                submission_limit: sub_limit,
            };
            let evaluation = set_evaluation_quota(syn, &evaluationid, &request)?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        Command::ListEvaluations { projectid } => {
            list_evaluations(syn, &projectid)?;
        }
        Command::DownloadSubmission {
            submissionid,
            download_location,
            output,
        } => {
            let mut download = download_submission(syn, &submissionid, Some(&download_location))?;
            match output {
                Some(output) => {
                    let renamed = PathBuf::from(format!("submission-{submissionid}"));
                    if let Some(path) = &download.file_path {
                        fs::rename(path, &renamed)
                            .with_context(|| format!("moving {}", path.display()))?;
                    }
                    download.file_path = Some(renamed);
                    fs::write(&output, serde_json::to_string(&download)?)
                        .with_context(|| format!("writing {}", output.display()))?;
                    info!("{}", output.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&download)?),
            }
        }
        Command::DownloadCurrentLeadSubmission {
            submissionid,
            status,
            cutoff_annotation,
        } => {
            let path = download_current_lead_submission(
                syn,
                &submissionid,
                status,
                &cutoff_annotation,
                std::path::Path::new("."),
            )?;
            match path {
                Some(path) => println!("{}", path.display()),
                None => println!("Downloading no file"),
            }
        }
        Command::AnnotateSubmission {
            submissionid,
            annotation_values,
            to_public,
            force,
        } => {
            with_retry(
                || annotate_submission_with_json(syn, &submissionid, &annotation_values, !to_public, force),
                Duration::from_secs(3),
                10,
                &ANNOTATION_RETRY_STATUS_CODES,
            )?;
        }
        Command::SendEmail {
            userids,
            subject,
            message,
        } => send_email(syn, &userids, &subject, &message)?,
        Command::KillDockerOverQuota {
            evaluationid,
            quota,
        } => {
            for id in kill_docker_submission_over_quota(syn, &evaluationid, quota)? {
                println!("Stopped submission {id}");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up logger
    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    log::debug!("challengeutils v{CLIENT_VERSION}");

    let syn = SynapseClient::login(&cli.api_base, &cli.auth_token, DEFAULT_MAX_RETRIES)
        .context("Must provide a valid Synapse personal access token")?;
    run(&syn, cli.command)
}
