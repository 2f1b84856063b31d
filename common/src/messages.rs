//! Notification templates sent by the harness and the `sendemail` command.

use crate::synapse::{Synapse, SynapseResult};
use crate::{SYNAPSE_WEB_BASE, UserProfile};
use log::info;

/// Greeting used for messages routed to the challenge admins.
pub const ADMIN_DISPLAY_NAME: &str = "Challenge Administrator";

const FOOTER: &str = "\n\nSincerely,\nChallenge Administrator";

/// A message ready to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// What a submission message talks about.
#[derive(Debug, Clone, Default)]
pub struct MessageContext<'a> {
    pub username: &'a str,
    pub queue_name: &'a str,
    pub submission_id: &'a str,
    pub submission_name: &'a str,
    pub challenge_id: &'a str,
}

impl MessageContext<'_> {
    fn challenge_url(&self) -> String {
        format!("{SYNAPSE_WEB_BASE}/#!Synapse:{}", self.challenge_id)
    }
}

/// Display name of a user: first and last name, or the user name when neither is set.
pub fn get_user_name(profile: &UserProfile) -> String {
    let names: Vec<&str> = [profile.first_name.as_deref(), profile.last_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        profile.user_name.clone()
    } else {
        names.join(" ")
    }
}

pub fn validation_passed(recipients: Vec<String>, ctx: &MessageContext) -> Message {
    Message {
        recipients,
        subject: format!("Submission to '{}' accepted", ctx.queue_name),
        body: format!(
            "Hello {},\n\nYour submission \"{}\" (ID: {}) is valid and has been accepted for scoring \
             in {}.\n\nChallenge site: {}{FOOTER}",
            ctx.username,
            ctx.submission_name,
            ctx.submission_id,
            ctx.queue_name,
            ctx.challenge_url()
        ),
    }
}

pub fn validation_failed(recipients: Vec<String>, ctx: &MessageContext, reason: &str) -> Message {
    Message {
        recipients,
        subject: format!("Validation error in submission to '{}'", ctx.queue_name),
        body: format!(
            "Hello {},\n\nSorry, but your submission \"{}\" (ID: {}) to {} is invalid:\n\n{}\n\n\
             Challenge site: {}{FOOTER}",
            ctx.username,
            ctx.submission_name,
            ctx.submission_id,
            ctx.queue_name,
            reason,
            ctx.challenge_url()
        ),
    }
}

pub fn scoring_succeeded(recipients: Vec<String>, ctx: &MessageContext, message: &str) -> Message {
    Message {
        recipients,
        subject: format!("Scored submission to '{}'", ctx.queue_name),
        body: format!(
            "Hello {},\n\nYour submission \"{}\" (ID: {}) to {} has been scored:\n\n{}\n\n\
             Challenge site: {}{FOOTER}",
            ctx.username,
            ctx.submission_name,
            ctx.submission_id,
            ctx.queue_name,
            message,
            ctx.challenge_url()
        ),
    }
}

pub fn scoring_error(recipients: Vec<String>, ctx: &MessageContext, message: &str) -> Message {
    Message {
        recipients,
        subject: format!("Exception while scoring submission to '{}'", ctx.queue_name),
        body: format!(
            "Hello {},\n\nScoring submission \"{}\" (ID: {}) to {} failed:\n\n{}\n\n\
             Challenge site: {}{FOOTER}",
            ctx.username,
            ctx.submission_name,
            ctx.submission_id,
            ctx.queue_name,
            message,
            ctx.challenge_url()
        ),
    }
}

/// Top-level failure of a harness run, addressed to the admins.
pub fn error_notification(recipients: Vec<String>, challenge_name: &str, message: &str) -> Message {
    Message {
        recipients,
        subject: format!("Exception while running challenge {challenge_name}"),
        body: format!(
            "Hello {ADMIN_DISPLAY_NAME},\n\nThe harness stopped with an error while working on \
             {challenge_name}:\n\n{message}{FOOTER}"
        ),
    }
}

/// Send `message` if its category is enabled. A dry run only logs it.
///
/// Returns whether the message went out.
///
/// # Errors
/// Propagates the platform error if sending fails.
pub fn dispatch(
    syn: &dyn Synapse,
    message: &Message,
    enabled: bool,
    dry_run: bool,
) -> SynapseResult<bool> {
    if !enabled || message.recipients.is_empty() {
        return Ok(false);
    }
    if dry_run {
        info!(
            "Dry run, not sending \"{}\" to {}",
            message.subject,
            message.recipients.join(", ")
        );
        return Ok(false);
    }
    syn.send_message(&message.recipients, &message.subject, &message.body)?;
    info!(
        "Sent \"{}\" to {}",
        message.subject,
        message.recipients.join(", ")
    );
    Ok(true)
}

/// Send an ad hoc message. A literal `\n` in the body becomes an HTML line break.
///
/// # Errors
/// Propagates the platform error if sending fails.
pub fn send_email(
    syn: &dyn Synapse,
    user_ids: &[String],
    subject: &str,
    message: &str,
) -> SynapseResult<()> {
    let body = message.replace("\\n", "<br>");
    syn.send_message(user_ids, subject, &body)
}
