//! Scaffolding for a new challenge: projects, teams and the challenge object.

use crate::permissions::{EntityPermission, set_entity_permissions};
use crate::synapse::Synapse;
use crate::{Entity, SYNAPSE_WEB_BASE, Team};
use anyhow::{Context, Result};
use log::{info, warn};

/// Ids of everything created for a challenge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChallengeComponents {
    pub live_project_id: String,
    pub staging_project_id: String,
    pub admin_team_id: String,
    pub participant_team_id: String,
    pub organizer_team_id: String,
    pub preregistrant_team_id: String,
    pub challenge_id: String,
}

impl ChallengeComponents {
    /// One line per component with its web address.
    pub fn summary(&self, name: &str) -> String {
        let project = |id: &str| format!("{SYNAPSE_WEB_BASE}/#!Synapse:{id}");
        let team = |id: &str| format!("{SYNAPSE_WEB_BASE}/#!Team:{id}");
        [
            format!("{name} (Production site): {}", project(&self.live_project_id)),
            format!("{name} (Staging site): {}", project(&self.staging_project_id)),
            format!("{name} (Admin team): {}", team(&self.admin_team_id)),
            format!("{name} (Participant team): {}", team(&self.participant_team_id)),
            format!("{name} (Organizer team): {}", team(&self.organizer_team_id)),
            format!("{name} (Pre-registrant team): {}", team(&self.preregistrant_team_id)),
        ]
        .join("\n")
    }
}

/// Create a team, or reuse the existing team of that name.
///
/// # Errors
/// Propagates platform errors.
pub fn create_team(
    syn: &dyn Synapse,
    name: &str,
    description: &str,
    can_public_join: bool,
) -> Result<String> {
    let team = match syn.team_by_name(name)? {
        Some(existing) => {
            warn!("Team {name} already exists, using it");
            existing
        }
        None => {
            info!("Creating team {name}");
            syn.create_team(&Team {
                id: None,
                name: name.to_string(),
                description: Some(description.to_string()),
                can_public_join: Some(can_public_join),
            })?
        }
    };
    team.id.with_context(|| format!("team {name} has no id"))
}

fn create_project(syn: &dyn Synapse, name: &str) -> Result<String> {
    info!("Creating project {name}");
    let project = syn.create_entity(&Entity::project(name))?;
    project
        .id
        .with_context(|| format!("project {name} has no id"))
}

/// Create the projects and teams of a challenge, link the participant team
/// to the live project and set the standard permissions.
///
/// An existing live project may be given instead of creating one.
///
/// # Errors
/// Propagates platform errors.
pub fn create_challenge(
    syn: &dyn Synapse,
    challenge_name: &str,
    live_site_id: Option<&str>,
) -> Result<ChallengeComponents> {
    let live_project_id = match live_site_id {
        Some(id) => {
            let live = syn.get_entity(id)?;
            anyhow::ensure!(live.is_project(), "{id} is not a project");
            id.to_string()
        }
        None => create_project(syn, challenge_name)?,
    };
    let staging_project_id = create_project(syn, &format!("{challenge_name} - staging"))?;

    let admin_team_id = create_team(
        syn,
        &format!("{challenge_name} Admin"),
        "Members of this team have admin access to the challenge.",
        false,
    )?;
    let participant_team_id = create_team(
        syn,
        &format!("{challenge_name} Participants"),
        &format!("This team contains all participants of {challenge_name}."),
        true,
    )?;
    let organizer_team_id = create_team(
        syn,
        &format!("{challenge_name} Organizers"),
        "Members of this team can edit the challenge staging site.",
        false,
    )?;
    let preregistrant_team_id = create_team(
        syn,
        &format!("{challenge_name} Preregistrants"),
        &format!("This team contains everyone who preregistered for {challenge_name}."),
        true,
    )?;

    let challenge = syn.create_challenge(&live_project_id, &participant_team_id)?;
    let challenge_id = challenge.id.unwrap_or_default();

    let admin = Some(admin_team_id.as_str());
    let organizers = Some(organizer_team_id.as_str());
    set_entity_permissions(syn, &live_project_id, admin, EntityPermission::Admin)?;
    set_entity_permissions(syn, &staging_project_id, admin, EntityPermission::Admin)?;
    set_entity_permissions(syn, &staging_project_id, organizers, EntityPermission::EditAndDelete)?;
    set_entity_permissions(syn, &live_project_id, organizers, EntityPermission::Download)?;

    Ok(ChallengeComponents {
        live_project_id,
        staging_project_id,
        admin_team_id,
        participant_team_id,
        organizer_team_id,
        preregistrant_team_id,
        challenge_id,
    })
}
