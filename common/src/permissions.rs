//! Permission levels for entities and evaluation queues.

use crate::AccessControlList;
use crate::ResourceAccess;
use crate::synapse::Synapse;
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use log::info;

/// Principal id of the public group.
pub const PUBLIC_PRINCIPAL_ID: i64 = 273_949;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum EntityPermission {
    View,
    Download,
    Edit,
    EditAndDelete,
    Admin,
    Remove,
}

impl EntityPermission {
    pub fn access_types(self) -> &'static [&'static str] {
        match self {
            EntityPermission::View => &["READ"],
            EntityPermission::Download => &["READ", "DOWNLOAD"],
            EntityPermission::Edit => &["DOWNLOAD", "UPDATE", "CREATE", "READ"],
            EntityPermission::EditAndDelete => &["DOWNLOAD", "UPDATE", "CREATE", "READ", "DELETE"],
            EntityPermission::Admin => &[
                "DELETE",
                "CHANGE_SETTINGS",
                "MODERATE",
                "CHANGE_PERMISSIONS",
                "UPDATE",
                "READ",
                "DOWNLOAD",
                "CREATE",
            ],
            EntityPermission::Remove => &[],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum EvaluationPermission {
    View,
    Submit,
    Score,
    Admin,
    Remove,
}

impl EvaluationPermission {
    pub fn access_types(self) -> &'static [&'static str] {
        match self {
            EvaluationPermission::View => &["READ"],
            EvaluationPermission::Submit => &["READ", "SUBMIT"],
            EvaluationPermission::Score => &["READ", "UPDATE_SUBMISSION", "READ_PRIVATE_SUBMISSION"],
            EvaluationPermission::Admin => &[
                "DELETE_SUBMISSION",
                "DELETE",
                "SUBMIT",
                "UPDATE",
                "CREATE",
                "READ",
                "UPDATE_SUBMISSION",
                "READ_PRIVATE_SUBMISSION",
                "CHANGE_PERMISSIONS",
            ],
            EvaluationPermission::Remove => &[],
        }
    }
}

/// Turn a numeric id, user name or team name into a principal id.
/// No principal, or `public`, means the public group.
///
/// # Errors
/// Fails if the name matches neither a user nor a team.
pub fn resolve_principal_id(syn: &dyn Synapse, principal: Option<&str>) -> Result<i64> {
    let Some(principal) = principal.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(PUBLIC_PRINCIPAL_ID);
    };
    if principal.eq_ignore_ascii_case("public") {
        return Ok(PUBLIC_PRINCIPAL_ID);
    }
    if let Ok(id) = principal.parse::<i64>() {
        return Ok(id);
    }
    if let Some(id) = syn.principal_id_for_user_name(principal)? {
        return id
            .parse()
            .with_context(|| format!("principal id {id} is not numeric"));
    }
    match syn.team_by_name(principal)?.and_then(|t| t.id) {
        Some(id) => id
            .parse()
            .with_context(|| format!("team id {id} is not numeric")),
        None => bail!("{principal} is neither a Synapse user nor a team"),
    }
}

/// Give `principal_id` exactly `access_types`, removing it when empty.
pub fn update_resource_access(acl: &mut AccessControlList, principal_id: i64, access_types: &[&str]) {
    acl.resource_access.retain(|ra| ra.principal_id != principal_id);
    if !access_types.is_empty() {
        acl.resource_access.push(ResourceAccess {
            principal_id,
            access_type: access_types.iter().map(|a| (*a).to_string()).collect(),
        });
    }
}

/// Set a principal's permission level on an entity.
///
/// # Errors
/// Propagates resolution and platform errors.
pub fn set_entity_permissions(
    syn: &dyn Synapse,
    entity_id: &str,
    principal: Option<&str>,
    level: EntityPermission,
) -> Result<AccessControlList> {
    let principal_id = resolve_principal_id(syn, principal)?;
    let mut acl = syn.entity_acl(entity_id)?;
    update_resource_access(&mut acl, principal_id, level.access_types());
    let stored = syn.store_entity_acl(&acl)?;
    info!("Set {level:?} on {entity_id} for {principal_id}");
    Ok(stored)
}

/// Set a principal's permission level on an evaluation queue.
///
/// # Errors
/// Propagates resolution and platform errors.
pub fn set_evaluation_permissions(
    syn: &dyn Synapse,
    evaluation_id: &str,
    principal: Option<&str>,
    level: EvaluationPermission,
) -> Result<AccessControlList> {
    let principal_id = resolve_principal_id(syn, principal)?;
    let mut acl = syn.evaluation_acl(evaluation_id)?;
    update_resource_access(&mut acl, principal_id, level.access_types());
    let stored = syn.store_evaluation_acl(&acl)?;
    info!("Set {level:?} on evaluation {evaluation_id} for {principal_id}");
    Ok(stored)
}
