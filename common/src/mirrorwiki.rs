//! Mirror wiki pages from a staging project onto a live project.
//!
//! Pages are paired by title. Links inside the markdown that point at the
//! source project or its pages are rewritten to point at their counterparts.

use crate::synapse::Synapse;
use anyhow::{Result, bail};
use log::info;
use regex::{Captures, Regex};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorReport {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    /// Source titles with no page of the same title in the destination.
    pub unmatched: Vec<String>,
}

/// Rewrites every whole-word occurrence of a mapping key in one pass.
struct IdRewriter {
    pattern: Option<Regex>,
    mapping: HashMap<String, String>,
}

impl IdRewriter {
    fn new(mapping: HashMap<String, String>) -> Result<Self> {
        let mut keys: Vec<&String> = mapping.keys().filter(|k| !k.is_empty()).collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        let pattern = if keys.is_empty() {
            None
        } else {
            let alternation = keys
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!(r"\b(?:{alternation})\b"))?)
        };
        Ok(IdRewriter { pattern, mapping })
    }

    fn rewrite(&self, text: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern
                .replace_all(text, |caps: &Captures| {
                    self.mapping
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
            None => text.to_string(),
        }
    }
}

/// Copy every page of `entity_id`'s wiki onto the page of the same title in
/// `destination_id`. Unchanged pages are skipped unless `force` is set, and
/// a dry run only reports what would change.
///
/// # Errors
/// Fails if either id is not a project, or on platform errors.
pub fn mirror_wiki(
    syn: &dyn Synapse,
    entity_id: &str,
    destination_id: &str,
    force: bool,
    dry_run: bool,
) -> Result<MirrorReport> {
    let entity = syn.get_entity(entity_id)?;
    let destination = syn.get_entity(destination_id)?;
    if !entity.is_project() || !destination.is_project() {
        bail!("Both entity and destination must be Synapse projects");
    }

    let source_headers = syn.wiki_headers(entity_id)?;
    let destination_headers = syn.wiki_headers(destination_id)?;
    let destination_by_title: HashMap<&str, &str> = destination_headers
        .iter()
        .map(|h| (h.title.as_str(), h.id.as_str()))
        .collect();

    let mut report = MirrorReport::default();
    let mut pairs = Vec::new();
    let mut mapping = HashMap::from([(entity_id.to_string(), destination_id.to_string())]);
    for header in &source_headers {
        match destination_by_title.get(header.title.as_str()) {
            Some(dest_id) => {
                mapping.insert(header.id.clone(), (*dest_id).to_string());
                pairs.push((header, *dest_id));
            }
            None => {
                info!("Title not found in destination: {}", header.title);
                report.unmatched.push(header.title.clone());
            }
        }
    }
    let rewriter = IdRewriter::new(mapping)?;

    for (header, dest_id) in pairs {
        let source_page = syn.get_wiki(entity_id, &header.id)?;
        let mut dest_page = syn.get_wiki(destination_id, dest_id)?;
        let markdown = source_page.markdown.as_deref().map(|m| rewriter.rewrite(m));

        let same = markdown == dest_page.markdown
            && source_page.attachment_file_handle_ids == dest_page.attachment_file_handle_ids;
        if same && !force {
            info!("No changes to: {}", header.title);
            report.unchanged.push(header.title.clone());
            continue;
        }

        info!("Updating: {}", header.title);
        report.updated.push(header.title.clone());
        if dry_run {
            continue;
        }
        dest_page.markdown = markdown;
        dest_page.attachment_file_handle_ids = source_page.attachment_file_handle_ids;
        syn.store_wiki(destination_id, &dest_page)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSynapse;
    use crate::{Entity, WikiPage};

    fn page(id: &str, title: &str, markdown: &str) -> WikiPage {
        WikiPage {
            id: Some(id.to_string()),
            title: title.to_string(),
            markdown: Some(markdown.to_string()),
            ..Default::default()
        }
    }

    fn projects(syn: &FakeSynapse) {
        for id in ["syn1", "syn2"] {
            syn.add_entity(Entity {
                id: Some(id.to_string()),
                ..Entity::project(id)
            });
        }
    }

    #[test]
    fn test_rewriter_respects_word_boundaries() {
        let rewriter = IdRewriter::new(HashMap::from([
            ("syn1".to_string(), "syn2".to_string()),
            ("10".to_string(), "20".to_string()),
        ]))
        .unwrap();

        assert_eq!(
            rewriter.rewrite("[x](#!Synapse:syn1/wiki/10) syn11 100"),
            "[x](#!Synapse:syn2/wiki/20) syn11 100"
        );
    }

    #[test]
    fn test_mirror_updates_matching_titles() {
        let syn = FakeSynapse::new();
        projects(&syn);
        syn.wikis.borrow_mut().insert(
            "syn1".to_string(),
            vec![
                page("10", "Home", "See [rules](#!Synapse:syn1/wiki/11)"),
                page("11", "Rules", "Be nice"),
                page("12", "Draft", "not yet"),
            ],
        );
        syn.wikis.borrow_mut().insert(
            "syn2".to_string(),
            vec![page("20", "Home", "old"), page("21", "Rules", "Be nice")],
        );

        let report = mirror_wiki(&syn, "syn1", "syn2", false, false).unwrap();

        assert_eq!(report.updated, vec!["Home".to_string()]);
        assert_eq!(report.unchanged, vec!["Rules".to_string()]);
        assert_eq!(report.unmatched, vec!["Draft".to_string()]);
        let home = syn.get_wiki("syn2", "20").unwrap();
        assert_eq!(home.markdown.as_deref(), Some("See [rules](#!Synapse:syn2/wiki/21)"));
    }

    #[test]
    fn test_force_and_dry_run() {
        let syn = FakeSynapse::new();
        projects(&syn);
        syn.wikis
            .borrow_mut()
            .insert("syn1".to_string(), vec![page("10", "Home", "new")]);
        syn.wikis
            .borrow_mut()
            .insert("syn2".to_string(), vec![page("20", "Home", "old")]);

        let dry = mirror_wiki(&syn, "syn1", "syn2", false, true).unwrap();
        assert_eq!(dry.updated, vec!["Home".to_string()]);
        assert_eq!(syn.get_wiki("syn2", "20").unwrap().markdown.as_deref(), Some("old"));

        mirror_wiki(&syn, "syn1", "syn2", false, false).unwrap();
        let forced = mirror_wiki(&syn, "syn1", "syn2", true, false).unwrap();
        assert_eq!(forced.updated, vec!["Home".to_string()]);
    }

    #[test]
    fn test_requires_projects() {
        let syn = FakeSynapse::new();
        projects(&syn);
        syn.add_entity(Entity {
            id: Some("syn3".to_string()),
            ..Entity::folder("f", "syn1")
        });

        assert!(mirror_wiki(&syn, "syn1", "syn3", false, false).is_err());
    }
}
