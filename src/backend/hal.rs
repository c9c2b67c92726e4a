//! Linked-entry discovery for HAL payloads.
//!
//! Link relations of the form `<shortID>:<model>/<field>` point at linked
//! entries. Creator links are not content links and are skipped.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::index::EntryIdentity;

static LINK_RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Fa-f0-9]{8}:[a-zA-Z0-9_\-]{1,256}/([a-zA-Z0-9_\-]{1,256})$")
        .expect("link relation pattern is valid")
});

/// Collects the identities linked from `entry`.
///
/// `levels` is the fetch depth: links of the entry itself are level 2, and
/// embedded entries are searched for deeper levels.
pub fn find_linked_entries(entry: &Value, levels: u32) -> Vec<EntryIdentity> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    collect(entry, levels, &mut found, &mut seen);
    found
}

fn collect(
    entry: &Value,
    levels: u32,
    found: &mut Vec<EntryIdentity>,
    seen: &mut HashSet<EntryIdentity>,
) {
    if levels < 2 {
        return;
    }

    if let Some(links) = entry.get("_links").and_then(Value::as_object) {
        for (relation, targets) in links {
            if !is_content_link(relation) {
                continue;
            }
            for target in as_list(targets) {
                if let Some(identity) = link_target(target) {
                    if seen.insert(identity.clone()) {
                        found.push(identity);
                    }
                }
            }
        }
    }

    if levels > 2 {
        if let Some(embedded) = entry.get("_embedded").and_then(Value::as_object) {
            for children in embedded.values() {
                for child in as_list(children) {
                    collect(child, levels - 1, found, seen);
                }
            }
        }
    }
}

fn is_content_link(relation: &str) -> bool {
    match LINK_RELATION.captures(relation) {
        Some(caps) => {
            let field = &caps[1];
            !(field.starts_with("creator") || field.starts_with("_creator"))
        }
        None => false,
    }
}

fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn link_target(link: &Value) -> Option<EntryIdentity> {
    let model = link.get("name").and_then(Value::as_str)?;
    let href = link.get("href").and_then(Value::as_str)?;
    let query = href.split_once('?').map(|(_, q)| q).unwrap_or(href);
    let entry_id = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("id="))
        .or_else(|| href.split('=').nth(1))?;

    if model.is_empty() || entry_id.is_empty() {
        return None;
    }
    Some(EntryIdentity::new(model, entry_id))
}
