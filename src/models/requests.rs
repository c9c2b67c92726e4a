//! Request DTOs for the cache server API
//!
//! Defines the query strings and bodies accepted by the HTTP surface.

use serde::Deserialize;

use crate::bus::ChangeKind;
use crate::client::EntryRequest;

/// Query string of `GET /entries/:model/:entry_id`
///
/// `fields` is a comma separated list; its order is kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryQuery {
    #[serde(default)]
    pub fields: Option<String>,
    #[serde(default)]
    pub levels: Option<u32>,
}

impl EntryQuery {
    /// Field names in request order, without blanks.
    pub fn field_list(&self) -> Option<Vec<String>> {
        let fields: Vec<String> = self
            .fields
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        (!fields.is_empty()).then_some(fields)
    }

    pub fn into_request(self) -> EntryRequest {
        EntryRequest {
            fields: self.field_list(),
            levels: self.levels,
            transform: None,
        }
    }
}

/// Request body for `POST /events`
#[derive(Debug, Clone, Deserialize)]
pub struct PublishEventRequest {
    #[serde(rename = "modelTitle")]
    pub model_title: String,
    #[serde(rename = "entryID")]
    pub entry_id: String,
    /// `entryCreated`, `entryUpdated` or `entryDeleted`; defaults to an update
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl PublishEventRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.model_title.is_empty() {
            return Some("modelTitle cannot be empty".to_string());
        }
        if self.entry_id.is_empty() {
            return Some("entryID cannot be empty".to_string());
        }
        let dotted = |s: &str| s.contains('.') || s.contains('*') || s.contains('#');
        if dotted(&self.model_title) || dotted(&self.entry_id) {
            return Some("modelTitle and entryID cannot contain '.', '*' or '#'".to_string());
        }
        None
    }

    pub fn change_kind(&self) -> ChangeKind {
        self.kind
            .as_deref()
            .map(ChangeKind::from_message_type)
            .unwrap_or(ChangeKind::Updated)
    }
}
