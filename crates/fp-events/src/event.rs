//! Container lifecycle events
//!
//! The event source emits one JSON object per line in the format of
//! `docker events --format json`. Only three actions drive the forwarder;
//! everything else is carried as [`EventAction::Other`] and ignored.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::EventError;

/// Container label holding the devcontainer metadata array
pub const METADATA_LABEL: &str = "devcontainer.metadata";

/// Lifecycle transition reported for a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// Container started
    Start,
    /// Container process exited
    Die,
    /// Container was restarted
    Restart,
    /// Any other action (exec_start, attach, ...)
    Other(String),
}

impl EventAction {
    /// Parse an action string as reported by the event source
    pub fn parse(action: &str) -> Self {
        match action {
            "start" => EventAction::Start,
            "die" => EventAction::Die,
            "restart" => EventAction::Restart,
            other => EventAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventAction::Start => write!(f, "start"),
            EventAction::Die => write!(f, "die"),
            EventAction::Restart => write!(f, "restart"),
            EventAction::Other(action) => write!(f, "{}", action),
        }
    }
}

/// One lifecycle event for a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// What happened
    pub action: EventAction,
    /// Container identifier
    pub id: String,
    /// Remote user from the devcontainer metadata, if the container carries it
    pub remote_user: Option<String>,
}

impl LifecycleEvent {
    /// Create an event without a remote user
    pub fn new(action: EventAction, id: impl Into<String>) -> Self {
        Self {
            action,
            id: id.into(),
            remote_user: None,
        }
    }

    /// Convenience constructor for a start event
    pub fn start(id: impl Into<String>, remote_user: impl Into<String>) -> Self {
        Self {
            action: EventAction::Start,
            id: id.into(),
            remote_user: Some(remote_user.into()),
        }
    }

    /// Parse a single JSON event line
    pub fn from_json(line: &str) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_str(line)?;

        let action = raw
            .action
            .or(raw.status)
            .ok_or(EventError::MissingField("Action"))?;

        let actor = raw.actor.unwrap_or_default();
        let id = raw
            .id
            .or(actor.id)
            .ok_or(EventError::MissingField("id"))?;

        // A bad label must not cost the action: the reactor still needs it
        let remote_user = match actor.attributes.get(METADATA_LABEL) {
            Some(metadata) => match remote_user_from_metadata(metadata) {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(container = %id, "Ignoring devcontainer metadata: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            action: EventAction::parse(&action),
            id,
            remote_user,
        })
    }
}

/// Extract the remote user from a devcontainer metadata label.
///
/// The label is usually a JSON array of objects merged from the image,
/// features and the devcontainer.json, but a single object is accepted too.
/// The first entry with a non-empty `remoteUser` wins.
pub fn remote_user_from_metadata(metadata: &str) -> Result<Option<String>, EventError> {
    let entries = match serde_json::from_str(metadata.trim())
        .map_err(|e| EventError::Metadata(e.to_string()))?
    {
        MetadataLabel::Entries(entries) => entries,
        MetadataLabel::Single(entry) => vec![entry],
    };

    Ok(entries.into_iter().find_map(|mut entry| {
        match entry.remove("remoteUser") {
            Some(Value::String(user)) if !user.is_empty() => Some(user),
            _ => None,
        }
    }))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetadataLabel {
    Entries(Vec<HashMap<String, Value>>),
    Single(HashMap<String, Value>),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    status: Option<String>,
    id: Option<String>,
    #[serde(rename = "Action")]
    action: Option<String>,
    #[serde(rename = "Actor")]
    actor: Option<RawActor>,
}

#[derive(Debug, Default, Deserialize)]
struct RawActor {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}
