use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Suffix appended to a website's name to name every resource derived from it.
pub const DERIVED_NAME_SUFFIX: &str = "-website";

/// A single notification read off a website watch connection.
///
/// The control plane emits lowercase keys (`type`, `object`) while older
/// tooling and fixtures use the capitalized form (`Type`, `Object`); both are
/// accepted. [`WatchEvent::from_value`] additionally ignores key case entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type", alias = "Type")]
    pub event_type: WatchEventType,
    #[serde(
        rename = "object",
        alias = "Object",
        default,
        deserialize_with = "null_as_default"
    )]
    pub object: Website,
}

impl WatchEvent {
    pub fn new(event_type: WatchEventType, object: Website) -> Self {
        Self { event_type, object }
    }

    /// Decodes an event from a parsed JSON value, matching keys regardless of
    /// their case. An exactly lowercase key wins over a differently cased
    /// duplicate.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(lowercase_keys(value))
    }
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut lowered = Map::with_capacity(map.len());
            for (key, value) in map {
                let value = lowercase_keys(value);
                if key.chars().any(char::is_uppercase) {
                    lowered.entry(key.to_lowercase()).or_insert(value);
                } else {
                    lowered.insert(key, value);
                }
            }
            Value::Object(lowered)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Reads `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The kind of change a [`WatchEvent`] reports.
///
/// Only additions and deletions drive reconciliation. Any other type string
/// decodes into [`WatchEventType::Other`] so an unexpected notification never
/// breaks the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WatchEventType {
    Added,
    Deleted,
    Other(String),
}

impl WatchEventType {
    pub fn as_str(&self) -> &str {
        match self {
            WatchEventType::Added => "ADDED",
            WatchEventType::Deleted => "DELETED",
            WatchEventType::Other(other) => other,
        }
    }
}

impl From<String> for WatchEventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ADDED" => WatchEventType::Added,
            "DELETED" => WatchEventType::Deleted,
            _ => WatchEventType::Other(value),
        }
    }
}

impl From<WatchEventType> for String {
    fn from(value: WatchEventType) -> Self {
        match value {
            WatchEventType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `Website` custom resource as mirrored from the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    #[serde(alias = "Metadata", default, deserialize_with = "null_as_default")]
    pub metadata: WebsiteMetadata,
    #[serde(alias = "Spec", default, deserialize_with = "null_as_default")]
    pub spec: WebsiteSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteMetadata {
    #[serde(alias = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(alias = "Namespace", default, deserialize_with = "null_as_default")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteSpec {
    /// Repository the site content is synced from.
    #[serde(
        alias = "GitRepo",
        alias = "gitrepo",
        default,
        deserialize_with = "null_as_default"
    )]
    pub git_repo: String,
    /// Human readable display name of the site.
    #[serde(alias = "Nombre", default, deserialize_with = "null_as_default")]
    pub nombre: String,
}

impl Website {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        git_repo: impl Into<String>,
        nombre: impl Into<String>,
    ) -> Self {
        Self {
            metadata: WebsiteMetadata {
                name: name.into(),
                namespace: namespace.into(),
            },
            spec: WebsiteSpec {
                git_repo: git_repo.into(),
                nombre: nombre.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Name shared by every resource derived from this website.
    ///
    /// Creation and deletion both go through here, so both always address the
    /// same objects.
    pub fn derived_name(&self) -> String {
        format!("{}{DERIVED_NAME_SUFFIX}", self.metadata.name)
    }
}
