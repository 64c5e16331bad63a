use std::fmt;

use serde::{Deserialize, Serialize};

/// A resource kind generated for every website.
///
/// The set is closed: each website maps to exactly one service and one
/// deployment, always handled in the order of [`DerivedKind::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedKind {
    Service,
    Deployment,
}

impl DerivedKind {
    pub const ALL: [DerivedKind; 2] = [DerivedKind::Service, DerivedKind::Deployment];

    /// Path prefix of the API group serving this kind.
    pub fn api_prefix(&self) -> &'static str {
        match self {
            DerivedKind::Service => "api/v1",
            DerivedKind::Deployment => "apis/apps/v1",
        }
    }

    /// Collection name used in resource URLs.
    pub fn plural(&self) -> &'static str {
        match self {
            DerivedKind::Service => "services",
            DerivedKind::Deployment => "deployments",
        }
    }

    pub fn default_template_file(&self) -> &'static str {
        match self {
            DerivedKind::Service => "service-template.json",
            DerivedKind::Deployment => "deployment-template.json",
        }
    }
}

impl fmt::Display for DerivedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl std::str::FromStr for DerivedKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" | "services" => Ok(DerivedKind::Service),
            "deployment" | "deployments" => Ok(DerivedKind::Deployment),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, derive_more::Display)]
#[display("unknown derived kind {_0:?}, expected service or deployment")]
pub struct UnknownKind(pub String);

impl std::error::Error for UnknownKind {}
