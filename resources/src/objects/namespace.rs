use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Metadata, Object};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Namespace {
    pub metadata: Metadata,
    #[serde(default)]
    pub status: NamespaceStatus,
}

impl Object for Namespace {
    fn kind(&self) -> &'static str {
        "Namespace"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Namespace {
    pub fn new(name: &str, resource_version: &str) -> Self {
        Namespace {
            metadata: Metadata {
                name: name.to_owned(),
                resource_version: resource_version.to_owned(),
                ..Default::default()
            },
            status: NamespaceStatus::default(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<16} {}", "Name:", self.metadata.name)?;
        writeln!(f, "{:<16} {}", "Labels:", self.metadata.labels)?;
        write!(f, "{:<16} {}", "Status:", self.status.phase)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct NamespaceStatus {
    #[serde(default)]
    pub phase: NamespacePhase,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, Default)]
pub enum NamespacePhase {
    /// Namespace is available for use.
    #[default]
    Active,
    /// Namespace is being deleted; no new objects can be created in it.
    Terminating,
}
