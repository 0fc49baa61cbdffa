use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Metadata, Object};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Pod {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: PodSpec,
    pub status: Option<PodStatus>,
}

impl Object for Pod {
    fn kind(&self) -> &'static str {
        "Pod"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Pod {
    pub fn phase(&self) -> PodPhase {
        self.status
            .as_ref()
            .map(|status| status.phase)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<16} {}", "Name:", self.metadata.name)?;
        if let Some(namespace) = &self.metadata.namespace {
            writeln!(f, "{:<16} {}", "Namespace:", namespace)?;
        }
        writeln!(f, "{:<16} {}", "Labels:", self.metadata.labels)?;
        if let Some(node_name) = &self.spec.node_name {
            writeln!(f, "{:<16} {}", "Node:", node_name)?;
        }
        write!(f, "{:<16} {}", "Status:", self.phase())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// List of containers belonging to the pod.
    #[serde(default)]
    pub containers: Vec<Container>,
    /// NodeName is the node this pod has been scheduled onto, if any.
    pub node_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Container {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub phase: PodPhase,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, Default)]
pub enum PodPhase {
    /// The pod has been accepted, but one or more containers
    /// has not been started.
    #[default]
    Pending,
    /// The pod has been bound to a node and all containers have been started.
    Running,
    /// All containers in the pod have voluntarily terminated with exit code 0.
    Succeeded,
    /// All containers in the pod have terminated, and at least one container
    /// has terminated in a failure.
    Failed,
    /// For some reason the state of the pod could not be obtained.
    Unknown,
}
