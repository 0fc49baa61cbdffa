use std::{collections::HashMap, fmt::Debug};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod namespace;
pub mod pod;

/// A remotely-owned, versioned object that an informer can track.
pub trait Object:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn kind(&self) -> &'static str;

    fn metadata(&self) -> &Metadata;

    fn name(&self) -> &String {
        &self.metadata().name
    }

    /// Unique key of the object: `namespace/name`, or `name` for
    /// cluster-scoped objects.
    fn key(&self) -> String {
        self.metadata().key()
    }

    /// Opaque token ordering changes of this object on the remote store.
    fn resource_version(&self) -> &str {
        self.metadata().resource_version.as_str()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub labels: Labels,
}

impl Metadata {
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}/{}", namespace, self.name),
            None => self.name.to_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Labels(pub HashMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<none>");
        }
        let mut pairs = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        pairs.sort();
        write!(f, "{}", pairs.join(","))
    }
}
