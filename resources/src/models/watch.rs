use serde::{Deserialize, Serialize};

use crate::objects::Object;

/// HTTP status code the api-server attaches to an `ERROR` watch event when
/// the requested resource version has been compacted away.
pub const STATUS_GONE: u16 = 410;

/// A watch event as it travels over the websocket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum WatchEvent<T> {
    Added { object: T },
    Modified { object: T },
    Deleted { object: T },
    #[serde(rename_all = "camelCase")]
    Bookmark { resource_version: String },
    Error { status: Status },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Status {
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn gone(message: &str) -> Self {
        Status {
            code: STATUS_GONE,
            reason: "Expired".to_string(),
            message: message.to_owned(),
        }
    }

    pub fn is_gone(&self) -> bool {
        self.code == STATUS_GONE
    }
}

impl<T: Object> WatchEvent<T> {
    pub fn new_added(object: T) -> Self {
        WatchEvent::Added {
            object,
        }
    }

    pub fn new_modified(object: T) -> Self {
        WatchEvent::Modified {
            object,
        }
    }

    pub fn new_deleted(object: T) -> Self {
        WatchEvent::Deleted {
            object,
        }
    }

    /// Resource version the watch cursor advances to after this event.
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            WatchEvent::Added { object }
            | WatchEvent::Modified { object }
            | WatchEvent::Deleted { object } => Some(object.resource_version()),
            WatchEvent::Bookmark { resource_version } => Some(resource_version.as_str()),
            WatchEvent::Error { .. } => None,
        }
    }
}
