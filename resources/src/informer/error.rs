use thiserror::Error;

use super::DeltaKind;
use crate::models::watch::Status;

/// Failures of the remote list/watch protocol. None of these ever reach
/// event handlers; the reflector retries them.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Network or connection failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The resource version cursor is no longer served by the remote store.
    #[error("resource version expired: {0}")]
    Expired(String),
    /// A single event could not be decoded.
    #[error("failed to decode watch event: {0}")]
    Decode(String),
    /// The remote store reported an error on the watch stream.
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },
}

impl WatchError {
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        WatchError::Transport(e.to_string())
    }

    pub fn decode<E: std::fmt::Display>(e: E) -> Self {
        WatchError::Decode(e.to_string())
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, WatchError::Expired(_))
    }
}

impl From<Status> for WatchError {
    fn from(status: Status) -> Self {
        if status.is_gone() {
            WatchError::Expired(status.message)
        } else {
            WatchError::Remote {
                code: status.code,
                message: status.message,
            }
        }
    }
}

/// Misuse of the informer lifecycle, reported synchronously to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("informer already started")]
    AlreadyStarted,
    #[error("informer not started")]
    NotStarted,
    #[error("informer closed")]
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("delta queue closed")]
    Closed,
}

/// A consumer callback failed while handling a delta.
#[derive(Debug, Error)]
#[error("{kind} handler for {key} failed: {cause:#}")]
pub struct HandlerError {
    pub kind: DeltaKind,
    pub key: String,
    pub cause: anyhow::Error,
}
