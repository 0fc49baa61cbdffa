use serde::{Deserialize, Serialize};

pub mod watch;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T: Serialize> {
    pub msg: Option<String>,
    pub data: Option<T>,
    /// Version of the collection at the time the response was produced.
    /// Only set by list endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrResponse {
    pub msg: String,
    pub cause: Option<String>,
}

impl std::fmt::Display for ErrResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.msg, cause),
            None => write!(f, "{}", self.msg),
        }
    }
}
