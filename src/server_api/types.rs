//! Request and response bodies of the in-server HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `PUT server`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Always sent: the server crashes when a settings update omits it.
    pub framecap: String,
}

impl ServerSettings {
    /// Settings that only rename the server.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            password: None,
            framecap: "0".to_string(),
        }
    }
}

/// One connected client as reported by `GET player`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    pub id: i64,
    pub address: String,
    pub ping: i64,
    pub host: bool,
    pub observer: bool,
    pub callsign: String,
    pub ship: String,
}
