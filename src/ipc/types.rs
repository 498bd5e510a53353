use std::collections::HashMap;
use std::path::PathBuf;

use crate::checkin::CheckInSession;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// (studentId, deviceId)
pub type SessionKey = (String, String);

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub checkins: HashMap<SessionKey, CheckInSession>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            checkins: HashMap::new(),
        }
    }
}
