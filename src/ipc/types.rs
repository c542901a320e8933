use std::path::PathBuf;

use crate::reconcile::session::{InMemorySessionStore, DEFAULT_SESSION_TTL};
use crate::reconcile::UploadAnalysis;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Upload sessions between preview and confirm. Process-local.
    pub sessions: InMemorySessionStore<UploadAnalysis>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            sessions: InMemorySessionStore::new(DEFAULT_SESSION_TTL),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
