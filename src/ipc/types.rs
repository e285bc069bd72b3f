//! Wire types for the sidecar protocol: one JSON request per stdin line,
//! one JSON reply per stdout line, correlated by `id`.

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// Incoming request envelope. `params` defaults to JSON null so methods
/// without arguments can omit it.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything that survives between requests: the selected workspace path
/// and the open handle to its sis.sqlite3.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
