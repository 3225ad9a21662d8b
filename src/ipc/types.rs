use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::labels::LabelNormalizer;
use crate::model::CallerIdentity;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub caller: Option<CallerIdentity>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub normalize: LabelNormalizer,
}

impl AppState {
    pub fn new(normalize: LabelNormalizer) -> Self {
        AppState {
            workspace: None,
            db: None,
            normalize,
        }
    }
}
