//! Build information endpoint.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const LATEST: &str = "latest";

/// Build information reported by `GET /version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub revision: String,
    pub tag: String,
    pub time: String,
}

impl ServerVersion {
    pub fn new(
        revision: impl Into<String>,
        tag: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            revision: revision.into(),
            tag: tag.into(),
            time: time.into(),
        }
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::new(LATEST, LATEST, LATEST)
    }
}

pub async fn version(State(state): State<AppState>) -> Json<ServerVersion> {
    Json(state.version.as_ref().clone())
}
