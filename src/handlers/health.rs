//! Liveness endpoint backed by a registry of named checks.
//!
//! # Endpoint
//!
//! - `GET /healthz` - 200 `{"success": true}` when every check passes,
//!   otherwise 503 `{"success": false, "error": "..."}` with one line per
//!   failing check
//!
//! Checks are plain synchronous closures. Keep them cheap: a probe runs every
//! registered check on each request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::state::AppState;

/// A single health check. Returning `Err` marks the service unhealthy.
pub type HealthCheck = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Clonable registry of named health checks.
///
/// Registering a name twice replaces the earlier check.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checks: Arc<RwLock<BTreeMap<String, HealthCheck>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `check` under `name`.
    pub fn register<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut checks = self
            .checks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        checks.insert(name.into(), Arc::new(check));
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every check and join the failures, in name order, with newlines.
    pub fn run(&self) -> Result<(), String> {
        let failures: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter_map(|(name, check)| match check() {
                Ok(()) => None,
                Err(e) => {
                    warn!(check = %name, error = %e, "Health check failed");
                    Some(e.to_string())
                }
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("\n"))
        }
    }

    // Checks run outside the lock so a slow check never blocks registration
    fn snapshot(&self) -> Vec<(String, HealthCheck)> {
        self.checks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect()
    }
}

impl fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.snapshot().into_iter().map(|(name, _)| name).collect();
        f.debug_struct("HealthRegistry").field("checks", &names).finish()
    }
}

/// Outcome body shared by `/healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check endpoint.
#[instrument(skip(state))]
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResult>) {
    match state.health.run() {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResult {
                success: true,
                error: None,
            }),
        ),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResult {
                success: false,
                error: Some(error),
            }),
        ),
    }
}
