mod health;
mod version;

use axum::http::Uri;

use crate::error::AppError;

pub use health::{HealthCheck, HealthRegistry, HealthResult, healthz};
pub use version::{ServerVersion, version};

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
