//! REST endpoint handlers organized by resource.

pub mod library;
pub mod shots;
pub mod stats;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(shots::routes())
        .merge(stats::routes())
        .merge(library::routes())
}
