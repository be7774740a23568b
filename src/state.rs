// src/state.rs

use axum::extract::FromRef;
use sqlx::PgPool;

/// Shared state handed to every handler. Handlers extract the pool with
/// `State<PgPool>` through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
