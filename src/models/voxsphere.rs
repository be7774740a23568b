// src/models/voxsphere.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Row of the "top communities" listing.
#[derive(Debug, Serialize, FromRow)]
pub struct TopVoxsphere {
    pub name: String,
    pub logo_url: Option<String>,
    pub total_members: i64,
    pub total_members_human: String,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize, Validate)]
pub struct TopParams {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: i64,
}
