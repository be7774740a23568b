// src/models/post.rs

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

/// Award attached to a post, as aggregated by the listing query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardSummary {
    pub title: String,
    pub image_link: Option<String>,
}

/// A post joined with the data the feed renders next to it.
#[derive(Debug, Serialize, FromRow)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub text: Option<String>,
    pub text_html: Option<String>,
    pub media_type: String,
    pub ups: i64,
    pub over18: bool,
    pub spoiler: bool,
    pub link_type: bool,
    pub num_comments: i64,
    pub created_at_unix: Option<f64>,
    pub created_at_human: Option<String>,

    pub author_username: Option<String>,
    pub author_avatar: Option<String>,
    pub voxsphere_name: Option<String>,
    pub voxsphere_logo: Option<String>,
    pub flair_title: Option<String>,
    pub flair_color_hex: Option<String>,

    /// Stored as a JSON array built in the query.
    pub awards: Json<Vec<AwardSummary>>,
    /// `null` for posts without media.
    pub media_content: Option<Json<serde_json::Value>>,
}

fn default_limit() -> i64 {
    20
}

/// Offset pagination shared by the listing endpoints.
#[derive(Debug, Deserialize, Validate)]
pub struct PageParams {
    /// Number of items to return (default: 20, max: 100).
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: i64,

    #[serde(default)]
    #[validate(range(min = 0, message = "skip must not be negative"))]
    pub skip: i64,
}
