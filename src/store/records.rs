// src/store/records.rs

//! Insert payloads handed to a [`PersistenceGateway`](super::PersistenceGateway).
//! Foreign keys are already resolved; unresolved references are `None`.

use serde_json::Value;

use crate::models::media::{GalleryEntry, MediaType, MediaVariant, SubItemResult};

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrophy {
    pub title: String,
    pub image_link: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAward {
    pub title: String,
    pub image_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFlair {
    pub title: String,
    pub color_hex: Option<String>,
}

/// A community together with the rules and flairs created in the same transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVoxsphere {
    pub name: String,
    pub topic_id: Option<i64>,
    pub about: Option<String>,
    pub logo_url: Option<String>,
    pub banner_url: Option<String>,
    pub anchors: Value,
    pub button_color_hex: Option<String>,
    pub header_color_hex: Option<String>,
    pub banner_bg_color_hex: Option<String>,
    pub created_at_unix: Option<f64>,
    pub created_at_human: Option<String>,
    pub over18: bool,
    pub spoilers_enabled: bool,
    pub rules: Vec<NewRule>,
    pub flairs: Vec<NewFlair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub cake_day: Option<f64>,
    pub cake_day_human: Option<String>,
    pub account_age: Option<String>,
    pub avatar_img: Option<String>,
    pub banner_img: Option<String>,
    pub public_description: Option<String>,
    pub over18: bool,
    pub keycolor_hex: Option<String>,
    pub primarycolor_hex: Option<String>,
    pub iconcolor_hex: Option<String>,
    pub suspended: bool,
    pub trophy_ids: Vec<i64>,
    pub member_of: Vec<i64>,
    pub moderator_of: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaContent {
    pub media_type: MediaType,
    pub original_link: String,
    pub image_link: String,
    pub gif_link: String,
    pub video_link: String,
    pub gallery: Vec<GalleryEntry>,
    pub sub_items: Vec<SubItemResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    /// Upstream post id, unique when present.
    pub external_id: Option<String>,
    pub author_id: Option<i64>,
    pub voxsphere_id: Option<i64>,
    pub topic_id: Option<i64>,
    pub award_ids: Vec<i64>,
    pub title: String,
    pub text: Option<String>,
    pub text_html: Option<String>,
    pub media_type: MediaType,
    pub ups: i64,
    pub over18: bool,
    pub spoiler: bool,
    pub link_type: bool,
    pub num_comments: i64,
    pub created_at_unix: Option<f64>,
    pub created_at_human: Option<String>,
    pub media_content: Option<NewMediaContent>,
    pub variants: Vec<MediaVariant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub post_id: i64,
    pub author_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub comment: String,
    pub comment_html: String,
    pub ups: i64,
    pub created_at_unix: Option<f64>,
}
