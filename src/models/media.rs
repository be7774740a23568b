// src/models/media.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

/// The kinds of asset the media fetcher knows how to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Gif,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Gif => "gif",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post media type, stored in `posts.media_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Gif,
    Video,
    Gallery,
    Link,
    Multi,
    Text,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Gif => "gif",
            MediaType::Video => "video",
            MediaType::Gallery => "gallery",
            MediaType::Link => "link",
            MediaType::Multi => "multi",
            MediaType::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(MediaType::Image),
            "gif" => Some(MediaType::Gif),
            "video" => Some(MediaType::Video),
            "gallery" => Some(MediaType::Gallery),
            "link" => Some(MediaType::Link),
            "multi" => Some(MediaType::Multi),
            "text" => Some(MediaType::Text),
            _ => None,
        }
    }
}

/// One encoded rendition of a media item.
///
/// `order_index` is only set for gallery members and names the logical
/// picture the rendition belongs to.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct MediaVariant {
    pub url: String,
    pub height: i32,
    pub width: i32,
    pub order_index: Option<i32>,
}

/// A stored variant with its row id, used by the relocation pass.
#[derive(Debug, Clone, FromRow)]
pub struct StoredVariant {
    pub id: i64,
    pub url: String,
}

/// `[localRef, originalUrl]`, serialized as a two element JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryEntry(pub String, pub String);

/// Result of fetching one sub-item of a `multi` post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubItemResult {
    pub kind: MediaKind,
    pub local_ref: String,
    pub original_link: String,
}

/// Represents the 'media_contents' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MediaContent {
    pub id: i64,
    pub post_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub media_type: String,
    pub original_link: String,
    pub image_link: String,
    pub gif_link: String,
    pub video_link: String,
    pub gallery: Json<Vec<GalleryEntry>>,
    pub sub_items: Json<Vec<SubItemResult>>,
}

/// Query parameters for the viewport-fit media endpoint.
#[derive(Debug, Deserialize, validator::Validate)]
pub struct ViewportParams {
    #[validate(range(min = 1, max = 20000, message = "viewport_height must be between 1 and 20000"))]
    pub viewport_height: i32,
}

/// Response of the viewport-fit media endpoint.
#[derive(Debug, Serialize)]
pub struct PostMedia {
    pub post_id: i64,
    pub media_type: String,
    pub viewport_height: i32,
    pub variants: Vec<MediaVariant>,
}
