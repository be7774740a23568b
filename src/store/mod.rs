// src/store/mod.rs

//! Persistence gateway used by the dataset linker and the relocation pass.
//!
//! Reference entities are deduplicated by natural key. Implementations must
//! treat a natural-key conflict as "return the existing id", never as an
//! error, so that a re-run or a race does not duplicate rows.

pub mod memory;
pub mod postgres;
pub mod records;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::IngestResult;
use crate::models::media::{MediaContent, StoredVariant};
use records::{NewAward, NewComment, NewPost, NewTrophy, NewUser, NewVoxsphere};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Trophy,
    Award,
    Topic,
    Voxsphere,
    User,
    Post,
    Comment,
    Flair,
    Rule,
    MediaContent,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Trophy => "trophy",
            EntityKind::Award => "award",
            EntityKind::Topic => "topic",
            EntityKind::Voxsphere => "voxsphere",
            EntityKind::User => "user",
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
            EntityKind::Flair => "flair",
            EntityKind::Rule => "rule",
            EntityKind::MediaContent => "media_content",
        }
    }

    /// `(table, column)` of the unique natural key, for kinds that have one.
    pub fn natural_key(&self) -> Option<(&'static str, &'static str)> {
        match self {
            EntityKind::Trophy => Some(("trophies", "title")),
            EntityKind::Award => Some(("awards", "title")),
            EntityKind::Topic => Some(("topics", "title")),
            EntityKind::Voxsphere => Some(("voxspheres", "name")),
            EntityKind::User => Some(("users", "username")),
            EntityKind::Post => Some(("posts", "external_id")),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image URL columns of the reference entities, rewritten by relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageColumn {
    TrophyImage,
    AwardImage,
    UserAvatar,
    UserBanner,
    VoxsphereLogo,
    VoxsphereBanner,
}

impl ImageColumn {
    pub const ALL: [ImageColumn; 6] = [
        ImageColumn::TrophyImage,
        ImageColumn::AwardImage,
        ImageColumn::UserAvatar,
        ImageColumn::UserBanner,
        ImageColumn::VoxsphereLogo,
        ImageColumn::VoxsphereBanner,
    ];

    /// `(table, column)` holding the URL.
    pub fn location(&self) -> (&'static str, &'static str) {
        match self {
            ImageColumn::TrophyImage => ("trophies", "image_link"),
            ImageColumn::AwardImage => ("awards", "image_link"),
            ImageColumn::UserAvatar => ("users", "avatar_img"),
            ImageColumn::UserBanner => ("users", "banner_img"),
            ImageColumn::VoxsphereLogo => ("voxspheres", "logo_url"),
            ImageColumn::VoxsphereBanner => ("voxspheres", "banner_url"),
        }
    }
}

impl fmt::Display for ImageColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (table, column) = self.location();
        write!(f, "{table}.{column}")
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Looks up an id by natural key. Kinds without a natural key yield an error.
    async fn find_id(&self, kind: EntityKind, key: &str) -> IngestResult<Option<i64>>;

    /// Bulk insert; rows whose title already exists are skipped.
    /// Returns the number of rows actually inserted.
    async fn create_trophies(&self, trophies: &[NewTrophy]) -> IngestResult<u64>;
    async fn create_awards(&self, awards: &[NewAward]) -> IngestResult<u64>;

    async fn find_or_create_topic(&self, title: &str) -> IngestResult<i64>;

    /// Creates the community with its rules and flairs atomically.
    async fn create_voxsphere(&self, voxsphere: &NewVoxsphere) -> IngestResult<i64>;

    async fn create_user(&self, user: &NewUser) -> IngestResult<i64>;

    async fn find_flair(
        &self,
        voxsphere_id: i64,
        title: &str,
        color_hex: Option<&str>,
    ) -> IngestResult<Option<i64>>;

    /// Creates the post, its award links, media content and variants.
    /// A post whose `external_id` is already stored yields the existing id.
    async fn create_post(&self, post: &NewPost) -> IngestResult<i64>;
    async fn set_post_flair(&self, post_id: i64, flair_id: i64) -> IngestResult<()>;

    async fn create_comment(&self, comment: &NewComment) -> IngestResult<i64>;
    /// Points every child at `parent_id` and records the reply count.
    async fn attach_replies(&self, parent_id: i64, child_ids: &[i64]) -> IngestResult<()>;
    async fn attach_comments(&self, post_id: i64, comment_ids: &[i64]) -> IngestResult<()>;

    /// Returns `false` when no community has that name.
    async fn update_member_count(&self, name: &str, total: i64, human: &str) -> IngestResult<bool>;

    async fn checkpoint(&self, kind: EntityKind) -> IngestResult<Option<String>>;
    async fn save_checkpoint(&self, kind: EntityKind, key: &str) -> IngestResult<()>;

    async fn media_contents(&self) -> IngestResult<Vec<MediaContent>>;
    async fn update_media_content(&self, content: &MediaContent) -> IngestResult<()>;
    async fn media_variants(&self) -> IngestResult<Vec<StoredVariant>>;
    async fn update_variant_url(&self, id: i64, url: &str) -> IngestResult<()>;

    /// `(row id, url)` for every row with a non-empty URL in `column`.
    async fn entity_images(&self, column: ImageColumn) -> IngestResult<Vec<(i64, String)>>;
    async fn update_entity_image(&self, column: ImageColumn, id: i64, url: &str) -> IngestResult<()>;

    /// Removes a post with its comments, media content and variants.
    async fn delete_post(&self, post_id: i64) -> IngestResult<()>;
}
