// src/ingest/dump.rs

//! Schemas of the JSON dump files and loading of the dump directory.
//!
//! Files are parsed into raw JSON values first and each record is decoded
//! separately, so one malformed record is reported on its own instead of
//! failing the whole file.

use std::fmt;
use std::path::Path;

use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{IngestError, IngestResult};
use crate::models::media::MediaKind;

/// Upstream id. Dumps are inconsistent about quoting them, so both
/// strings and integers are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExternalId(pub String);

impl ExternalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ExternalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = ExternalId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ExternalId, E> {
                Ok(ExternalId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ExternalId, E> {
                Ok(ExternalId(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ExternalId, E> {
                Ok(ExternalId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrophyRecord {
    pub title: String,
    pub image_link: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwardRecord {
    pub title: String,
    pub image_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleRecord {
    pub rule_title: String,
    pub rule_desc: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlairRecord {
    pub text: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoxsphereRecord {
    pub id: ExternalId,
    /// Display title, `r/` prefixed.
    pub title: String,
    pub about: Option<String>,
    #[serde(rename = "logoUrl")]
    pub logo_url: Option<String>,
    #[serde(rename = "bannerUrl")]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub anchors: Value,
    #[serde(rename = "buttonColor")]
    pub button_color: Option<String>,
    #[serde(rename = "headerColor")]
    pub header_color: Option<String>,
    pub banner_background_color: Option<String>,
    #[serde(rename = "creationDate")]
    pub creation_date: Option<f64>,
    #[serde(rename = "creationDateHuman")]
    pub creation_date_human: Option<String>,
    pub over18: Option<bool>,
    pub spoilers_enabled: Option<bool>,
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
    #[serde(default)]
    pub flairs: Vec<FlairRecord>,
    /// `[username, user id]` pairs.
    #[serde(default)]
    pub moderators: Vec<(String, ExternalId)>,
}

impl VoxsphereRecord {
    /// Community name as stored: the title without its `r/` prefix.
    pub fn name(&self) -> String {
        self.title.replacen("r/", "", 1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrophyRef {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: ExternalId,
    pub username: String,
    #[serde(rename = "cakeDay")]
    pub cake_day: Option<f64>,
    #[serde(rename = "cakeDayHuman")]
    pub cake_day_human: Option<String>,
    pub age: Option<String>,
    pub avatar_img: Option<String>,
    pub banner_img: Option<String>,
    #[serde(rename = "publicDescription")]
    pub public_description: Option<String>,
    pub over18: Option<bool>,
    pub keycolor: Option<String>,
    pub primarycolor: Option<String>,
    pub iconcolor: Option<String>,
    pub suspended: Option<bool>,
    #[serde(default)]
    pub trophies: Vec<TrophyRef>,
    /// `[community id, community name]` pairs.
    #[serde(default)]
    pub subreddits_member: Vec<(ExternalId, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwardRef {
    pub title: String,
}

/// One rendition in an upstream resolution list. The source URL sits
/// under a key that also tells what kind of asset it is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resolution {
    pub url: Option<String>,
    pub u: Option<String>,
    pub gif: Option<String>,
    pub mp4: Option<String>,
    #[serde(alias = "y")]
    pub height: Option<i32>,
    #[serde(alias = "x")]
    pub width: Option<i32>,
}

impl Resolution {
    pub fn source(&self) -> Option<(MediaKind, &str)> {
        if let Some(url) = self.url.as_deref().or(self.u.as_deref()) {
            return Some((MediaKind::Image, url));
        }
        self.gif
            .as_deref()
            .or(self.mp4.as_deref())
            .map(|url| (MediaKind::Gif, url))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoSource {
    pub hls_url: Option<String>,
    pub dash_url: Option<String>,
    pub height: Option<i32>,
    pub width: Option<i32>,
}

impl VideoSource {
    /// HLS when available, DASH otherwise.
    pub fn preferred_url(&self) -> Option<&str> {
        self.hls_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or(self.dash_url.as_deref().filter(|url| !url.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryItem {
    pub id: Option<ExternalId>,
    #[serde(default)]
    pub pics: Vec<Resolution>,
}

/// `media_content` of a post. `data` depends on `type` and is decoded
/// by the classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaContentRecord {
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentRecord {
    pub author: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub comment_html: String,
    #[serde(default)]
    pub comment_ups: i64,
    pub parent_comment_id: Option<ExternalId>,
    #[serde(default)]
    pub replies: Vec<CommentRecord>,
    pub created_utc: Option<f64>,
}

impl CommentRecord {
    pub const TOP_LEVEL_SENTINEL: &'static str = "isParent";

    pub fn is_top_level(&self) -> bool {
        self.parent_comment_id
            .as_ref()
            .is_some_and(|id| id.as_str() == Self::TOP_LEVEL_SENTINEL)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostRecord {
    pub id: Option<ExternalId>,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub category: Option<String>,
    pub title: String,
    pub text: Option<String>,
    pub text_html: Option<String>,
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(default)]
    pub link_type: bool,
    #[serde(default)]
    pub num_comments: i64,
    pub createdat: Option<f64>,
    #[serde(rename = "createdatHuman")]
    pub createdat_human: Option<String>,
    pub postflair: Option<String>,
    pub postflaircolor: Option<String>,
    #[serde(default)]
    pub awards: Vec<AwardRef>,
    pub media_content: Option<MediaContentRecord>,
    #[serde(default)]
    pub comments: Vec<CommentRecord>,
}

/// Decodes one raw record, naming its kind in the error.
pub fn decode<T: DeserializeOwned>(kind: &'static str, value: &Value) -> IngestResult<T> {
    T::deserialize(value).map_err(|e| IngestError::MalformedRecord {
        kind,
        reason: e.to_string(),
    })
}

/// A community record together with the topic category it was listed under.
#[derive(Debug, Clone)]
pub struct CategorizedRecord {
    pub category: String,
    pub record: Value,
}

/// The raw contents of a dump directory.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub trophies: Vec<Value>,
    pub awards: Vec<Value>,
    pub voxspheres: Vec<CategorizedRecord>,
    pub users: Vec<Value>,
    pub posts: Vec<Value>,
}

impl Dataset {
    /// Reads `trophies.json`, `awards.json`, `subreddits.json`, `users.json`
    /// and `posts.json` from `dir`. A missing file is treated as empty.
    pub async fn load(dir: &Path) -> IngestResult<Self> {
        let trophies = read_optional(&dir.join("trophies.json")).await?;
        let awards = read_optional(&dir.join("awards.json")).await?;
        let subreddits = read_optional(&dir.join("subreddits.json")).await?;
        let users = read_optional(&dir.join("users.json")).await?;
        let posts = read_optional(&dir.join("posts.json")).await?;

        Self::from_values(trophies, awards, subreddits, users, posts)
    }

    pub fn from_values(
        trophies: Value,
        awards: Value,
        subreddits: Value,
        users: Value,
        posts: Value,
    ) -> IngestResult<Self> {
        Ok(Self {
            trophies: records("trophies", trophies)?,
            awards: records("awards", awards)?,
            voxspheres: categorized("subreddits", subreddits)?,
            users: records("users", users)?,
            posts: records("posts", posts)?,
        })
    }
}

async fn read_optional(path: &Path) -> IngestResult<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| IngestError::MalformedRecord {
            kind: "dump file",
            reason: format!("{}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("{} not found, skipping", path.display());
            Ok(Value::Null)
        }
        Err(e) => Err(e.into()),
    }
}

/// Accepts an array of records or an object whose values are records.
/// Object values keep their file order.
fn records(kind: &'static str, value: Value) -> IngestResult<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        other => Err(IngestError::MalformedRecord {
            kind,
            reason: format!("expected an array or object, found {}", type_name(&other)),
        }),
    }
}

/// `{category: [community, ...]}` flattened into one list, in file order.
fn categorized(kind: &'static str, value: Value) -> IngestResult<Vec<CategorizedRecord>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => {
            let mut out = Vec::new();
            for (category, communities) in map {
                for record in records(kind, communities)? {
                    out.push(CategorizedRecord {
                        category: category.clone(),
                        record,
                    });
                }
            }
            Ok(out)
        }
        other => Err(IngestError::MalformedRecord {
            kind,
            reason: format!("expected an object of categories, found {}", type_name(&other)),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
