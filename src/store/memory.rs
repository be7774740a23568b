// src/store/memory.rs

//! In-process gateway for dry runs and tests. Mirrors the natural-key
//! semantics of the Postgres store without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use tokio::sync::Mutex;

use super::records::{NewAward, NewComment, NewFlair, NewPost, NewTrophy, NewUser, NewVoxsphere};
use super::{EntityKind, ImageColumn, PersistenceGateway};
use crate::error::{IngestError, IngestResult};
use crate::models::media::{MediaContent, MediaVariant, StoredVariant};

#[derive(Debug, Clone)]
pub struct VoxsphereRow {
    pub id: i64,
    pub record: NewVoxsphere,
    pub total_members: i64,
    pub total_members_human: String,
}

#[derive(Debug, Clone)]
pub struct FlairRow {
    pub id: i64,
    pub voxsphere_id: i64,
    pub flair: NewFlair,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub record: NewPost,
    pub flair_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: i64,
    pub record: NewComment,
    pub reply_count: i32,
}

#[derive(Debug, Clone)]
pub struct VariantRow {
    pub id: i64,
    pub post_id: i64,
    pub variant: MediaVariant,
}

/// Everything the store holds. Exposed so callers can inspect a dry run.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    next_id: i64,
    pub trophies: Vec<(i64, NewTrophy)>,
    pub awards: Vec<(i64, NewAward)>,
    pub topics: Vec<(i64, String)>,
    pub voxspheres: Vec<VoxsphereRow>,
    pub flairs: Vec<FlairRow>,
    pub users: Vec<(i64, NewUser)>,
    pub posts: Vec<PostRow>,
    pub media_contents: Vec<MediaContent>,
    pub variants: Vec<VariantRow>,
    pub comments: Vec<CommentRow>,
    pub checkpoints: HashMap<EntityKind, String>,
    /// Comment inserts plus reply updates.
    pub comment_writes: usize,
}

impl MemoryState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn comment_mut(&mut self, id: i64) -> IngestResult<&mut CommentRow> {
        self.comments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| IngestError::ReferenceNotFound {
                kind: "comment",
                key: id.to_string(),
            })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing state, e.g. to resume a previous dry run.
    pub fn with_state(state: MemoryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn find_id(&self, kind: EntityKind, key: &str) -> IngestResult<Option<i64>> {
        let state = self.state.lock().await;
        let id = match kind {
            EntityKind::Trophy => state.trophies.iter().find(|(_, t)| t.title == key).map(|(id, _)| *id),
            EntityKind::Award => state.awards.iter().find(|(_, a)| a.title == key).map(|(id, _)| *id),
            EntityKind::Topic => state.topics.iter().find(|(_, t)| t == key).map(|(id, _)| *id),
            EntityKind::Voxsphere => state
                .voxspheres
                .iter()
                .find(|v| v.record.name == key)
                .map(|v| v.id),
            EntityKind::User => state.users.iter().find(|(_, u)| u.username == key).map(|(id, _)| *id),
            EntityKind::Post => state
                .posts
                .iter()
                .find(|p| p.record.external_id.as_deref() == Some(key))
                .map(|p| p.id),
            other => {
                return Err(IngestError::Persistence(format!("{other} has no natural key")));
            }
        };
        Ok(id)
    }

    async fn create_trophies(&self, trophies: &[NewTrophy]) -> IngestResult<u64> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for trophy in trophies {
            let title = trophy.title.trim();
            if state.trophies.iter().any(|(_, t)| t.title == title) {
                continue;
            }
            let id = state.allocate();
            state.trophies.push((
                id,
                NewTrophy {
                    title: title.to_string(),
                    ..trophy.clone()
                },
            ));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn create_awards(&self, awards: &[NewAward]) -> IngestResult<u64> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for award in awards {
            let title = award.title.trim();
            if state.awards.iter().any(|(_, a)| a.title == title) {
                continue;
            }
            let id = state.allocate();
            state.awards.push((
                id,
                NewAward {
                    title: title.to_string(),
                    ..award.clone()
                },
            ));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find_or_create_topic(&self, title: &str) -> IngestResult<i64> {
        let mut state = self.state.lock().await;
        if let Some((id, _)) = state.topics.iter().find(|(_, t)| t == title) {
            return Ok(*id);
        }
        let id = state.allocate();
        state.topics.push((id, title.to_string()));
        Ok(id)
    }

    async fn create_voxsphere(&self, voxsphere: &NewVoxsphere) -> IngestResult<i64> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.voxspheres.iter().find(|v| v.record.name == voxsphere.name) {
            return Ok(existing.id);
        }

        let id = state.allocate();
        for flair in &voxsphere.flairs {
            let flair_id = state.allocate();
            state.flairs.push(FlairRow {
                id: flair_id,
                voxsphere_id: id,
                flair: flair.clone(),
            });
        }
        state.voxspheres.push(VoxsphereRow {
            id,
            record: voxsphere.clone(),
            total_members: 0,
            total_members_human: String::new(),
        });
        Ok(id)
    }

    async fn create_user(&self, user: &NewUser) -> IngestResult<i64> {
        let mut state = self.state.lock().await;
        if let Some((id, _)) = state.users.iter().find(|(_, u)| u.username == user.username) {
            return Ok(*id);
        }
        let id = state.allocate();
        state.users.push((id, user.clone()));
        Ok(id)
    }

    async fn find_flair(
        &self,
        voxsphere_id: i64,
        title: &str,
        color_hex: Option<&str>,
    ) -> IngestResult<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .flairs
            .iter()
            .find(|row| {
                row.voxsphere_id == voxsphere_id
                    && row.flair.title == title
                    && color_hex.is_none_or(|c| row.flair.color_hex.as_deref() == Some(c))
            })
            .map(|row| row.id))
    }

    async fn create_post(&self, post: &NewPost) -> IngestResult<i64> {
        let mut state = self.state.lock().await;
        if let Some(external_id) = post.external_id.as_deref() {
            let existing = state
                .posts
                .iter()
                .find(|p| p.record.external_id.as_deref() == Some(external_id));
            if let Some(existing) = existing {
                return Ok(existing.id);
            }
        }
        let id = state.allocate();

        if let Some(content) = &post.media_content {
            let content_id = state.allocate();
            state.media_contents.push(MediaContent {
                id: content_id,
                post_id: id,
                media_type: content.media_type.as_str().to_string(),
                original_link: content.original_link.clone(),
                image_link: content.image_link.clone(),
                gif_link: content.gif_link.clone(),
                video_link: content.video_link.clone(),
                gallery: Json(content.gallery.clone()),
                sub_items: Json(content.sub_items.clone()),
            });
        }

        for variant in &post.variants {
            let variant_id = state.allocate();
            state.variants.push(VariantRow {
                id: variant_id,
                post_id: id,
                variant: variant.clone(),
            });
        }

        state.posts.push(PostRow {
            id,
            record: post.clone(),
            flair_id: None,
        });
        Ok(id)
    }

    async fn set_post_flair(&self, post_id: i64, flair_id: i64) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| IngestError::ReferenceNotFound {
                kind: "post",
                key: post_id.to_string(),
            })?;
        post.flair_id = Some(flair_id);
        Ok(())
    }

    async fn create_comment(&self, comment: &NewComment) -> IngestResult<i64> {
        let mut state = self.state.lock().await;
        if !state.posts.iter().any(|p| p.id == comment.post_id) {
            return Err(IngestError::ReferenceNotFound {
                kind: "post",
                key: comment.post_id.to_string(),
            });
        }
        let id = state.allocate();
        state.comments.push(CommentRow {
            id,
            record: comment.clone(),
            reply_count: 0,
        });
        state.comment_writes += 1;
        Ok(id)
    }

    async fn attach_replies(&self, parent_id: i64, child_ids: &[i64]) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        for child_id in child_ids {
            if *child_id == parent_id {
                return Err(IngestError::Persistence(format!(
                    "comment {parent_id} cannot reply to itself"
                )));
            }
            state.comment_mut(*child_id)?.record.parent_id = Some(parent_id);
        }
        state.comment_mut(parent_id)?.reply_count = child_ids.len() as i32;
        state.comment_writes += 1;
        Ok(())
    }

    async fn attach_comments(&self, post_id: i64, comment_ids: &[i64]) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        for comment_id in comment_ids {
            state.comment_mut(*comment_id)?.record.post_id = post_id;
        }
        Ok(())
    }

    async fn update_member_count(&self, name: &str, total: i64, human: &str) -> IngestResult<bool> {
        let mut state = self.state.lock().await;
        match state.voxspheres.iter_mut().find(|v| v.record.name == name) {
            Some(row) => {
                row.total_members = total;
                row.total_members_human = human.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn checkpoint(&self, kind: EntityKind) -> IngestResult<Option<String>> {
        Ok(self.state.lock().await.checkpoints.get(&kind).cloned())
    }

    async fn save_checkpoint(&self, kind: EntityKind, key: &str) -> IngestResult<()> {
        self.state.lock().await.checkpoints.insert(kind, key.to_string());
        Ok(())
    }

    async fn media_contents(&self) -> IngestResult<Vec<MediaContent>> {
        Ok(self.state.lock().await.media_contents.clone())
    }

    async fn update_media_content(&self, content: &MediaContent) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .media_contents
            .iter_mut()
            .find(|c| c.id == content.id)
            .ok_or_else(|| IngestError::Persistence(format!("media content {} does not exist", content.id)))?;
        *row = content.clone();
        Ok(())
    }

    async fn media_variants(&self) -> IngestResult<Vec<StoredVariant>> {
        let state = self.state.lock().await;
        Ok(state
            .variants
            .iter()
            .map(|row| StoredVariant {
                id: row.id,
                url: row.variant.url.clone(),
            })
            .collect())
    }

    async fn update_variant_url(&self, id: i64, url: &str) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .variants
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| IngestError::Persistence(format!("media variant {id} does not exist")))?;
        row.variant.url = url.to_string();
        Ok(())
    }

    async fn entity_images(&self, column: ImageColumn) -> IngestResult<Vec<(i64, String)>> {
        let state = self.state.lock().await;
        let rows: Vec<(i64, Option<&String>)> = match column {
            ImageColumn::TrophyImage => state.trophies.iter().map(|(id, t)| (*id, t.image_link.as_ref())).collect(),
            ImageColumn::AwardImage => state.awards.iter().map(|(id, a)| (*id, a.image_link.as_ref())).collect(),
            ImageColumn::UserAvatar => state.users.iter().map(|(id, u)| (*id, u.avatar_img.as_ref())).collect(),
            ImageColumn::UserBanner => state.users.iter().map(|(id, u)| (*id, u.banner_img.as_ref())).collect(),
            ImageColumn::VoxsphereLogo => state
                .voxspheres
                .iter()
                .map(|v| (v.id, v.record.logo_url.as_ref()))
                .collect(),
            ImageColumn::VoxsphereBanner => state
                .voxspheres
                .iter()
                .map(|v| (v.id, v.record.banner_url.as_ref()))
                .collect(),
        };
        Ok(rows
            .into_iter()
            .filter_map(|(id, url)| url.filter(|u| !u.is_empty()).map(|u| (id, u.clone())))
            .collect())
    }

    async fn update_entity_image(&self, column: ImageColumn, id: i64, url: &str) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        let slot = match column {
            ImageColumn::TrophyImage => state.trophies.iter_mut().find(|(i, _)| *i == id).map(|(_, t)| &mut t.image_link),
            ImageColumn::AwardImage => state.awards.iter_mut().find(|(i, _)| *i == id).map(|(_, a)| &mut a.image_link),
            ImageColumn::UserAvatar => state.users.iter_mut().find(|(i, _)| *i == id).map(|(_, u)| &mut u.avatar_img),
            ImageColumn::UserBanner => state.users.iter_mut().find(|(i, _)| *i == id).map(|(_, u)| &mut u.banner_img),
            ImageColumn::VoxsphereLogo => state
                .voxspheres
                .iter_mut()
                .find(|v| v.id == id)
                .map(|v| &mut v.record.logo_url),
            ImageColumn::VoxsphereBanner => state
                .voxspheres
                .iter_mut()
                .find(|v| v.id == id)
                .map(|v| &mut v.record.banner_url),
        };
        let slot = slot.ok_or_else(|| IngestError::ReferenceNotFound {
            kind: column.location().0,
            key: id.to_string(),
        })?;
        *slot = Some(url.to_string());
        Ok(())
    }

    async fn delete_post(&self, post_id: i64) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        state.posts.retain(|p| p.id != post_id);
        state.comments.retain(|c| c.record.post_id != post_id);
        state.media_contents.retain(|c| c.post_id != post_id);
        state.variants.retain(|v| v.post_id != post_id);
        Ok(())
    }
}