// src/ingest/linker.rs

//! Imports a dump directory into the store.
//!
//! Stages run strictly in order: trophies, awards, voxspheres, users,
//! posts (with comments and media), member counts. Within a stage records
//! are processed in source order. A record that fails is reported and the
//! stage moves on, unless `fail_fast` is set.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::ingest::classify::{FetchJob, assemble, classify, post_media_type};
use crate::ingest::comments::CommentTreeBuilder;
use crate::ingest::dump::{
    AwardRecord, Dataset, PostRecord, TrophyRecord, UserRecord, VoxsphereRecord, decode,
};
use crate::ingest::report::{IngestReport, Stage};
use crate::media::fetcher::{FetchedMedia, LocalRef, MediaFetcher};
use crate::store::records::{
    NewAward, NewFlair, NewPost, NewRule, NewTrophy, NewUser, NewVoxsphere,
};
use crate::store::{EntityKind, PersistenceGateway};
use crate::utils::html::clean_optional_html;
use crate::utils::human::readable_count;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Abort on the first failing record instead of reporting it.
    pub fail_fast: bool,
    /// Media downloads in flight per post.
    pub fetch_concurrency: usize,
    /// Download height for multi-resolution images; `None` takes the largest.
    pub target_height: Option<i32>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            fetch_concurrency: 4,
            target_height: None,
        }
    }
}

/// A decoded record and the key it is reported and checkpointed under.
/// Decode errors are kept as text so the record can be reported later.
struct Keyed<T> {
    key: String,
    kind: &'static str,
    record: Result<T, String>,
}

impl<T> Keyed<T> {
    fn record(&self) -> IngestResult<&T> {
        self.record.as_ref().map_err(|reason| IngestError::MalformedRecord {
            kind: self.kind,
            reason: reason.clone(),
        })
    }
}

fn decode_keyed<'v, T, K>(
    kind: &'static str,
    values: impl IntoIterator<Item = &'v Value>,
    key_of: K,
) -> Vec<Keyed<T>>
where
    T: DeserializeOwned,
    K: Fn(&T) -> String,
{
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match decode::<T>(kind, value) {
            Ok(record) => Keyed {
                key: key_of(&record),
                kind,
                record: Ok(record),
            },
            Err(err) => Keyed {
                key: format!("index:{index}"),
                kind,
                record: Err(decode_reason(err)),
            },
        })
        .collect()
}

fn decode_reason(err: IngestError) -> String {
    match err {
        IngestError::MalformedRecord { reason, .. } => reason,
        other => other.to_string(),
    }
}

struct CategorizedVoxsphere {
    category: String,
    record: VoxsphereRecord,
}

/// Whether a record produced a new row or matched an existing one.
enum Outcome {
    Created,
    Existing,
}

pub struct DatasetLinker<'a> {
    store: &'a dyn PersistenceGateway,
    fetcher: &'a dyn MediaFetcher,
    options: IngestOptions,
}

impl<'a> DatasetLinker<'a> {
    pub fn new(store: &'a dyn PersistenceGateway, fetcher: &'a dyn MediaFetcher, options: IngestOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    pub async fn run(&self, dataset: &Dataset) -> IngestResult<IngestReport> {
        let mut report = IngestReport {
            started_at: Some(Utc::now()),
            ..IngestReport::default()
        };

        let voxspheres: Vec<Keyed<CategorizedVoxsphere>> = dataset
            .voxspheres
            .iter()
            .enumerate()
            .map(|(index, entry)| match decode::<VoxsphereRecord>("voxsphere", &entry.record) {
                Ok(record) => Keyed {
                    key: record.name(),
                    kind: "voxsphere",
                    record: Ok(CategorizedVoxsphere {
                        category: entry.category.clone(),
                        record,
                    }),
                },
                Err(err) => Keyed {
                    key: format!("index:{index}"),
                    kind: "voxsphere",
                    record: Err(decode_reason(err)),
                },
            })
            .collect();
        let users = decode_keyed::<UserRecord, _>("user", &dataset.users, |u| u.username.clone());
        let posts = decode_keyed::<PostRecord, _>("post", &dataset.posts, |p| {
            p.id.as_ref().map(|id| id.as_str().to_string()).unwrap_or_default()
        });
        // Posts without an upstream id are keyed by position.
        let posts: Vec<Keyed<PostRecord>> = posts
            .into_iter()
            .enumerate()
            .map(|(index, mut keyed)| {
                if keyed.key.is_empty() {
                    keyed.key = format!("index:{index}");
                }
                keyed
            })
            .collect();

        self.link_trophies(&dataset.trophies, &mut report).await?;
        self.link_awards(&dataset.awards, &mut report).await?;
        self.link_voxspheres(&voxspheres, &mut report).await?;
        self.link_users(&users, &voxspheres, &mut report).await?;
        self.link_posts(&posts, &mut report).await?;
        self.update_member_counts(&voxspheres, &users, &mut report).await?;

        report.finished_at = Some(Utc::now());
        tracing::info!(
            failures = report.failures.len(),
            comments = report.comments_written,
            media_unavailable = report.media_unavailable,
            "Dataset ingest finished."
        );
        Ok(report)
    }

    fn fail(&self, report: &mut IngestReport, stage: Stage, key: &str, err: IngestError) -> IngestResult<()> {
        report.record_failure(stage, key, &err);
        if self.options.fail_fast {
            return Err(err);
        }
        Ok(())
    }

    async fn settle(
        &self,
        report: &mut IngestReport,
        stage: Stage,
        kind: EntityKind,
        key: &str,
        outcome: IngestResult<Outcome>,
    ) -> IngestResult<()> {
        match outcome {
            Ok(outcome) => {
                let stats = report.stage_mut(stage);
                match outcome {
                    Outcome::Created => stats.created += 1,
                    Outcome::Existing => stats.skipped += 1,
                }
                self.store.save_checkpoint(kind, key).await
            }
            Err(err) => self.fail(report, stage, key, err),
        }
    }

    /// Index of the first record still to process.
    async fn resume_position<T>(&self, kind: EntityKind, records: &[Keyed<T>]) -> IngestResult<usize> {
        let Some(last_key) = self.store.checkpoint(kind).await? else {
            return Ok(0);
        };
        match records.iter().position(|r| r.key == last_key) {
            Some(index) => {
                tracing::info!(%kind, last_key = %last_key, "resuming after checkpoint");
                Ok(index + 1)
            }
            None => {
                tracing::warn!(%kind, last_key = %last_key, "checkpoint key not in dump, starting from the beginning");
                Ok(0)
            }
        }
    }

    async fn link_trophies(&self, values: &[Value], report: &mut IngestReport) -> IngestResult<()> {
        tracing::info!(count = values.len(), "Linking trophies...");
        let mut batch = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            match decode::<TrophyRecord>("trophy", value) {
                Ok(t) => batch.push(NewTrophy {
                    title: t.title.trim().to_string(),
                    image_link: t.image_link,
                    description: t.description,
                }),
                Err(err) => self.fail(report, Stage::Trophies, &format!("index:{index}"), err)?,
            }
        }

        match self.store.create_trophies(&batch).await {
            Ok(inserted) => {
                let stats = report.stage_mut(Stage::Trophies);
                stats.created += inserted as usize;
                stats.skipped += batch.len().saturating_sub(inserted as usize);
                Ok(())
            }
            Err(err) => self.fail(report, Stage::Trophies, "batch", err),
        }
    }

    async fn link_awards(&self, values: &[Value], report: &mut IngestReport) -> IngestResult<()> {
        tracing::info!(count = values.len(), "Linking awards...");
        let mut batch = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            match decode::<AwardRecord>("award", value) {
                Ok(a) => batch.push(NewAward {
                    title: a.title.trim().to_string(),
                    image_link: a.image_link,
                }),
                Err(err) => self.fail(report, Stage::Awards, &format!("index:{index}"), err)?,
            }
        }

        match self.store.create_awards(&batch).await {
            Ok(inserted) => {
                let stats = report.stage_mut(Stage::Awards);
                stats.created += inserted as usize;
                stats.skipped += batch.len().saturating_sub(inserted as usize);
                Ok(())
            }
            Err(err) => self.fail(report, Stage::Awards, "batch", err),
        }
    }

    async fn link_voxspheres(
        &self,
        voxspheres: &[Keyed<CategorizedVoxsphere>],
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        tracing::info!(count = voxspheres.len(), "Linking voxspheres...");
        let start = self.resume_position(EntityKind::Voxsphere, voxspheres).await?;
        report.stage_mut(Stage::Voxspheres).skipped += start;

        for item in &voxspheres[start..] {
            let outcome = match item.record() {
                Ok(entry) => self.link_voxsphere(entry).await,
                Err(err) => Err(err),
            };
            self.settle(report, Stage::Voxspheres, EntityKind::Voxsphere, &item.key, outcome)
                .await?;
        }
        Ok(())
    }

    async fn link_voxsphere(&self, entry: &CategorizedVoxsphere) -> IngestResult<Outcome> {
        let record = &entry.record;
        let name = record.name();
        let topic_id = self.store.find_or_create_topic(&entry.category).await?;

        if self.store.find_id(EntityKind::Voxsphere, &name).await?.is_some() {
            return Ok(Outcome::Existing);
        }

        self.store
            .create_voxsphere(&NewVoxsphere {
                name,
                topic_id: Some(topic_id),
                about: record.about.clone(),
                logo_url: record.logo_url.clone(),
                banner_url: record.banner_url.clone(),
                anchors: record.anchors.clone(),
                button_color_hex: record.button_color.clone(),
                header_color_hex: record.header_color.clone(),
                banner_bg_color_hex: record.banner_background_color.clone(),
                created_at_unix: record.creation_date,
                created_at_human: record.creation_date_human.clone(),
                over18: record.over18.unwrap_or(false),
                spoilers_enabled: record.spoilers_enabled.unwrap_or(false),
                rules: record
                    .rules
                    .iter()
                    .map(|r| NewRule {
                        title: r.rule_title.clone(),
                        description: r.rule_desc.clone(),
                    })
                    .collect(),
                flairs: record
                    .flairs
                    .iter()
                    .map(|f| NewFlair {
                        title: f.text.clone(),
                        color_hex: f.color.clone(),
                    })
                    .collect(),
            })
            .await?;
        Ok(Outcome::Created)
    }

    async fn link_users(
        &self,
        users: &[Keyed<UserRecord>],
        voxspheres: &[Keyed<CategorizedVoxsphere>],
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        tracing::info!(count = users.len(), "Linking users...");
        let start = self.resume_position(EntityKind::User, users).await?;
        report.stage_mut(Stage::Users).skipped += start;

        for item in &users[start..] {
            let outcome = match item.record() {
                Ok(user) => self.link_user(user, voxspheres, report).await,
                Err(err) => Err(err),
            };
            self.settle(report, Stage::Users, EntityKind::User, &item.key, outcome)
                .await?;
        }
        Ok(())
    }

    async fn link_user(
        &self,
        user: &UserRecord,
        voxspheres: &[Keyed<CategorizedVoxsphere>],
        report: &mut IngestReport,
    ) -> IngestResult<Outcome> {
        if self.store.find_id(EntityKind::User, &user.username).await?.is_some() {
            return Ok(Outcome::Existing);
        }

        let mut trophy_ids = Vec::with_capacity(user.trophies.len());
        for trophy in &user.trophies {
            match self.store.find_id(EntityKind::Trophy, trophy.title.trim()).await? {
                Some(id) => trophy_ids.push(id),
                None => report.unresolved("trophy"),
            }
        }

        let mut member_of = Vec::with_capacity(user.subreddits_member.len());
        for (_, name) in &user.subreddits_member {
            let name = name.strip_prefix("r/").unwrap_or(name);
            match self.store.find_id(EntityKind::Voxsphere, name).await? {
                Some(id) => member_of.push(id),
                None => report.unresolved("voxsphere"),
            }
        }

        let mut moderator_of = Vec::new();
        let moderated = voxspheres
            .iter()
            .filter_map(|item| item.record.as_ref().ok())
            .filter(|entry| entry.record.moderators.iter().any(|(_, id)| *id == user.id));
        for entry in moderated {
            match self.store.find_id(EntityKind::Voxsphere, &entry.record.name()).await? {
                Some(id) => moderator_of.push(id),
                None => report.unresolved("voxsphere"),
            }
        }

        self.store
            .create_user(&NewUser {
                username: user.username.clone(),
                email: format!("{}@voxpopuli.invalid", Uuid::new_v4()),
                cake_day: user.cake_day,
                cake_day_human: user.cake_day_human.clone(),
                account_age: user.age.clone(),
                avatar_img: user.avatar_img.clone(),
                banner_img: user.banner_img.clone(),
                public_description: user.public_description.clone(),
                over18: user.over18.unwrap_or(false),
                keycolor_hex: user.keycolor.clone(),
                primarycolor_hex: user.primarycolor.clone(),
                iconcolor_hex: user.iconcolor.clone(),
                suspended: user.suspended.unwrap_or(false),
                trophy_ids,
                member_of,
                moderator_of,
            })
            .await?;
        Ok(Outcome::Created)
    }

    async fn link_posts(&self, posts: &[Keyed<PostRecord>], report: &mut IngestReport) -> IngestResult<()> {
        tracing::info!(count = posts.len(), "Linking posts...");
        let start = self.resume_position(EntityKind::Post, posts).await?;
        report.stage_mut(Stage::Posts).skipped += start;

        for item in &posts[start..] {
            let outcome = match item.record() {
                Ok(post) => self.link_post(post, report).await,
                Err(err) => Err(err),
            };
            self.settle(report, Stage::Posts, EntityKind::Post, &item.key, outcome)
                .await?;
        }
        Ok(())
    }

    async fn resolve(
        &self,
        kind: EntityKind,
        key: Option<&str>,
        report: &mut IngestReport,
    ) -> IngestResult<Option<i64>> {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let id = self.store.find_id(kind, key).await?;
        if id.is_none() {
            report.unresolved(kind.as_str());
        }
        Ok(id)
    }

    async fn link_post(&self, post: &PostRecord, report: &mut IngestReport) -> IngestResult<Outcome> {
        let external_id = post.id.as_ref().map(|id| id.as_str().to_string());
        if let Some(external_id) = external_id.as_deref() {
            if self.store.find_id(EntityKind::Post, external_id).await?.is_some() {
                return Ok(Outcome::Existing);
            }
        }

        let author_id = self.resolve(EntityKind::User, post.author.as_deref(), report).await?;
        let voxsphere_name = post
            .subreddit
            .as_deref()
            .map(|name| name.strip_prefix("r/").unwrap_or(name));
        let voxsphere_id = self.resolve(EntityKind::Voxsphere, voxsphere_name, report).await?;
        let topic_id = self.resolve(EntityKind::Topic, post.category.as_deref(), report).await?;

        let mut award_ids = Vec::with_capacity(post.awards.len());
        for award in &post.awards {
            if let Some(id) = self.resolve(EntityKind::Award, Some(award.title.trim()), report).await? {
                award_ids.push(id);
            }
        }

        let plan = classify(post, self.options.target_height)?;
        let (media_content, variants) = match &plan {
            Some(plan) => {
                let fetched = self.fetch_all(&plan.jobs, report).await?;
                (Some(assemble(plan, fetched)), plan.variants.clone())
            }
            None => (None, Vec::new()),
        };

        let post_id = self
            .store
            .create_post(&NewPost {
                external_id,
                author_id,
                voxsphere_id,
                topic_id,
                award_ids,
                title: post.title.clone(),
                text: post.text.clone(),
                text_html: clean_optional_html(post.text_html.as_deref()),
                media_type: post_media_type(post, plan.as_ref()),
                ups: post.ups,
                over18: post.over_18,
                spoiler: post.spoiler,
                link_type: post.link_type,
                num_comments: post.num_comments,
                created_at_unix: post.createdat,
                created_at_human: post.createdat_human.clone(),
                media_content,
                variants,
            })
            .await?;

        if let Err(err) = self.finish_post(post_id, post, voxsphere_id, report).await {
            // Drop the half-written post so a rerun starts it over.
            self.store.delete_post(post_id).await?;
            return Err(err);
        }

        Ok(Outcome::Created)
    }

    /// Flair and comment forest of a freshly created post.
    async fn finish_post(
        &self,
        post_id: i64,
        post: &PostRecord,
        voxsphere_id: Option<i64>,
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        if let Some(flair) = post.postflair.as_deref().filter(|f| !f.is_empty()) {
            let flair_id = match voxsphere_id {
                Some(voxsphere_id) => {
                    self.store
                        .find_flair(voxsphere_id, flair, post.postflaircolor.as_deref())
                        .await?
                }
                None => None,
            };
            match flair_id {
                Some(flair_id) => self.store.set_post_flair(post_id, flair_id).await?,
                None => report.unresolved(EntityKind::Flair.as_str()),
            }
        }

        let (top_level, tally) = CommentTreeBuilder::new(self.store)
            .build(post_id, &post.comments)
            .await?;
        if !top_level.is_empty() {
            self.store.attach_comments(post_id, &top_level).await?;
        }
        report.comments_written += tally.comments;
        for _ in 0..tally.unresolved_authors {
            report.unresolved("comment author");
        }

        Ok(())
    }

    /// Runs the jobs with bounded concurrency. Results come back in job order.
    async fn fetch_all(&self, jobs: &[FetchJob], report: &mut IngestReport) -> IngestResult<Vec<FetchedMedia>> {
        let results: Vec<IngestResult<FetchedMedia>> = stream::iter(jobs)
            .map(|job| self.fetcher.fetch(job.kind, &job.url))
            .buffered(self.options.fetch_concurrency.max(1))
            .collect()
            .await;

        let fetched = results.into_iter().collect::<IngestResult<Vec<_>>>()?;
        for media in &fetched {
            if media.local_ref == LocalRef::Unavailable {
                report.media_unavailable += 1;
            }
            if media.was_resized {
                report.media_resized += 1;
            }
        }
        Ok(fetched)
    }

    async fn update_member_counts(
        &self,
        voxspheres: &[Keyed<CategorizedVoxsphere>],
        users: &[Keyed<UserRecord>],
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        tracing::info!("Updating member counts...");
        let members: Vec<&UserRecord> = users.iter().filter_map(|u| u.record.as_ref().ok()).collect();

        for item in voxspheres {
            let Ok(entry) = item.record.as_ref() else {
                continue;
            };
            let id = &entry.record.id;
            let total = members
                .iter()
                .filter(|user| user.subreddits_member.iter().any(|(member_of, _)| member_of == id))
                .count() as i64;

            match self
                .store
                .update_member_count(&item.key, total, &readable_count(total))
                .await
            {
                Ok(true) => report.stage_mut(Stage::MemberCounts).created += 1,
                Ok(false) => {
                    report.stage_mut(Stage::MemberCounts).skipped += 1;
                    report.unresolved(EntityKind::Voxsphere.as_str());
                }
                Err(err) => self.fail(report, Stage::MemberCounts, &item.key, err)?,
            }
        }
        Ok(())
    }
}
