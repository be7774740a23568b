// src/store/postgres.rs

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::records::{NewAward, NewComment, NewPost, NewTrophy, NewUser, NewVoxsphere};
use super::{EntityKind, ImageColumn, PersistenceGateway};
use crate::error::{IngestError, IngestResult};
use crate::models::media::{MediaContent, StoredVariant};

/// Rows per multi-row INSERT; keeps us well below the bind parameter limit.
const INSERT_CHUNK: usize = 1000;

/// Connects to Postgres, retrying while the database comes up.
pub async fn connect_with_retry(database_url: &str, max_retries: u32) -> IngestResult<PgPool> {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                retry_count += 1;
                if retry_count > max_retries {
                    return Err(IngestError::Persistence(format!(
                        "failed to connect to database after {} retries: {}",
                        max_retries, e
                    )));
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

pub async fn run_migrations(pool: &PgPool) -> IngestResult<()> {
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations applied successfully.");
    Ok(())
}

/// Postgres-backed gateway. Natural-key inserts rely on the unique
/// constraints and `ON CONFLICT DO NOTHING`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceGateway for PgStore {
    async fn find_id(&self, kind: EntityKind, key: &str) -> IngestResult<Option<i64>> {
        let (table, column) = kind.natural_key().ok_or_else(|| {
            IngestError::Persistence(format!("{kind} has no natural key"))
        })?;

        let sql = format!("SELECT id FROM {table} WHERE {column} = $1");
        let id = sqlx::query_scalar::<_, i64>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn create_trophies(&self, trophies: &[NewTrophy]) -> IngestResult<u64> {
        let mut inserted = 0;
        for chunk in trophies.chunks(INSERT_CHUNK) {
            let mut query_builder =
                QueryBuilder::<Postgres>::new("INSERT INTO trophies (title, image_link, description) ");
            query_builder.push_values(chunk, |mut row, trophy| {
                row.push_bind(trophy.title.trim().to_string())
                    .push_bind(trophy.image_link.clone())
                    .push_bind(trophy.description.clone());
            });
            query_builder.push(" ON CONFLICT (title) DO NOTHING");

            inserted += query_builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn create_awards(&self, awards: &[NewAward]) -> IngestResult<u64> {
        let mut inserted = 0;
        for chunk in awards.chunks(INSERT_CHUNK) {
            let mut query_builder = QueryBuilder::<Postgres>::new("INSERT INTO awards (title, image_link) ");
            query_builder.push_values(chunk, |mut row, award| {
                row.push_bind(award.title.trim().to_string())
                    .push_bind(award.image_link.clone());
            });
            query_builder.push(" ON CONFLICT (title) DO NOTHING");

            inserted += query_builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn find_or_create_topic(&self, title: &str) -> IngestResult<i64> {
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO topics (title) VALUES ($1) ON CONFLICT (title) DO NOTHING RETURNING id",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(id),
            None => sqlx::query_scalar::<_, i64>("SELECT id FROM topics WHERE title = $1")
                .bind(title)
                .fetch_one(&self.pool)
                .await
                .map_err(IngestError::from),
        }
    }

    async fn create_voxsphere(&self, voxsphere: &NewVoxsphere) -> IngestResult<i64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO voxspheres (
                name, topic_id, about, logo_url, banner_url, anchors,
                button_color_hex, header_color_hex, banner_bg_color_hex,
                created_at_unix, created_at_human, over18, spoilers_enabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&voxsphere.name)
        .bind(voxsphere.topic_id)
        .bind(&voxsphere.about)
        .bind(&voxsphere.logo_url)
        .bind(&voxsphere.banner_url)
        .bind(&voxsphere.anchors)
        .bind(&voxsphere.button_color_hex)
        .bind(&voxsphere.header_color_hex)
        .bind(&voxsphere.banner_bg_color_hex)
        .bind(voxsphere.created_at_unix)
        .bind(&voxsphere.created_at_human)
        .bind(voxsphere.over18)
        .bind(voxsphere.spoilers_enabled)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = inserted else {
            // Already imported: keep the existing row and its rules/flairs.
            let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM voxspheres WHERE name = $1")
                .bind(&voxsphere.name)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(existing);
        };

        if !voxsphere.rules.is_empty() {
            let mut query_builder =
                QueryBuilder::<Postgres>::new("INSERT INTO rules (voxsphere_id, title, description) ");
            query_builder.push_values(&voxsphere.rules, |mut row, rule| {
                row.push_bind(id)
                    .push_bind(rule.title.clone())
                    .push_bind(rule.description.clone());
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        if !voxsphere.flairs.is_empty() {
            let mut query_builder =
                QueryBuilder::<Postgres>::new("INSERT INTO flairs (voxsphere_id, title, color_hex) ");
            query_builder.push_values(&voxsphere.flairs, |mut row, flair| {
                row.push_bind(id)
                    .push_bind(flair.title.clone())
                    .push_bind(flair.color_hex.clone());
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn create_user(&self, user: &NewUser) -> IngestResult<i64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (
                username, email, cake_day, cake_day_human, account_age,
                avatar_img, banner_img, public_description, over18,
                keycolor_hex, primarycolor_hex, iconcolor_hex, suspended
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (username) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.cake_day)
        .bind(&user.cake_day_human)
        .bind(&user.account_age)
        .bind(&user.avatar_img)
        .bind(&user.banner_img)
        .bind(&user.public_description)
        .bind(user.over18)
        .bind(&user.keycolor_hex)
        .bind(&user.primarycolor_hex)
        .bind(&user.iconcolor_hex)
        .bind(user.suspended)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match inserted {
            Some(id) => id,
            None => {
                let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = $1")
                    .bind(&user.username)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(existing);
            }
        };

        sqlx::query(
            "INSERT INTO user_trophies (user_id, trophy_id) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(user.trophy_ids.as_slice())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO voxsphere_members (user_id, voxsphere_id) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(user.member_of.as_slice())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO voxsphere_moderators (user_id, voxsphere_id) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(user.moderator_of.as_slice())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn find_flair(
        &self,
        voxsphere_id: i64,
        title: &str,
        color_hex: Option<&str>,
    ) -> IngestResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM flairs
            WHERE voxsphere_id = $1
              AND title = $2
              AND ($3::TEXT IS NULL OR color_hex = $3)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(voxsphere_id)
        .bind(title)
        .bind(color_hex)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn create_post(&self, post: &NewPost) -> IngestResult<i64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO posts (
                external_id, author_id, voxsphere_id, topic_id, title, text, text_html,
                media_type, ups, over18, spoiler, link_type, num_comments,
                created_at_unix, created_at_human
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&post.external_id)
        .bind(post.author_id)
        .bind(post.voxsphere_id)
        .bind(post.topic_id)
        .bind(&post.title)
        .bind(&post.text)
        .bind(&post.text_html)
        .bind(post.media_type.as_str())
        .bind(post.ups)
        .bind(post.over18)
        .bind(post.spoiler)
        .bind(post.link_type)
        .bind(post.num_comments)
        .bind(post.created_at_unix)
        .bind(&post.created_at_human)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(post_id) = inserted else {
            tx.rollback().await?;
            let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM posts WHERE external_id = $1")
                .bind(&post.external_id)
                .fetch_one(&self.pool)
                .await?;
            return Ok(existing);
        };

        sqlx::query(
            "INSERT INTO post_awards (post_id, award_id) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(post_id)
        .bind(post.award_ids.as_slice())
        .execute(&mut *tx)
        .await?;

        if let Some(content) = &post.media_content {
            sqlx::query(
                r#"
                INSERT INTO media_contents (
                    post_id, type, original_link, image_link, gif_link, video_link, gallery, sub_items
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(post_id)
            .bind(content.media_type.as_str())
            .bind(&content.original_link)
            .bind(&content.image_link)
            .bind(&content.gif_link)
            .bind(&content.video_link)
            .bind(Json(&content.gallery))
            .bind(Json(&content.sub_items))
            .execute(&mut *tx)
            .await?;
        }

        for chunk in post.variants.chunks(INSERT_CHUNK) {
            let mut query_builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO media_variants (post_id, url, height, width, order_index) ",
            );
            query_builder.push_values(chunk, |mut row, variant| {
                row.push_bind(post_id)
                    .push_bind(variant.url.clone())
                    .push_bind(variant.height)
                    .push_bind(variant.width)
                    .push_bind(variant.order_index);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(post_id)
    }

    async fn set_post_flair(&self, post_id: i64, flair_id: i64) -> IngestResult<()> {
        sqlx::query("UPDATE posts SET flair_id = $1 WHERE id = $2")
            .bind(flair_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_comment(&self, comment: &NewComment) -> IngestResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO comments (post_id, author_id, parent_id, comment, comment_html, ups, created_at_unix)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(comment.post_id)
        .bind(comment.author_id)
        .bind(comment.parent_id)
        .bind(&comment.comment)
        .bind(&comment.comment_html)
        .bind(comment.ups)
        .bind(comment.created_at_unix)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn attach_replies(&self, parent_id: i64, child_ids: &[i64]) -> IngestResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE comments SET parent_id = $1 WHERE id = ANY($2) AND id <> $1")
            .bind(parent_id)
            .bind(child_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE comments SET reply_count = $1 WHERE id = $2")
            .bind(child_ids.len() as i32)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn attach_comments(&self, post_id: i64, comment_ids: &[i64]) -> IngestResult<()> {
        sqlx::query("UPDATE comments SET post_id = $1 WHERE id = ANY($2)")
            .bind(post_id)
            .bind(comment_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_member_count(&self, name: &str, total: i64, human: &str) -> IngestResult<bool> {
        let result = sqlx::query(
            "UPDATE voxspheres SET total_members = $1, total_members_human = $2 WHERE name = $3",
        )
        .bind(total)
        .bind(human)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn checkpoint(&self, kind: EntityKind) -> IngestResult<Option<String>> {
        let key = sqlx::query_scalar::<_, String>(
            "SELECT last_key FROM ingest_checkpoints WHERE entity_kind = $1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    async fn save_checkpoint(&self, kind: EntityKind, key: &str) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_checkpoints (entity_kind, last_key)
            VALUES ($1, $2)
            ON CONFLICT (entity_kind) DO UPDATE SET
                last_key = EXCLUDED.last_key,
                updated_at = NOW()
            "#,
        )
        .bind(kind.as_str())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn media_contents(&self) -> IngestResult<Vec<MediaContent>> {
        let contents = sqlx::query_as::<_, MediaContent>(
            r#"
            SELECT id, post_id, type, original_link, image_link, gif_link, video_link, gallery, sub_items
            FROM media_contents
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(contents)
    }

    async fn update_media_content(&self, content: &MediaContent) -> IngestResult<()> {
        sqlx::query(
            r#"
            UPDATE media_contents SET
                original_link = $1,
                image_link = $2,
                gif_link = $3,
                video_link = $4,
                gallery = $5,
                sub_items = $6
            WHERE id = $7
            "#,
        )
        .bind(&content.original_link)
        .bind(&content.image_link)
        .bind(&content.gif_link)
        .bind(&content.video_link)
        .bind(&content.gallery)
        .bind(&content.sub_items)
        .bind(content.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn media_variants(&self) -> IngestResult<Vec<StoredVariant>> {
        let variants = sqlx::query_as::<_, StoredVariant>("SELECT id, url FROM media_variants ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(variants)
    }

    async fn update_variant_url(&self, id: i64, url: &str) -> IngestResult<()> {
        sqlx::query("UPDATE media_variants SET url = $1 WHERE id = $2")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn entity_images(&self, column: ImageColumn) -> IngestResult<Vec<(i64, String)>> {
        let (table, column) = column.location();
        let sql = format!("SELECT id, {column} FROM {table} WHERE {column} IS NOT NULL AND {column} <> '' ORDER BY id");
        let rows = sqlx::query_as::<_, (i64, String)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn update_entity_image(&self, column: ImageColumn, id: i64, url: &str) -> IngestResult<()> {
        let (table, column) = column.location();
        let sql = format!("UPDATE {table} SET {column} = $1 WHERE id = $2");
        sqlx::query(&sql).bind(url).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_post(&self, post_id: i64) -> IngestResult<()> {
        // Comments, media content, variants and award links cascade.
        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
