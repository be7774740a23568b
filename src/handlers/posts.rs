// src/handlers/posts.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    media::selector::select_for_post,
    models::{
        media::{MediaVariant, PostMedia, ViewportParams},
        post::{PageParams, PostSummary},
    },
};

/// Lists posts with their author, community, flair, awards and media.
pub async fn list_posts(
    State(pool): State<PgPool>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let posts = sqlx::query_as::<_, PostSummary>(
        r#"
        SELECT
            p.id, p.title, p.text, p.text_html, p.media_type, p.ups,
            p.over18, p.spoiler, p.link_type, p.num_comments,
            p.created_at_unix, p.created_at_human,
            u.username AS author_username,
            u.avatar_img AS author_avatar,
            v.name AS voxsphere_name,
            v.logo_url AS voxsphere_logo,
            f.title AS flair_title,
            f.color_hex AS flair_color_hex,
            COALESCE(
                (SELECT json_agg(json_build_object('title', a.title, 'image_link', a.image_link) ORDER BY a.id)
                 FROM post_awards pa
                 JOIN awards a ON a.id = pa.award_id
                 WHERE pa.post_id = p.id),
                '[]'::json
            ) AS awards,
            (SELECT row_to_json(mc)
             FROM (
                SELECT type, original_link, image_link, gif_link, video_link, gallery, sub_items
                FROM media_contents
                WHERE post_id = p.id
             ) mc) AS media_content
        FROM posts p
        LEFT JOIN users u ON u.id = p.author_id
        LEFT JOIN voxspheres v ON v.id = p.voxsphere_id
        LEFT JOIN flairs f ON f.id = p.flair_id
        ORDER BY p.id
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(params.limit)
    .bind(params.skip)
    .fetch_all(&pool)
    .await?;

    Ok(Json(posts))
}

/// Returns the renditions of a post's media that best fit the viewport height.
/// Galleries get one rendition per picture.
pub async fn post_media(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Query(params): Query<ViewportParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let media_type: String = sqlx::query_scalar("SELECT media_type FROM posts WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Post not found".to_string()))?;

    let variants = sqlx::query_as::<_, MediaVariant>(
        r#"
        SELECT url, height, width, order_index
        FROM media_variants
        WHERE post_id = $1
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let variants = select_for_post(&media_type, variants, params.viewport_height);

    Ok(Json(PostMedia {
        post_id: id,
        media_type,
        viewport_height: params.viewport_height,
        variants,
    }))
}
