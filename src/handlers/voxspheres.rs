// src/handlers/voxspheres.rs

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::voxsphere::{TopParams, TopVoxsphere},
};

/// Communities ordered by member count, largest first.
pub async fn top_voxspheres(
    State(pool): State<PgPool>,
    Query(params): Query<TopParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let voxspheres = sqlx::query_as::<_, TopVoxsphere>(
        r#"
        SELECT name, logo_url, total_members, total_members_human
        FROM voxspheres
        ORDER BY total_members DESC, id
        LIMIT $1
        "#,
    )
    .bind(params.limit)
    .fetch_all(&pool)
    .await?;

    Ok(Json(voxspheres))
}
