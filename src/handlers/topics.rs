// src/handlers/topics.rs

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{post::PageParams, topic::Topic},
};

pub async fn list_topics(
    State(pool): State<PgPool>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let topics = sqlx::query_as::<_, Topic>("SELECT id, title FROM topics ORDER BY id LIMIT $1 OFFSET $2")
        .bind(params.limit)
        .bind(params.skip)
        .fetch_all(&pool)
        .await?;

    Ok(Json(topics))
}
