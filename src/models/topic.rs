// src/models/topic.rs

use serde::Serialize;
use sqlx::FromRow;

/// Represents the 'topics' table in the database.
#[derive(Debug, Serialize, FromRow)]
pub struct Topic {
    pub id: i64,
    pub title: String,
}
