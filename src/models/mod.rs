// src/models/mod.rs

pub mod media;
pub mod post;
pub mod topic;
pub mod voxsphere;
