// src/media/mod.rs

pub mod fetcher;
pub mod relocate;
pub mod selector;
