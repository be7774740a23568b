// src/handlers/mod.rs

pub mod posts;
pub mod topics;
pub mod voxspheres;
