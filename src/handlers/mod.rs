// src/handlers/mod.rs
pub mod cache;
pub mod error;
pub mod indices;
pub mod predictions;
pub mod sources;
