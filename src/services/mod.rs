// src/services/mod.rs
pub mod clock;
pub mod daily_cache;
pub mod db;
pub mod engine;
pub mod http;
pub mod indicators;
pub mod instruments;
pub mod predictions;
pub mod predictor;
pub mod quote;
pub mod scheduler;
pub mod ttl_cache;
