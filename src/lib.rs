//! Mirror-and-sync engine for an external penetration-testing tool's
//! findings: heterogeneous source backends, schema-normalizing readers,
//! batched transactional loads into a local SQLite mirror, and
//! bi-directional status write-back.

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod services;
pub mod sources;
