//! Core sync-engine services.

pub mod diagnostics;
pub mod summary;
pub mod sync;
pub mod writeback;
