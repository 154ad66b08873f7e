//! Database models and DTOs for the mirror store.

pub mod finding;
pub mod pagination;
pub mod sync_run;
