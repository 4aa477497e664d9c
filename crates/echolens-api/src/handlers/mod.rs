//! HTTP handlers for echolens-api.

pub mod episodes;
pub mod jobs;
pub mod notifications;
