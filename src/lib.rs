pub mod domain;
pub mod error;
pub mod index;
pub mod models;
pub mod processing;
pub mod repository;

/// Offline fixtures shared by unit and integration tests.
#[doc(hidden)]
pub mod testing;

/// Default cosine-similarity threshold above which two records are duplicates.
pub const SIMILARITY_THRESHOLD: f32 = 0.8;
