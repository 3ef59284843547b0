//! Optional database persistence for trained models.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::{CodebookStore, ColumnType, CODEBOOK_TABLE_SUFFIX};
