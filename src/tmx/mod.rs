//! Translation-memory cleaning: structural validation, source deduplication and a
//! source/target embedding similarity filter.

mod cleaner;
mod document;
mod extract;
mod filter;
mod report;

pub use cleaner::{CleanOptions, CleanOutput, TmxCleaner, DEFAULT_SNIPPET_CHARS};
pub use document::{TextVariant, TmxDocument, TranslationUnit, VariantSelection};
pub use extract::{extract, AlignedUnit, Extraction};
pub use filter::{filter, FilterOutcome, SimilarityThreshold};
pub use report::{CleanReport, Omission, RemovalReason, RemovalRecord};
