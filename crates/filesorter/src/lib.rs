//! AI-assisted file categorization core.
//!
//! The pipeline asks a language model for a `(main category, subcategory)`
//! pair per file or directory, folds the answer into a canonical taxonomy,
//! and persists every decision in a SQLite cache so repeated runs are
//! cheap and consistent. Local inference runs through llama-cpp-2; remote
//! clients are supplied by the host application through the
//! [`llm::LlmClient`] trait.

pub mod config;
pub mod db;
pub mod error;
pub mod labels;
pub mod llm;
pub mod service;
pub mod types;

pub use config::{CategoryLanguage, CustomApiEndpoint, LlmChoice, Settings};
pub use db::{Database, DatabaseError, ResolvedCategory, TaxonomyResolver};
pub use error::{FilesorterError, Result};
pub use llm::{
    BackendProbes, GpuBackend, GpuLayers, LlmClient, LlmError, LocalLlmClient, LocalLlmOptions,
    MemoryInfo,
};
pub use service::{
    CategorizationHooks, CategorizationService, CategorizeError, ProgressCallback, PromptOverride,
    QueueCallback, RecategorizationCallback,
};
pub use types::{CategorizedFile, FileEntry, FileType};
