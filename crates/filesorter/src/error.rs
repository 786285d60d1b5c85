use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilesorterError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Categorization error: {0}")]
    Categorize(#[from] crate::service::CategorizeError),
}

pub type Result<T> = std::result::Result<T, FilesorterError>;
