//! Error types for pagetile_core.

use thiserror::Error;

use crate::tile::PixelFormat;

/// Error reported by the native decoding engine.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for document, page and tile operations.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("No document loaded")]
    NotLoaded,

    #[error("A document is already loaded; close it first")]
    AlreadyLoaded,

    #[error("Cannot open page {page}: {source}")]
    PageOpen {
        page: usize,
        #[source]
        source: EngineError,
    },

    #[error("Cannot allocate {width}x{height} {format:?} buffer")]
    BufferAllocation {
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("Failed to open document: {0}")]
    DocumentOpen(#[source] EngineError),

    #[error("Failed to render page {page}: {source}")]
    Render {
        page: usize,
        #[source]
        source: EngineError,
    },

    #[error("Invalid page size {width}x{height}")]
    InvalidPageSize { width: f32, height: f32 },

    #[error("Render worker is not running")]
    WorkerStopped,

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Page the error is attached to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            RenderError::PageOpen { page, .. } | RenderError::Render { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// Result type alias for render operations.
pub type RenderResult<T> = Result<T, RenderError>;
