//! Directory listing middleware for axum.
//!
//! [`FileIndex`] serves a directory tree as browsable HTML pages, raw files,
//! streamed zip archives of folders and optional JSON. Request paths may use
//! clean aliases ("My Photos" is reachable as `/my-photos`).

use std::{path::PathBuf, sync::Arc};

use axum::{http::StatusCode, middleware, Router};

pub mod alias;
pub mod archive;
pub mod config;
pub mod error;
pub mod format;
pub mod handler;
pub mod kinds;
pub mod render;
pub mod scanner;

pub use alias::{alias_name, AliasResolver};
pub use config::{FileSelectAction, IndexOptions, SortKey, SortOrder};
pub use error::{ArchiveError, IndexError};
pub use handler::serve_index;
pub use kinds::{FileKind, TypeTable};
pub use render::{FileView, ListingPage, MaudRenderer, Renderer};
pub use scanner::FileEntry;

/// A configured file index. Cheap to clone.
#[derive(Clone, Debug)]
pub struct FileIndex {
    options: Arc<IndexOptions>,
}

impl FileIndex {
    /// Validates the options. The root directory must exist and is
    /// canonicalized so later containment checks compare like with like.
    pub fn new(mut options: IndexOptions) -> Result<Self, IndexError> {
        let root = std::fs::canonicalize(&options.root_dir).map_err(|source| {
            IndexError::RootDir {
                path: options.root_dir.clone(),
                source,
            }
        })?;
        if !root.is_dir() {
            return Err(IndexError::RootNotDirectory(root));
        }
        options.root_dir = root;
        options.zip_compression_level = options.zip_compression_level.min(9);
        Ok(Self {
            options: Arc::new(options),
        })
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn root(&self) -> &PathBuf {
        &self.options.root_dir
    }

    /// A router answering every request from the index. Nest it to mount the
    /// index under a prefix.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(|| async { error::error_response(StatusCode::NOT_FOUND, "Path not found.") })
            .layer(middleware::from_fn_with_state(self.clone(), serve_index))
    }
}
