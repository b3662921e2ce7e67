use std::{io, path::PathBuf};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use maud::html;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to resolve root directory '{path}': {source}")]
    RootDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("root path '{0}' is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("path not found")]
    NotFound,

    #[error("{0} is disabled on this server")]
    Disabled(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures while streaming a zip archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("zip writer failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive cancelled by client disconnect")]
    Cancelled,
}

impl IntoResponse for IndexError {
    fn into_response(self) -> Response {
        match self {
            IndexError::Disabled(_) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            IndexError::NotFound => error_response(StatusCode::NOT_FOUND, "Path not found."),
            other => {
                tracing::error!("Request failed: {}", other);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error reading directory contents.",
                )
            }
        }
    }
}

/// Helper to generate consistent Maud-based error responses.
pub fn error_response(status_code: StatusCode, message: &str) -> Response {
    let markup = html! {
        div style="padding: 10px; border: 1px solid red; color: red; margin: 10px;" {
            h2 { "Error" }
            p { (message) }
        }
    };
    (status_code, markup).into_response()
}
