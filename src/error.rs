//! Error types for the history store, the weather source and tool handlers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid location name: {0:?}")]
    InvalidLocation(String),

    #[error("History I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt history file {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No weather history recorded for {location}")]
    NotFound { location: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Invalid weather API URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Failed to fetch weather data: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to fetch weather data: {status} - {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to decode weather data: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Failure of a single tool invocation. Rendered to the caller as an error result.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Weather(#[from] WeatherError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
