use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("{path:?} not found. Run the agency setup first so the data directory exists.")]
    MissingDataFile { path: PathBuf },

    #[error("No INVITED owner user found. Run the agency setup first, or the owner has already accepted their invite.")]
    NoPendingOwner,

    #[error("Failed to parse {path:?}. The file is not a JSON object of records keyed by id.")]
    MalformedDataFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to access {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize the collection to JSON")]
    Serialize(#[source] serde_json::Error),

    #[error("'{0}' can't be used as the frontend base URL, it needs a scheme and host like http://localhost:5173")]
    InvalidBaseUrl(String),

    #[error("An invite created at {now_ms} with that lifetime would expire past the end of time")]
    ExpiryOutOfRange { now_ms: i64 },

    #[error("The operating system's random number generator is unavailable")]
    RandomSource(#[source] rand::Error),
}
