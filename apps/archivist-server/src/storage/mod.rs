//! B2 storage client
//!
//! Uploads files to a Backblaze B2 bucket using the native API's two-phase
//! session protocol (authorize account -> get upload url -> upload file).

mod api;
mod error;
mod session;
mod types;
mod uploader;

#[cfg(test)]
pub(crate) mod mock;

pub use api::{encode_file_name, B2Api, HttpB2Api, HttpB2ApiConfig, DEFAULT_AUTH_URL};
pub use error::{B2Error, TransportError};
pub use session::{SessionCache, SessionPolicy};
pub use types::*;
pub use uploader::{AttemptOutcome, RetryPolicy, UploadAttempt, Uploader};
