//! Small helpers shared by the storage, sync and release layers.
//!
//! - **Atomic writes**: write-to-temp-then-rename so a crash never leaves a
//!   half-written database or state file behind
//! - **HTTP**: the shared `reqwest` client with the crate user agent
//! - **URL validation**: mirror and API endpoints must be http(s)
//! - **Text**: terminal-width aware fitting for CLI output

mod fs;
mod http;
mod text;
mod url_validator;

pub use fs::atomic_write;
pub use http::{authorize_github, create_http_client, APP_USER_AGENT};
pub use text::{fit_width, sanitize_line};
pub use url_validator::{validate_source_url, UrlValidationError};
