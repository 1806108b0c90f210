//! LAN file-transfer and device-pairing server.
//!
//! Wires the upload store and the coordination hub behind one HTTP
//! listener: resumable uploads under `/tus/files`, downloads under
//! `/files`, the persistent connection at `/ws`, and a small JSON API
//! under `/api`.

pub mod api;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod download;
pub mod error;
pub mod tus;
pub mod ws;

pub use api::{AppState, build_router};
pub use config::ServerConfig;
pub use error::ServerError;
