pub mod backend;
pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod models;
pub mod multipart;
pub mod notify;
pub mod range;
pub mod server;
pub mod upload;
pub mod xml;

pub use backend::{FilesystemBackend, InMemoryBackend, StorageBackend};
pub use error::{Error, Result};
pub use notify::Publisher;
pub use server::{app_with_publisher, build_app, AppState};
