use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::notify::EventMask;

pub const DEFAULT_PUBLIC_HOST: &str = "storage.googleapis.com";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub events: EventConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    /// Hostname the emulator advertises for virtual-host-style requests.
    pub public_host: String,
    /// Base URL written into resumable-upload Location headers; updatable
    /// at runtime through the internal config endpoint.
    pub external_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// `memory` or `filesystem`.
    pub backend: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    pub object_prefix: String,
    /// Comma-separated event kinds; empty enables all.
    pub event_types: String,
    /// Publish synchronously inside the handler instead of fire-and-forget.
    pub publish_sync: bool,
}

impl EventConfig {
    pub fn mask(&self) -> EventMask {
        EventMask::parse(&self.event_types)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "4443".to_string())
            .parse()?;
        let scheme = env::var("SCHEME").unwrap_or_else(|_| "http".to_string());
        let external_url = env::var("EXTERNAL_URL")
            .unwrap_or_else(|_| format!("{}://{}:{}", scheme, host, port));

        Ok(Config {
            server: ServerConfig {
                host,
                port,
                scheme,
                public_host: env::var("PUBLIC_HOST")
                    .unwrap_or_else(|_| DEFAULT_PUBLIC_HOST.to_string()),
                external_url,
            },
            storage: StorageConfig {
                backend: env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string()),
                root: PathBuf::from(
                    env::var("STORAGE_ROOT").unwrap_or_else(|_| "/data".to_string()),
                ),
            },
            events: EventConfig {
                object_prefix: env::var("EVENT_OBJECT_PREFIX").unwrap_or_default(),
                event_types: env::var("EVENT_TYPES").unwrap_or_default(),
                publish_sync: env::var("EVENT_PUBLISH_SYNC")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()?,
            },
        })
    }
}
