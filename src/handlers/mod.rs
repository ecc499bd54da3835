pub mod bucket;
pub mod notification;
pub mod object;
pub mod upload;

use serde::Deserialize;

use crate::backend::Conditions;
use crate::error::{Error, Result};

/// Query parameters shared across JSON object operations.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectQuery {
    pub alt: Option<String>,
    pub generation: Option<String>,
    pub projection: Option<String>,
    pub name: Option<String>,
    pub upload_type: Option<String>,
    pub upload_id: Option<String>,
    pub content_encoding: Option<String>,
    pub source_generation: Option<i64>,
    pub if_generation_match: Option<i64>,
    pub if_generation_not_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub if_metageneration_not_match: Option<i64>,
}

impl ObjectQuery {
    pub fn conditions(&self) -> Conditions {
        Conditions {
            if_generation_match: self.if_generation_match,
            if_generation_not_match: self.if_generation_not_match,
            if_metageneration_match: self.if_metageneration_match,
            if_metageneration_not_match: self.if_metageneration_not_match,
        }
    }

    /// `full` includes ACLs, `noAcl` (the default) omits them.
    pub fn full_projection(&self) -> Result<bool> {
        match self.projection.as_deref() {
            None | Some("") | Some("noAcl") => Ok(false),
            Some("full") => Ok(true),
            Some(other) => Err(Error::invalid(format!("invalid projection: {}", other))),
        }
    }
}
