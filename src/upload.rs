use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::backend::Conditions;
use crate::error::{Error, Result};
use crate::models::ObjectAttrs;

/// In-flight resumable upload session. Lives between session creation and
/// the final commit (or DELETE).
pub struct ResumableUpload {
    pub attrs: ObjectAttrs,
    pub conditions: Conditions,
    pub data: Vec<u8>,
    pub total: Option<u64>,
}

/// Outcome of feeding a chunk into a session.
pub enum AppendOutcome {
    /// All bytes received: the session was removed and must be
    /// materialized into the backend by the caller.
    Complete(ResumableUpload),
    /// More bytes expected; respond `308` with `Range: bytes=0-<n-1>`.
    Incomplete { received: u64 },
}

/// Table of resumable sessions keyed by upload id.
pub struct UploadManager {
    sessions: Mutex<HashMap<String, ResumableUpload>>,
}

impl UploadManager {
    pub fn new() -> Self {
        UploadManager {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, attrs: ObjectAttrs, conditions: Conditions) -> String {
        let upload_id = Uuid::new_v4().simple().to_string();
        debug!(
            "resumable session {} for {}/{}",
            upload_id, attrs.bucket_name, attrs.name
        );
        self.sessions.lock().unwrap().insert(
            upload_id.clone(),
            ResumableUpload {
                attrs,
                conditions,
                data: Vec::new(),
                total: None,
            },
        );
        upload_id
    }

    /// Applies one `Content-Range`-governed chunk. `range.start` must equal
    /// the accumulated length; a mismatch is a 400 and leaves the session
    /// intact for retries.
    pub fn append(
        &self,
        upload_id: &str,
        range: ContentRange,
        body: &[u8],
    ) -> Result<AppendOutcome> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(upload_id).ok_or(Error::NoSuchUpload)?;

        if let Some(total) = range.total {
            session.total = Some(total);
        }

        if let Some(start) = range.start {
            let received = session.data.len() as u64;
            if start != received {
                return Err(Error::invalid(format!(
                    "expected offset {}, got {}",
                    received, start
                )));
            }
            session.data.extend_from_slice(body);
        }

        let received = session.data.len() as u64;
        let done = match (session.total, range.end) {
            (Some(total), Some(end)) => end + 1 == total,
            (Some(total), None) => received == total,
            _ => false,
        };

        if done {
            let session = sessions.remove(upload_id).unwrap();
            debug!("resumable session {} committed ({} bytes)", upload_id, received);
            Ok(AppendOutcome::Complete(session))
        } else {
            Ok(AppendOutcome::Incomplete { received })
        }
    }

    /// Single-shot body with no `Content-Range`: everything at once.
    pub fn take(&self, upload_id: &str) -> Result<ResumableUpload> {
        self.sessions
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or(Error::NoSuchUpload)
    }

    pub fn abort(&self, upload_id: &str) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .remove(upload_id)
            .map(|_| ())
            .ok_or(Error::NoSuchUpload)
    }
}

impl Default for UploadManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed `Content-Range` request header: `bytes <start>-<end>/<total|*>`
/// or the status form `bytes */<total|*>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub total: Option<u64>,
}

pub fn parse_content_range(value: &str) -> Result<ContentRange> {
    let rest = value
        .trim()
        .strip_prefix("bytes ")
        .ok_or_else(|| Error::invalid(format!("invalid Content-Range: {}", value)))?;
    let (range_part, total_part) = rest
        .split_once('/')
        .ok_or_else(|| Error::invalid(format!("invalid Content-Range: {}", value)))?;

    let total = match total_part.trim() {
        "*" => None,
        t => Some(
            t.parse::<u64>()
                .map_err(|_| Error::invalid(format!("invalid Content-Range total: {}", t)))?,
        ),
    };

    if range_part.trim() == "*" {
        return Ok(ContentRange {
            start: None,
            end: None,
            total,
        });
    }

    let (start_s, end_s) = range_part
        .split_once('-')
        .ok_or_else(|| Error::invalid(format!("invalid Content-Range: {}", value)))?;
    let start = start_s
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::invalid(format!("invalid Content-Range start: {}", start_s)))?;
    let end = end_s
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::invalid(format!("invalid Content-Range end: {}", end_s)))?;

    Ok(ContentRange {
        start: Some(start),
        end: Some(end),
        total,
    })
}
