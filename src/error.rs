use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy. Handlers map each kind to a single HTTP response,
/// rendered as a JSON envelope on the JSON API and as an XML `Error`
/// document on the XML data plane.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bucket not found")]
    NoSuchBucket,

    #[error("Object not found")]
    NoSuchKey,

    #[error("Upload not found")]
    NoSuchUpload,

    #[error("Notification not found")]
    NoSuchNotification,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Bucket already exists")]
    BucketAlreadyExists,

    #[error("{0}")]
    LimitExceeded(String),

    #[error("invalid range: {0}")]
    RangeNotSatisfiable(String),

    #[error("Bucket not empty")]
    BucketNotEmpty,

    #[error("retention mode is locked")]
    Locked,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoSuchBucket
            | Error::NoSuchKey
            | Error::NoSuchUpload
            | Error::NoSuchNotification => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) | Error::LimitExceeded(_) | Error::Locked => {
                StatusCode::BAD_REQUEST
            }
            Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Error::BucketAlreadyExists | Error::BucketNotEmpty => StatusCode::CONFLICT,
            Error::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::Internal(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// XML error code, per the data-plane error document.
    pub fn xml_code(&self) -> &str {
        match self {
            Error::NoSuchBucket => "NoSuchBucket",
            Error::NoSuchKey => "NoSuchKey",
            Error::NoSuchUpload | Error::NoSuchNotification => "NoSuchUpload",
            Error::InvalidArgument(_) | Error::Locked => "InvalidArgument",
            Error::PreconditionFailed(_) => "PreconditionFailed",
            Error::BucketAlreadyExists => "BucketAlreadyExists",
            Error::LimitExceeded(_) => "InvalidRequest",
            Error::RangeNotSatisfiable(_) => "InvalidRange",
            Error::BucketNotEmpty => "BucketNotEmpty",
            Error::Internal(_) | Error::Io(_) => "InternalError",
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message><Details>{}</Details></Error>",
            self.xml_code(),
            xml_escape(&self.to_string()),
            xml_escape(&self.to_string()),
        )
    }

    pub fn to_xml_response(&self) -> Response {
        Response::builder()
            .status(self.status_code())
            .header("Content-Type", "application/xml")
            .body(Body::from(self.to_xml()))
            .unwrap()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let status = self.status_code();
        serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "errors": [{
                    "message": self.to_string(),
                    "domain": "global",
                    "reason": reason_for(status),
                }],
            }
        })
    }
}

fn reason_for(status: StatusCode) -> &'static str {
    match status {
        StatusCode::NOT_FOUND => "notFound",
        StatusCode::BAD_REQUEST => "invalid",
        StatusCode::PRECONDITION_FAILED => "conditionNotMet",
        StatusCode::CONFLICT => "conflict",
        StatusCode::RANGE_NOT_SATISFIABLE => "requestedRangeNotSatisfiable",
        _ => "internalError",
    }
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// JSON API surface: errors render as the storage error envelope.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_json().to_string();

        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }
}
