use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::error::Error;
use crate::models::ObjectAttrs;
use crate::range::{parse_range, RangeOutcome};

/// HTTP date for `Last-Modified` (RFC 2822 with GMT).
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Serves an object download for every surface that reads content: JSON
/// `alt=media`, path-style, virtual-host and CNAME-style XML requests.
/// Handles generation resolution, the unconditional response headers,
/// gzip transcoding and tolerant range semantics. `head` suppresses the
/// body while keeping status and headers.
pub async fn serve_object(
    backend: &dyn StorageBackend,
    bucket: &str,
    object: &str,
    generation_param: Option<&str>,
    req_headers: &HeaderMap,
    head: bool,
) -> Response {
    let generation = match generation_param {
        Some(raw) => match raw.parse::<i64>() {
            Ok(g) => Some(g),
            Err(_) => {
                return Error::invalid(format!("invalid generation: {}", raw)).to_xml_response()
            }
        },
        None => None,
    };

    let obj = match generation {
        Some(g) => backend.get_object_with_generation(bucket, object, g).await,
        None => backend.get_object(bucket, object).await,
    };
    let obj = match obj {
        Ok(o) => o,
        Err(e) => return e.to_xml_response(),
    };
    let attrs = obj.attrs;
    let mut content = obj.content;
    let size = attrs.size.max(0) as u64;

    // Transparent transcoding: a gzip-stored object served to a client
    // that does not accept gzip is decompressed in full, and Range is
    // ignored for the request.
    let wants_gzip = req_headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);

    if attrs.content_encoding == "gzip" && !wants_gzip {
        let raw = match content.into_bytes() {
            Ok(b) => b,
            Err(e) => return e.to_xml_response(),
        };
        let mut decoded = Vec::new();
        match GzDecoder::new(&raw[..]).read_to_end(&mut decoded) {
            Ok(_) => {
                debug!(
                    "transcoded {}/{}: {} -> {} bytes",
                    bucket,
                    object,
                    raw.len(),
                    decoded.len()
                );
                let mut builder = response_headers(&attrs);
                builder = builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, decoded.len());
                let body = if head { Body::empty() } else { Body::from(decoded) };
                return builder.body(body).unwrap();
            }
            Err(e) => {
                // Fall back to the stored bytes untouched.
                warn!("transcoding {}/{} failed: {}", bucket, object, e);
                let mut builder = response_headers(&attrs);
                builder = builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, raw.len())
                    .header(header::CONTENT_ENCODING, "gzip");
                let body = if head { Body::empty() } else { Body::from(raw) };
                return builder.body(body).unwrap();
            }
        }
    }

    let range_header = req_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let outcome = match &range_header {
        Some(value) => parse_range(value, size),
        None => RangeOutcome::Whole,
    };

    match outcome {
        RangeOutcome::Unsatisfiable => {
            Error::RangeNotSatisfiable(range_header.unwrap_or_default()).to_xml_response()
        }
        RangeOutcome::Whole => {
            let data = match content.into_bytes() {
                Ok(b) => b,
                Err(e) => return e.to_xml_response(),
            };
            let mut builder = response_headers(&attrs);
            builder = builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, data.len());
            if !attrs.content_encoding.is_empty() {
                builder = builder.header(header::CONTENT_ENCODING, attrs.content_encoding.clone());
            }
            let body = if head { Body::empty() } else { Body::from(data) };
            builder.body(body).unwrap()
        }
        RangeOutcome::Partial { start, end } => {
            let data = match content.read_range(start, end - start + 1) {
                Ok(b) => b,
                Err(e) => return e.to_xml_response(),
            };
            let mut builder = response_headers(&attrs);
            builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, size),
                )
                .header(header::CONTENT_LENGTH, data.len());
            if !attrs.content_encoding.is_empty() {
                builder = builder.header(header::CONTENT_ENCODING, attrs.content_encoding.clone());
            }
            let body = if head { Body::empty() } else { Body::from(data) };
            builder.body(body).unwrap()
        }
    }
}

/// The headers every download response carries, regardless of status.
fn response_headers(attrs: &ObjectAttrs) -> axum::http::response::Builder {
    let content_type = if attrs.content_type.is_empty() {
        "application/octet-stream"
    } else {
        attrs.content_type.as_str()
    };
    let stored_encoding = if attrs.content_encoding.is_empty() {
        "identity"
    } else {
        attrs.content_encoding.as_str()
    };

    let mut builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, content_type)
        .header(header::LAST_MODIFIED, format_http_date(&attrs.updated))
        .header(header::ETAG, format!("\"{}\"", attrs.etag))
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header("X-Goog-Generation", attrs.generation.to_string())
        .header(
            "X-Goog-Hash",
            format!("crc32c={},md5={}", attrs.crc32c, attrs.md5_hash),
        )
        .header("X-Goog-Stored-Content-Encoding", stored_encoding);

    if !attrs.cache_control.is_empty() {
        builder = builder.header(header::CACHE_CONTROL, attrs.cache_control.clone());
    }
    if !attrs.content_disposition.is_empty() {
        builder = builder.header(header::CONTENT_DISPOSITION, attrs.content_disposition.clone());
    }
    if !attrs.content_language.is_empty() {
        builder = builder.header(header::CONTENT_LANGUAGE, attrs.content_language.clone());
    }

    for (key, value) in &attrs.metadata {
        let name = format!("x-goog-meta-{}", key);
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_date_format() {
        let t = DateTime::parse_from_rfc3339("2024-03-01T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_http_date(&t), "Fri, 01 Mar 2024 12:30:45 GMT");
    }
}
