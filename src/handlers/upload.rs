use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use super::object::apply_metadata_json;
use super::ObjectQuery;
use crate::error::{Error, Result};
use crate::models::{ObjectAttrs, StreamingObject};
use crate::notify::publish_create_events;
use crate::server::AppState;
use crate::upload::{parse_content_range, AppendOutcome, ResumableUpload};

/// Entry point for `/upload/storage/v1/b/{bucket}/o`. Dispatches on
/// `uploadType`: `media` (body is the content), `multipart` (MIME body
/// with a metadata part and a content part) or `resumable` (session
/// creation).
pub async fn insert_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    match q.upload_type.as_deref() {
        Some("media") => simple_upload(&state, &bucket, &q, &headers, body).await,
        Some("multipart") => multipart_upload(&state, &bucket, &q, &headers, body).await,
        Some("resumable") => start_resumable(&state, &bucket, &q, body).await,
        Some(other) => Err(Error::invalid(format!("invalid uploadType: {}", other))),
        None => {
            // Clients occasionally omit uploadType; a MIME content type
            // disambiguates.
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if content_type.starts_with("multipart/") {
                multipart_upload(&state, &bucket, &q, &headers, body).await
            } else {
                simple_upload(&state, &bucket, &q, &headers, body).await
            }
        }
    }
}

async fn simple_upload(
    state: &AppState,
    bucket: &str,
    q: &ObjectQuery,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let name = q
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::invalid("name is required for simple uploads"))?;

    let mut attrs = ObjectAttrs::new(bucket, name);
    if let Some(ct) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        attrs.content_type = ct.to_string();
    }
    if let Some(encoding) = &q.content_encoding {
        attrs.content_encoding = encoding.clone();
    }

    let outcome = state
        .backend
        .create_object(StreamingObject::buffered(attrs, body), q.conditions())
        .await?;
    publish_create_events(&state.events, &outcome).await;
    Ok(Json(outcome.attrs.to_resource(true)).into_response())
}

async fn multipart_upload(
    state: &AppState,
    bucket: &str,
    q: &ObjectQuery,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::invalid("Content-Type is required for multipart uploads"))?;

    let parts = parse_mime_parts(content_type, &body)?;
    if parts.len() < 2 {
        return Err(Error::invalid(
            "multipart body must carry a metadata part and a content part",
        ));
    }

    let metadata: serde_json::Value = serde_json::from_slice(&parts[0].body)
        .map_err(|_| Error::invalid("Metadata in the request couldn't decode"))?;

    let mut attrs = ObjectAttrs::new(bucket, "");
    if let Some(ct) = &parts[1].content_type {
        attrs.content_type = ct.clone();
    }
    apply_metadata_json(&mut attrs, &metadata)?;
    if attrs.name.is_empty() {
        if let Some(name) = q.name.as_deref() {
            attrs.name = name.to_string();
        }
    }
    if attrs.name.is_empty() {
        return Err(Error::invalid("object name is required"));
    }

    let content = parts[1].body.clone();
    let outcome = state
        .backend
        .create_object(StreamingObject::buffered(attrs, content), q.conditions())
        .await?;
    publish_create_events(&state.events, &outcome).await;
    Ok(Json(outcome.attrs.to_resource(true)).into_response())
}

async fn start_resumable(
    state: &AppState,
    bucket: &str,
    q: &ObjectQuery,
    body: Bytes,
) -> Result<Response> {
    // The bucket must exist before a session is handed out.
    state.backend.get_bucket(bucket).await?;

    let mut attrs = ObjectAttrs::new(bucket, "");
    if !body.is_empty() {
        let metadata: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|_| Error::invalid("Metadata in the request couldn't decode"))?;
        apply_metadata_json(&mut attrs, &metadata)?;
    }
    if attrs.name.is_empty() {
        if let Some(name) = q.name.as_deref() {
            attrs.name = name.to_string();
        }
    }
    if attrs.name.is_empty() {
        return Err(Error::invalid("object name is required"));
    }

    let upload_id = state.uploads.create(attrs, q.conditions());
    let location = format!("{}/upload/resumable/{}", state.external_url(), upload_id);
    debug!("resumable upload started, location {}", location);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::LOCATION, location)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::empty())
        .unwrap())
}

/// PUT/POST on `/upload/resumable/{uploadId}`: appends a chunk governed by
/// `Content-Range`, or commits outright when the header is absent.
pub async fn resumable_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let content_range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok());

    let session = match content_range {
        Some(raw) => {
            let range = parse_content_range(raw)?;
            match state.uploads.append(&upload_id, range, &body)? {
                AppendOutcome::Complete(session) => session,
                AppendOutcome::Incomplete { received } => {
                    let mut builder = Response::builder().status(StatusCode::PERMANENT_REDIRECT);
                    if received > 0 {
                        builder = builder.header(header::RANGE, format!("bytes=0-{}", received - 1));
                    }
                    return Ok(builder.body(axum::body::Body::empty()).unwrap());
                }
            }
        }
        None => {
            let mut session = state.uploads.take(&upload_id)?;
            session.data = body.to_vec();
            session
        }
    };

    commit_resumable(&state, session).await
}

async fn commit_resumable(state: &AppState, session: ResumableUpload) -> Result<Response> {
    let ResumableUpload {
        attrs,
        conditions,
        data,
        ..
    } = session;
    let outcome = state
        .backend
        .create_object(StreamingObject::buffered(attrs, data), conditions)
        .await?;
    publish_create_events(&state.events, &outcome).await;
    Ok(Json(outcome.attrs.to_resource(true)).into_response())
}

pub async fn resumable_abort(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Response> {
    state.uploads.abort(&upload_id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// One part of a MIME multipart body.
#[derive(Debug)]
pub struct MimePart {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Splits a `multipart/related` or `multipart/form-data` body on its
/// boundary. Tolerates both CRLF and bare-LF part separators.
pub fn parse_mime_parts(content_type: &str, body: &[u8]) -> Result<Vec<MimePart>> {
    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .ok_or_else(|| Error::invalid("multipart boundary missing"))?;

    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut pos = match find_sequence(body, delimiter) {
        Some(i) => i + delimiter.len(),
        None => return Err(Error::invalid("multipart boundary not found in body")),
    };

    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        // Skip the line break after the delimiter.
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        } else if body[pos..].starts_with(b"\n") {
            pos += 1;
        }

        let (headers_raw, body_start) = match find_sequence(&body[pos..], b"\r\n\r\n") {
            Some(i) => (&body[pos..pos + i], pos + i + 4),
            None => match find_sequence(&body[pos..], b"\n\n") {
                Some(i) => (&body[pos..pos + i], pos + i + 2),
                None => return Err(Error::invalid("malformed multipart part headers")),
            },
        };

        let next = find_sequence(&body[body_start..], delimiter)
            .ok_or_else(|| Error::invalid("unterminated multipart part"))?;
        let mut body_end = body_start + next;
        // Trim the line break that precedes the next delimiter.
        if body_end >= 2 && &body[body_end - 2..body_end] == b"\r\n" {
            body_end -= 2;
        } else if body_end >= 1 && body[body_end - 1] == b'\n' {
            body_end -= 1;
        }

        parts.push(parse_part_headers(
            headers_raw,
            Bytes::copy_from_slice(&body[body_start..body_end]),
        ));
        pos = body_start + next + delimiter.len();
    }
    Ok(parts)
}

fn parse_part_headers(raw: &[u8], body: Bytes) -> MimePart {
    let mut part = MimePart {
        name: None,
        filename: None,
        content_type: None,
        body,
    };
    for line in String::from_utf8_lossy(raw).lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').map(str::trim) {
                if let Some(name) = param.strip_prefix("name=") {
                    part.name = Some(name.trim_matches('"').to_string());
                } else if let Some(filename) = param.strip_prefix("filename=") {
                    part.filename = Some(filename.trim_matches('"').to_string());
                }
            }
        }
    }
    part
}

fn find_sequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Browser-style form upload (`multipart/form-data` POST on the bucket
/// host). The `key` field names the object, `file` carries the content,
/// `x-goog-meta-*` fields become metadata.
pub async fn form_upload(
    state: &AppState,
    bucket: &str,
    content_type: &str,
    body: &[u8],
) -> Result<Response> {
    let parts = parse_mime_parts(content_type, body)?;

    let mut attrs = ObjectAttrs::new(bucket, "");
    let mut content: Option<Bytes> = None;
    let mut success_status = StatusCode::NO_CONTENT;

    for part in parts {
        match part.name.as_deref() {
            Some("key") => {
                attrs.name = String::from_utf8_lossy(&part.body).trim().to_string();
            }
            Some("file") => {
                if let Some(ct) = &part.content_type {
                    if attrs.content_type.is_empty() {
                        attrs.content_type = ct.clone();
                    }
                }
                content = Some(part.body);
            }
            Some("Content-Type") => {
                attrs.content_type = String::from_utf8_lossy(&part.body).trim().to_string();
            }
            Some("success_action_status") => {
                let raw = String::from_utf8_lossy(&part.body);
                success_status = match raw.trim() {
                    "200" => StatusCode::OK,
                    "201" => StatusCode::CREATED,
                    _ => StatusCode::NO_CONTENT,
                };
            }
            Some(field) if field.to_ascii_lowercase().starts_with("x-goog-meta-") => {
                let key = crate::server::canonical_meta_key(&field["x-goog-meta-".len()..]);
                attrs
                    .metadata
                    .insert(key, String::from_utf8_lossy(&part.body).to_string());
            }
            _ => {}
        }
    }

    if attrs.name.is_empty() {
        return Err(Error::invalid("form upload requires a key field"));
    }
    let content = content.ok_or_else(|| Error::invalid("form upload requires a file field"))?;

    let outcome = state
        .backend
        .create_object(
            StreamingObject::buffered(attrs, content),
            Default::default(),
        )
        .await?;
    publish_create_events(&state.events, &outcome).await;

    Ok(Response::builder()
        .status(success_status)
        .body(axum::body::Body::empty())
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multipart_related_body() {
        let body = b"--sep\r\nContent-Type: application/json\r\n\r\n{\"name\": \"obj\"}\r\n--sep\r\nContent-Type: text/plain\r\n\r\nhello world\r\n--sep--\r\n";
        let parts = parse_mime_parts("multipart/related; boundary=sep", body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(&parts[0].body[..], b"{\"name\": \"obj\"}");
        assert_eq!(&parts[1].body[..], b"hello world");
    }

    #[test]
    fn splits_bare_lf_body() {
        let body = b"--sep\nContent-Type: text/plain\n\nabc\n--sep--\n";
        let parts = parse_mime_parts("multipart/related; boundary=sep", body).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(&parts[0].body[..], b"abc");
    }

    #[test]
    fn quoted_boundary_and_disposition() {
        let body = b"--b1\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\nfiles/a.txt\r\n--b1\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\ndata\r\n--b1--\r\n";
        let parts =
            parse_mime_parts("multipart/form-data; boundary=\"b1\"", body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name.as_deref(), Some("key"));
        assert_eq!(&parts[0].body[..], b"files/a.txt");
        assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(&parts[1].body[..], b"data");
    }

    #[test]
    fn binary_content_preserved() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--x\r\nContent-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(&[0u8, 1, 2, 255, 254]);
        body.extend_from_slice(b"\r\n--x--\r\n");
        let parts = parse_mime_parts("multipart/related; boundary=x", &body).unwrap();
        assert_eq!(&parts[0].body[..], &[0u8, 1, 2, 255, 254]);
    }

    #[test]
    fn missing_boundary_is_an_error() {
        assert!(parse_mime_parts("multipart/related", b"anything").is_err());
    }
}
