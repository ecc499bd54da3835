use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::responses;
use crate::checksum;
use crate::download;
use crate::error::Error;
use crate::handlers::upload::form_upload;
use crate::listing::{filter_objects, ListOptions};
use crate::models::{ObjectAttrs, StreamingObject};
use crate::multipart::UploadSummary;
use crate::notify::{publish_create_events, publish_delete_events};
use crate::server::{goog_meta_from_headers, parse_query, AppState};
use crate::backend::Conditions;

/// Fallback service for everything outside the JSON API: path-style,
/// virtual-host-style and CNAME-style downloads, XML object writes, and
/// the S3-style multipart protocol. Dispatch is driven by the Host header
/// first, then method and query shape.
pub async fn handle_data_plane(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let method = parts.method;
    let headers = parts.headers;
    let uri = parts.uri;
    let query = parse_query(uri.query().unwrap_or(""));

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => return Error::internal(format!("failed to read body: {}", e)).to_xml_response(),
    };

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_string();

    // Virtual-host and CNAME styles put the bucket in the Host header;
    // everything else carries it as the first path segment.
    let vhost_suffix = format!(".{}", state.public_host);
    let bucket_from_host = if host == state.public_host || host.is_empty() {
        None
    } else if let Some(bucket) = host.strip_suffix(vhost_suffix.as_str()) {
        Some(bucket.to_string())
    } else if state.backend.get_bucket(&host).await.is_ok() {
        Some(host.clone())
    } else {
        None
    };

    let segments: Vec<String> = uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();

    let (bucket, object) = match &bucket_from_host {
        Some(bucket) => (bucket.clone(), segments.join("/")),
        None => {
            if segments.is_empty() {
                return Error::invalid("missing bucket name").to_xml_response();
            }
            (segments[0].clone(), segments[1..].join("/"))
        }
    };
    debug!(
        "data plane: {} host={} bucket={} object={}",
        method, host, bucket, object
    );

    if object.is_empty() {
        bucket_request(&state, &method, &bucket, &query, &headers, &body).await
    } else {
        object_request(&state, &method, &bucket, &object, &query, &headers, body).await
    }
}

async fn bucket_request(
    state: &AppState,
    method: &Method,
    bucket: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    match *method {
        Method::GET if query.contains_key("uploads") => list_uploads(state, bucket, query),
        Method::GET => list_objects_xml(state, bucket, query).await,
        Method::HEAD => match state.backend.get_bucket(bucket).await {
            Ok(_) => StatusCode::OK.into_response(),
            Err(e) => e.to_xml_response(),
        },
        Method::POST => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if content_type.starts_with("multipart/form-data") {
                match form_upload(state, bucket, &content_type, body).await {
                    Ok(resp) => resp,
                    Err(e) => e.to_xml_response(),
                }
            } else {
                Error::invalid("unsupported bucket POST").to_xml_response()
            }
        }
        Method::PUT => match state.backend.create_bucket(bucket, false).await {
            Ok(_) => StatusCode::OK.into_response(),
            Err(e) => e.to_xml_response(),
        },
        Method::DELETE => match state.backend.delete_bucket(bucket).await {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => e.to_xml_response(),
        },
        _ => Error::invalid("unsupported method").to_xml_response(),
    }
}

async fn list_objects_xml(
    state: &AppState,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Response {
    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").cloned().unwrap_or_default();
    let max_results = query
        .get("max-keys")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    // `start-after` is an exclusive offset; the v1 `marker` behaves the
    // same way for keys strictly after it.
    let (start_offset, start_exclusive) = match (query.get("start-after"), query.get("marker")) {
        (Some(s), _) if !s.is_empty() => (s.clone(), true),
        (_, Some(m)) if !m.is_empty() => (m.clone(), true),
        _ => (String::new(), false),
    };

    let opts = ListOptions {
        prefix: prefix.clone(),
        delimiter: delimiter.clone(),
        versions: false,
        start_offset,
        end_offset: String::new(),
        include_trailing_delimiter: false,
        max_results,
        start_exclusive,
        page_token: String::new(),
    };

    let objects = match state.backend.list_objects(bucket, &opts.prefix, false).await {
        Ok(o) => o,
        Err(e) => return e.to_xml_response(),
    };
    let result = filter_objects(objects, &opts);

    xml_response(
        StatusCode::OK,
        responses::list_bucket_result(bucket, &result.objects, &result.prefixes, &prefix, &delimiter),
    )
}

fn list_uploads(state: &AppState, bucket: &str, query: &HashMap<String, String>) -> Response {
    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").cloned().unwrap_or_default();
    let key_marker = query.get("key-marker").cloned().unwrap_or_default();
    let upload_id_marker = query.get("upload-id-marker").cloned().unwrap_or_default();
    let max_uploads = query
        .get("max-uploads")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1000);

    let mut rows = state.multipart.list_uploads(bucket);
    rows.retain(|r| r.key.starts_with(&prefix));
    if !key_marker.is_empty() {
        rows.retain(|r| {
            if upload_id_marker.is_empty() {
                r.key.as_str() > key_marker.as_str()
            } else {
                r.key.as_str() > key_marker.as_str()
                    || (r.key == key_marker && r.upload_id.as_str() > upload_id_marker.as_str())
            }
        });
    }

    let mut uploads: Vec<UploadSummary> = Vec::new();
    let mut prefixes: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        if !delimiter.is_empty() {
            let tail = &row.key[prefix.len()..];
            if let Some(p) = tail.find(&delimiter) {
                prefixes.insert(row.key[..prefix.len() + p + delimiter.len()].to_string());
                continue;
            }
        }
        uploads.push(row);
    }

    let is_truncated = uploads.len() as i64 > max_uploads;
    uploads.truncate(max_uploads as usize);
    let (next_key_marker, next_upload_id_marker) = if is_truncated {
        match uploads.last() {
            Some(last) => (Some(last.key.clone()), Some(last.upload_id.clone())),
            None => (None, None),
        }
    } else {
        (None, None)
    };
    let common_prefixes: Vec<String> = prefixes.into_iter().collect();

    xml_response(
        StatusCode::OK,
        responses::list_uploads_result(&responses::ListUploadsPage {
            bucket,
            uploads: &uploads,
            common_prefixes: &common_prefixes,
            prefix: &prefix,
            delimiter: &delimiter,
            key_marker: &key_marker,
            upload_id_marker: &upload_id_marker,
            max_uploads,
            next_key_marker: next_key_marker.as_deref(),
            next_upload_id_marker: next_upload_id_marker.as_deref(),
            is_truncated,
        }),
    )
}

#[allow(clippy::too_many_arguments)]
async fn object_request(
    state: &AppState,
    method: &Method,
    bucket: &str,
    object: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let upload_id = query.get("uploadId").cloned();

    match *method {
        Method::POST if query.contains_key("uploads") => {
            initiate_multipart(state, bucket, object, headers).await
        }
        Method::POST if upload_id.is_some() => {
            complete_multipart(state, bucket, object, &upload_id.unwrap(), &body).await
        }
        Method::PUT if upload_id.is_some() => {
            upload_part(state, &upload_id.unwrap(), query, headers, body)
        }
        Method::DELETE if upload_id.is_some() => {
            match state.multipart.abort(&upload_id.unwrap()) {
                Ok(_) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => e.to_xml_response(),
            }
        }
        Method::GET if upload_id.is_some() => {
            list_parts(state, bucket, object, &upload_id.unwrap(), query)
        }
        Method::GET | Method::HEAD => {
            download::serve_object(
                state.backend.as_ref(),
                bucket,
                object,
                query.get("generation").map(|s| s.as_str()),
                headers,
                *method == Method::HEAD,
            )
            .await
        }
        Method::PUT if headers.contains_key("x-goog-copy-source") => {
            xml_copy(state, bucket, object, headers).await
        }
        Method::PUT => xml_put(state, bucket, object, headers, body).await,
        Method::DELETE => match state.backend.delete_object(bucket, object).await {
            Ok(outcome) => {
                publish_delete_events(&state.events, &outcome).await;
                StatusCode::NO_CONTENT.into_response()
            }
            Err(e) => e.to_xml_response(),
        },
        _ => Error::invalid("unsupported method").to_xml_response(),
    }
}

async fn initiate_multipart(
    state: &AppState,
    bucket: &str,
    object: &str,
    headers: &HeaderMap,
) -> Response {
    if let Err(e) = state.backend.get_bucket(bucket).await {
        return e.to_xml_response();
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let metadata = goog_meta_from_headers(headers);

    let upload_id = state
        .multipart
        .initiate(bucket, object, content_type, metadata);
    xml_response(
        StatusCode::OK,
        responses::initiate_multipart_result(bucket, object, &upload_id),
    )
}

fn upload_part(
    state: &AppState,
    upload_id: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let part_number: i32 = match query.get("partNumber").map(|v| v.parse()) {
        Some(Ok(n)) => n,
        _ => return Error::invalid("bad partNumber").to_xml_response(),
    };

    if let Some(expected) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if expected != body.len() as u64 {
            return Error::invalid(format!(
                "Content-Length {} does not match body of {} bytes",
                expected,
                body.len()
            ))
            .to_xml_response();
        }
    }

    let md5 = checksum::encoded_md5(&body);
    let crc = checksum::encoded_crc32c(&body);

    if let Some(sent) = headers.get("content-md5").and_then(|v| v.to_str().ok()) {
        if sent != md5 {
            return Error::invalid("Content-MD5 mismatch").to_xml_response();
        }
    }
    for value in headers.get_all("x-goog-hash") {
        let Ok(value) = value.to_str() else { continue };
        for entry in value.split(',').map(str::trim) {
            if let Some(sent) = entry.strip_prefix("md5=") {
                if sent != md5 {
                    return Error::invalid("md5 hash mismatch").to_xml_response();
                }
            } else if let Some(sent) = entry.strip_prefix("crc32c=") {
                if sent != crc {
                    return Error::invalid("crc32c hash mismatch").to_xml_response();
                }
            }
        }
    }

    match state.multipart.put_part(upload_id, part_number, body) {
        Ok(part) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{}\"", part.etag))
            .header(
                "X-Goog-Hash",
                format!("crc32c={},md5={}", part.crc32c, part.etag),
            )
            .body(Body::empty())
            .unwrap(),
        Err(e) => e.to_xml_response(),
    }
}

async fn complete_multipart(
    state: &AppState,
    bucket: &str,
    object: &str,
    upload_id: &str,
    body: &Bytes,
) -> Response {
    let body_str = String::from_utf8_lossy(body);
    let request = match responses::parse_complete_multipart(&body_str) {
        Ok(r) => r,
        Err(e) => return e.to_xml_response(),
    };
    let requested: Vec<(i32, String)> = request
        .parts
        .iter()
        .map(|p| (p.part_number, p.etag.clone()))
        .collect();

    let completed = match state.multipart.complete(upload_id, bucket, object, &requested) {
        Ok(c) => c,
        Err(e) => return e.to_xml_response(),
    };

    let mut attrs = ObjectAttrs::new(&completed.bucket, &completed.key);
    attrs.content_type = completed.content_type.clone();
    attrs.metadata = completed.metadata.clone();

    let outcome = match state
        .backend
        .create_object(
            StreamingObject::buffered(attrs, completed.data),
            Conditions::default(),
        )
        .await
    {
        Ok(o) => o,
        Err(e) => return e.to_xml_response(),
    };
    publish_create_events(&state.events, &outcome).await;

    let location = format!("{}/{}/{}", state.external_url(), bucket, object);
    xml_response(
        StatusCode::OK,
        responses::complete_multipart_result(&location, bucket, object, &outcome.attrs.etag),
    )
}

fn list_parts(
    state: &AppState,
    bucket: &str,
    object: &str,
    upload_id: &str,
    query: &HashMap<String, String>,
) -> Response {
    let max_parts = query
        .get("max-parts")
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1000)
        .min(1000);
    let marker = query
        .get("part-number-marker")
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0);

    let parts = match state.multipart.list_parts(upload_id, bucket, object) {
        Ok(p) => p,
        Err(e) => return e.to_xml_response(),
    };

    let remaining: Vec<_> = parts
        .into_iter()
        .filter(|p| p.part_number > marker)
        .collect();
    let is_truncated = remaining.len() as i32 > max_parts;
    let page: Vec<_> = remaining.into_iter().take(max_parts as usize).collect();
    let next_marker = if is_truncated {
        page.last().map(|p| p.part_number)
    } else {
        None
    };

    xml_response(
        StatusCode::OK,
        responses::list_parts_result(&responses::ListPartsPage {
            bucket,
            key: object,
            upload_id,
            parts: &page,
            max_parts,
            part_number_marker: marker,
            next_part_number_marker: next_marker,
            is_truncated,
        }),
    )
}

async fn xml_put(
    state: &AppState,
    bucket: &str,
    object: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let mut attrs = ObjectAttrs::new(bucket, object);
    if let Some(ct) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        attrs.content_type = ct.to_string();
    }
    if let Some(enc) = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
    {
        attrs.content_encoding = enc.to_string();
    }
    if let Some(disp) = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
    {
        attrs.content_disposition = disp.to_string();
    }
    if let Some(cache) = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
    {
        attrs.cache_control = cache.to_string();
    }
    if let Some(class) = headers
        .get("x-goog-storage-class")
        .and_then(|v| v.to_str().ok())
    {
        attrs.storage_class = class.to_string();
    }
    attrs.metadata = goog_meta_from_headers(headers);

    let conditions = Conditions {
        if_generation_match: header_i64(headers, "x-goog-if-generation-match"),
        if_metageneration_match: header_i64(headers, "x-goog-if-metageneration-match"),
        ..Default::default()
    };

    let outcome = match state
        .backend
        .create_object(StreamingObject::buffered(attrs, body), conditions)
        .await
    {
        Ok(o) => o,
        Err(e) => return e.to_xml_response(),
    };
    publish_create_events(&state.events, &outcome).await;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, format!("\"{}\"", outcome.attrs.etag))
        .header("X-Goog-Generation", outcome.attrs.generation.to_string())
        .header(
            "X-Goog-Hash",
            format!(
                "crc32c={},md5={}",
                outcome.attrs.crc32c, outcome.attrs.md5_hash
            ),
        )
        .body(Body::empty())
        .unwrap()
}

async fn xml_copy(state: &AppState, bucket: &str, object: &str, headers: &HeaderMap) -> Response {
    let source = headers
        .get("x-goog-copy-source")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim_start_matches('/');
    let Some((src_bucket, src_object)) = source.split_once('/') else {
        return Error::invalid("invalid copy source").to_xml_response();
    };
    let src_object = urlencoding::decode(src_object)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| src_object.to_string());

    let src = match state.backend.get_object(src_bucket, &src_object).await {
        Ok(o) => o,
        Err(e) => return e.to_xml_response(),
    };

    let mut attrs = ObjectAttrs::new(bucket, object);
    attrs.content_type = src.attrs.content_type.clone();
    attrs.content_encoding = src.attrs.content_encoding.clone();
    attrs.content_disposition = src.attrs.content_disposition.clone();
    attrs.content_language = src.attrs.content_language.clone();
    attrs.cache_control = src.attrs.cache_control.clone();
    attrs.storage_class = src.attrs.storage_class.clone();

    let directive = headers
        .get("x-goog-metadata-directive")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("COPY");
    if directive.eq_ignore_ascii_case("REPLACE") {
        attrs.metadata = goog_meta_from_headers(headers);
    } else {
        attrs.metadata = src.attrs.metadata.clone();
    }

    let data = match src.into_bytes() {
        Ok(d) => d,
        Err(e) => return e.to_xml_response(),
    };
    let outcome = match state
        .backend
        .create_object(StreamingObject::buffered(attrs, data), Conditions::default())
        .await
    {
        Ok(o) => o,
        Err(e) => return e.to_xml_response(),
    };
    publish_create_events(&state.events, &outcome).await;

    xml_response(
        StatusCode::OK,
        responses::copy_object_result(&outcome.attrs.etag, &outcome.attrs.updated),
    )
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn xml_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .unwrap()
}
