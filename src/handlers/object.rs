use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::ObjectQuery;
use crate::backend::{ComposeSource, ObjectPatch};
use crate::download;
use crate::error::{Error, Result};
use crate::listing::{filter_objects, ListOptions};
use crate::models::{AclRule, ObjectAttrs, Retention, StreamingObject};
use crate::notify::{publish_create_events, publish_delete_events, Event, EventKind};
use crate::server::AppState;

/// The object wildcard swallows sub-resources; this splits them back out.
/// Copy, rewrite and compose only exist as POST targets, so an object
/// whose name merely ends in `/compose` is still reachable with GET.
#[derive(Debug, PartialEq)]
pub enum ObjectSubpath {
    Plain(String),
    Acl(String, Option<String>),
    Compose(String),
    CopyTo {
        source: String,
        dest_bucket: String,
        dest_object: String,
    },
    RewriteTo {
        source: String,
        dest_bucket: String,
        dest_object: String,
    },
}

pub fn parse_subpath(rest: &str, method: &Method) -> ObjectSubpath {
    if method == Method::POST {
        if let Some((source, tail)) = rest.split_once("/copyTo/b/") {
            if let Some((dest_bucket, dest_object)) = tail.split_once("/o/") {
                return ObjectSubpath::CopyTo {
                    source: source.to_string(),
                    dest_bucket: dest_bucket.to_string(),
                    dest_object: dest_object.to_string(),
                };
            }
        }
        if let Some((source, tail)) = rest.split_once("/rewriteTo/b/") {
            if let Some((dest_bucket, dest_object)) = tail.split_once("/o/") {
                return ObjectSubpath::RewriteTo {
                    source: source.to_string(),
                    dest_bucket: dest_bucket.to_string(),
                    dest_object: dest_object.to_string(),
                };
            }
        }
        if let Some(source) = rest.strip_suffix("/compose") {
            return ObjectSubpath::Compose(source.to_string());
        }
    }
    if let Some((object, entity)) = rest.rsplit_once("/acl/") {
        if !entity.is_empty() {
            return ObjectSubpath::Acl(object.to_string(), Some(entity.to_string()));
        }
    }
    if let Some(object) = rest.strip_suffix("/acl") {
        return ObjectSubpath::Acl(object.to_string(), None);
    }
    ObjectSubpath::Plain(rest.to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub versions: Option<bool>,
    pub start_offset: Option<String>,
    pub end_offset: Option<String>,
    pub include_trailing_delimiter: Option<bool>,
    pub max_results: Option<i64>,
    pub page_token: Option<String>,
    pub projection: Option<String>,
}

pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Response> {
    let full_projection = match q.projection.as_deref() {
        None | Some("") | Some("noAcl") => false,
        Some("full") => true,
        Some(other) => return Err(Error::invalid(format!("invalid projection: {}", other))),
    };

    let opts = ListOptions {
        prefix: q.prefix.clone().unwrap_or_default(),
        delimiter: q.delimiter.clone().unwrap_or_default(),
        versions: q.versions.unwrap_or(false),
        start_offset: q.start_offset.clone().unwrap_or_default(),
        end_offset: q.end_offset.clone().unwrap_or_default(),
        include_trailing_delimiter: q.include_trailing_delimiter.unwrap_or(false),
        max_results: q.max_results.unwrap_or(0),
        start_exclusive: false,
        page_token: q.page_token.clone().unwrap_or_default(),
    };

    let objects = state
        .backend
        .list_objects(&bucket, &opts.prefix, opts.versions)
        .await?;
    let result = filter_objects(objects, &opts);

    let mut doc = serde_json::json!({
        "kind": "storage#objects",
        "items": result
            .objects
            .iter()
            .map(|o| o.to_resource(full_projection))
            .collect::<Vec<_>>(),
    });
    let obj = doc.as_object_mut().unwrap();
    if !result.prefixes.is_empty() {
        obj.insert(
            "prefixes".into(),
            serde_json::to_value(&result.prefixes).unwrap_or_default(),
        );
    }
    if !result.next_page_token.is_empty() {
        obj.insert("nextPageToken".into(), result.next_page_token.into());
    }
    Ok(Json(doc).into_response())
}

pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    match parse_subpath(&rest, &Method::GET) {
        ObjectSubpath::Acl(object, None) => {
            let attrs = read_attrs(&state, &bucket, &object, &q).await?;
            let items: Vec<serde_json::Value> = attrs
                .acl
                .iter()
                .map(|r| acl_resource(&bucket, &object, r))
                .collect();
            Ok(Json(serde_json::json!({
                "kind": "storage#objectAccessControls",
                "items": items,
            }))
            .into_response())
        }
        ObjectSubpath::Acl(object, Some(entity)) => {
            let attrs = read_attrs(&state, &bucket, &object, &q).await?;
            let rule = attrs
                .acl
                .iter()
                .find(|r| r.entity == entity)
                .ok_or(Error::NoSuchKey)?;
            Ok(Json(acl_resource(&bucket, &object, rule)).into_response())
        }
        ObjectSubpath::Plain(object) => {
            if q.alt.as_deref() == Some("media") {
                return Ok(download::serve_object(
                    state.backend.as_ref(),
                    &bucket,
                    &object,
                    q.generation.as_deref(),
                    &headers,
                    false,
                )
                .await);
            }
            let attrs = read_attrs(&state, &bucket, &object, &q).await?;
            Ok(Json(attrs.to_resource(q.full_projection()?)).into_response())
        }
        _ => Err(Error::invalid("unsupported operation")),
    }
}

pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    body: String,
) -> Result<Response> {
    match parse_subpath(&rest, &Method::PUT) {
        ObjectSubpath::Acl(object, Some(entity)) => {
            set_acl_entry(&state, &bucket, &object, Some(&entity), &body).await
        }
        ObjectSubpath::Acl(object, None) => set_acl_entry(&state, &bucket, &object, None, &body).await,
        ObjectSubpath::Plain(object) => {
            let v: serde_json::Value = if body.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&body).map_err(|_| Error::invalid("malformed object resource"))?
            };
            let patch = patch_from_json(&v)?;
            let attrs = state.backend.update_object(&bucket, &object, patch).await?;
            state
                .events
                .trigger(Event::new(EventKind::MetadataUpdate, &attrs))
                .await;
            Ok(Json(attrs.to_resource(q.full_projection()?)).into_response())
        }
        _ => Err(Error::invalid("unsupported operation")),
    }
}

pub async fn patch_object(
    State(state): State<AppState>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    body: String,
) -> Result<Response> {
    match parse_subpath(&rest, &Method::PATCH) {
        ObjectSubpath::Plain(object) => {
            let v: serde_json::Value = if body.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&body).map_err(|_| Error::invalid("malformed object resource"))?
            };
            let patch = patch_from_json(&v)?;
            let attrs = state.backend.patch_object(&bucket, &object, patch).await?;
            state
                .events
                .trigger(Event::new(EventKind::MetadataUpdate, &attrs))
                .await;
            Ok(Json(attrs.to_resource(q.full_projection()?)).into_response())
        }
        _ => Err(Error::invalid("unsupported operation")),
    }
}

pub async fn post_object(
    State(state): State<AppState>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    body: String,
) -> Result<Response> {
    match parse_subpath(&rest, &Method::POST) {
        ObjectSubpath::Compose(dest) => compose(&state, &bucket, &dest, &body).await,
        ObjectSubpath::CopyTo {
            source,
            dest_bucket,
            dest_object,
        } => {
            let outcome = copy(&state, &bucket, &source, &dest_bucket, &dest_object, &q, &body).await?;
            Ok(Json(outcome.to_resource(true)).into_response())
        }
        ObjectSubpath::RewriteTo {
            source,
            dest_bucket,
            dest_object,
        } => {
            let attrs = copy(&state, &bucket, &source, &dest_bucket, &dest_object, &q, &body).await?;
            Ok(Json(serde_json::json!({
                "kind": "storage#rewriteResponse",
                "totalBytesRewritten": attrs.size.to_string(),
                "objectSize": attrs.size.to_string(),
                "done": true,
                "resource": attrs.to_resource(true),
            }))
            .into_response())
        }
        ObjectSubpath::Acl(object, entity) => {
            set_acl_entry(&state, &bucket, &object, entity.as_deref(), &body).await
        }
        ObjectSubpath::Plain(_) => Err(Error::invalid("unsupported operation")),
    }
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
) -> Result<Response> {
    match parse_subpath(&rest, &Method::DELETE) {
        ObjectSubpath::Acl(object, Some(entity)) => {
            let attrs = read_attrs(&state, &bucket, &object, &q).await?;
            let mut acl = attrs.acl.clone();
            let before = acl.len();
            acl.retain(|r| r.entity != entity);
            if acl.len() == before {
                return Err(Error::NoSuchKey);
            }
            let patch = ObjectPatch {
                acl: Some(acl),
                ..Default::default()
            };
            state.backend.patch_object(&bucket, &object, patch).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        ObjectSubpath::Plain(object) => {
            let outcome = state.backend.delete_object(&bucket, &object).await?;
            publish_delete_events(&state.events, &outcome).await;
            debug!("deleted {}/{}", bucket, object);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        _ => Err(Error::invalid("unsupported operation")),
    }
}

async fn read_attrs(
    state: &AppState,
    bucket: &str,
    object: &str,
    q: &ObjectQuery,
) -> Result<ObjectAttrs> {
    let obj = match &q.generation {
        Some(raw) => {
            let generation: i64 = raw
                .parse()
                .map_err(|_| Error::invalid(format!("invalid generation: {}", raw)))?;
            state
                .backend
                .get_object_with_generation(bucket, object, generation)
                .await?
        }
        None => state.backend.get_object(bucket, object).await?,
    };
    Ok(obj.attrs)
}

fn acl_resource(bucket: &str, object: &str, rule: &AclRule) -> serde_json::Value {
    let mut doc = serde_json::to_value(rule).unwrap_or_default();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("kind".into(), "storage#objectAccessControl".into());
        obj.insert("bucket".into(), bucket.into());
        obj.insert("object".into(), object.into());
    }
    doc
}

#[derive(Debug, Deserialize)]
struct AclBody {
    entity: Option<String>,
    role: Option<String>,
}

async fn set_acl_entry(
    state: &AppState,
    bucket: &str,
    object: &str,
    path_entity: Option<&str>,
    body: &str,
) -> Result<Response> {
    let parsed: AclBody =
        serde_json::from_str(body).map_err(|_| Error::invalid("malformed ACL resource"))?;
    let entity = path_entity
        .map(|e| e.to_string())
        .or(parsed.entity)
        .ok_or_else(|| Error::invalid("entity is required"))?;
    let role = parsed
        .role
        .ok_or_else(|| Error::invalid("role is required"))?;

    let attrs = state.backend.get_object(bucket, object).await?.attrs;
    let mut acl = attrs.acl.clone();
    match acl.iter_mut().find(|r| r.entity == entity) {
        Some(rule) => rule.role = role.clone(),
        None => acl.push(AclRule {
            entity: entity.clone(),
            role: role.clone(),
            entity_id: None,
            domain: None,
            email: None,
            project_team: None,
        }),
    }
    let patch = ObjectPatch {
        acl: Some(acl),
        ..Default::default()
    };
    let attrs = state.backend.patch_object(bucket, object, patch).await?;
    let rule = attrs
        .acl
        .iter()
        .find(|r| r.entity == entity)
        .ok_or_else(|| Error::internal("ACL entry vanished"))?;
    Ok(Json(acl_resource(bucket, object, rule)).into_response())
}

async fn compose(state: &AppState, bucket: &str, dest: &str, body: &str) -> Result<Response> {
    let v: serde_json::Value =
        serde_json::from_str(body).map_err(|_| Error::invalid("malformed compose request"))?;

    let sources = v
        .get("sourceObjects")
        .and_then(|s| s.as_array())
        .ok_or_else(|| Error::invalid("sourceObjects is required"))?;
    let sources: Vec<ComposeSource> = sources
        .iter()
        .map(|s| {
            let name = s
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| Error::invalid("source object name is required"))?;
            Ok(ComposeSource {
                name: name.to_string(),
                generation: json_i64(s.get("generation")),
            })
        })
        .collect::<Result<_>>()?;

    let mut dest_attrs = ObjectAttrs::new(bucket, dest);
    if let Some(destination) = v.get("destination") {
        apply_metadata_json(&mut dest_attrs, destination)?;
    }
    dest_attrs.name = dest.to_string();

    let outcome = state.backend.compose_object(bucket, sources, dest_attrs).await?;
    publish_create_events(&state.events, &outcome).await;
    Ok(Json(outcome.attrs.to_resource(true)).into_response())
}

async fn copy(
    state: &AppState,
    src_bucket: &str,
    src_object: &str,
    dest_bucket: &str,
    dest_object: &str,
    q: &ObjectQuery,
    body: &str,
) -> Result<ObjectAttrs> {
    let source = match q.source_generation {
        Some(generation) => {
            state
                .backend
                .get_object_with_generation(src_bucket, src_object, generation)
                .await?
        }
        None => state.backend.get_object(src_bucket, src_object).await?,
    };

    let mut attrs = ObjectAttrs::new(dest_bucket, dest_object);
    attrs.content_type = source.attrs.content_type.clone();
    attrs.content_encoding = source.attrs.content_encoding.clone();
    attrs.content_disposition = source.attrs.content_disposition.clone();
    attrs.content_language = source.attrs.content_language.clone();
    attrs.cache_control = source.attrs.cache_control.clone();
    attrs.storage_class = source.attrs.storage_class.clone();
    attrs.metadata = source.attrs.metadata.clone();
    attrs.custom_time = source.attrs.custom_time;

    // Metadata in the request body replaces what was copied over.
    if !body.trim().is_empty() {
        let v: serde_json::Value =
            serde_json::from_str(body).map_err(|_| Error::invalid("malformed object resource"))?;
        if v.get("metadata").is_some() {
            attrs.metadata = HashMap::new();
        }
        apply_metadata_json(&mut attrs, &v)?;
        attrs.name = dest_object.to_string();
        attrs.bucket_name = dest_bucket.to_string();
    }

    let data = source.into_bytes()?;
    let outcome = state
        .backend
        .create_object(StreamingObject::buffered(attrs, data), q.conditions())
        .await?;
    publish_create_events(&state.events, &outcome).await;
    debug!(
        "copied {}/{} to {}/{}",
        src_bucket, src_object, dest_bucket, dest_object
    );
    Ok(outcome.attrs)
}

/// Reads an i64 that may arrive as a JSON number or string.
pub fn json_i64(v: Option<&serde_json::Value>) -> Option<i64> {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Applies object-resource JSON fields onto attrs; used by uploads,
/// compose destinations and copy overrides.
pub fn apply_metadata_json(attrs: &mut ObjectAttrs, v: &serde_json::Value) -> Result<()> {
    if let Some(name) = v.get("name").and_then(|n| n.as_str()) {
        attrs.name = name.to_string();
    }
    if let Some(s) = v.get("contentType").and_then(|x| x.as_str()) {
        attrs.content_type = s.to_string();
    }
    if let Some(s) = v.get("contentEncoding").and_then(|x| x.as_str()) {
        attrs.content_encoding = s.to_string();
    }
    if let Some(s) = v.get("contentDisposition").and_then(|x| x.as_str()) {
        attrs.content_disposition = s.to_string();
    }
    if let Some(s) = v.get("contentLanguage").and_then(|x| x.as_str()) {
        attrs.content_language = s.to_string();
    }
    if let Some(s) = v.get("cacheControl").and_then(|x| x.as_str()) {
        attrs.cache_control = s.to_string();
    }
    if let Some(s) = v.get("storageClass").and_then(|x| x.as_str()) {
        attrs.storage_class = s.to_string();
    }
    if let Some(s) = v.get("customTime").and_then(|x| x.as_str()) {
        attrs.custom_time = Some(parse_time(s)?);
    }
    if let Some(generation) = json_i64(v.get("generation")) {
        attrs.generation = generation;
    }
    if let Some(meta) = v.get("metadata").and_then(|m| m.as_object()) {
        for (key, value) in meta {
            if let Some(value) = value.as_str() {
                attrs.metadata.insert(key.clone(), value.to_string());
            }
        }
    }
    if let Some(acl) = v.get("acl") {
        if let Ok(rules) = serde_json::from_value::<Vec<AclRule>>(acl.clone()) {
            attrs.acl = rules;
        }
    }
    if let Some(retention) = v.get("retention").and_then(|r| r.as_object()) {
        let mode = retention
            .get("mode")
            .and_then(|m| m.as_str())
            .unwrap_or("Unlocked");
        let until = retention
            .get("retainUntilTime")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::invalid("retainUntilTime is required"))?;
        attrs.retention = Some(Retention {
            mode: mode.to_string(),
            retain_until_time: parse_time(until)?,
        });
    }
    Ok(())
}

/// Builds a patch/update payload from an object resource body.
pub fn patch_from_json(v: &serde_json::Value) -> Result<ObjectPatch> {
    let mut patch = ObjectPatch::default();

    if let Some(meta) = v.get("metadata") {
        match meta {
            serde_json::Value::Object(entries) => {
                let mut map = HashMap::new();
                for (key, value) in entries {
                    match value {
                        serde_json::Value::Null => {
                            map.insert(key.clone(), None);
                        }
                        serde_json::Value::String(s) => {
                            map.insert(key.clone(), Some(s.clone()));
                        }
                        other => {
                            map.insert(key.clone(), Some(other.to_string()));
                        }
                    }
                }
                patch.metadata = Some(map);
            }
            serde_json::Value::Null => patch.metadata = Some(HashMap::new()),
            _ => return Err(Error::invalid("metadata must be an object")),
        }
    }

    patch.content_type = v
        .get("contentType")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    patch.content_encoding = v
        .get("contentEncoding")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    patch.content_disposition = v
        .get("contentDisposition")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    patch.content_language = v
        .get("contentLanguage")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    patch.cache_control = v
        .get("cacheControl")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    patch.storage_class = v
        .get("storageClass")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    if let Some(s) = v.get("customTime").and_then(|x| x.as_str()) {
        patch.custom_time = Some(parse_time(s)?);
    }
    if let Some(acl) = v.get("acl") {
        patch.acl = Some(
            serde_json::from_value(acl.clone())
                .map_err(|_| Error::invalid("malformed acl"))?,
        );
    }
    if let Some(retention) = v.get("retention") {
        match retention {
            serde_json::Value::Null => patch.retention = Some(None),
            serde_json::Value::Object(fields) => {
                let mode = fields
                    .get("mode")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Unlocked");
                let until = fields
                    .get("retainUntilTime")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| Error::invalid("retainUntilTime is required"))?;
                patch.retention = Some(Some(Retention {
                    mode: mode.to_string(),
                    retain_until_time: parse_time(until)?,
                }));
            }
            _ => return Err(Error::invalid("malformed retention")),
        }
    }
    Ok(patch)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::invalid(format!("invalid timestamp: {}", s)))
}
