//! `holocron serve`: a small JSON HTTP surface over [`CatalogService`].
//!
//! Routes (all bodies JSON, errors as `{ "detail": ... }`):
//!
//! ```text
//! GET  /                                   banner
//! GET  /health                             liveness
//! GET  /api/v1/{characters|films|starships}/            list
//! GET  /api/v1/{..}/{id}                                one row
//! GET  /api/v1/{..}/search/?name=..  (title= for films, q= for any)
//! POST /api/v1/{..}/fetch                               run ingestion
//! POST /api/v1/vote/          {"entity_type": "..", "entity_id": n}
//! GET  /api/v1/vote/top?entity_type=..&limit=..         ranking
//! ```

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use holocron_ingest::IngestError;
use holocron_model::{Attributes, Entity, EntityId, EntityKind};
use holocron_storage::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::service::CatalogService;

const API_PREFIX: &str = "/api/v1";
const DEFAULT_TOP_LIMIT: i64 = 10;
const MAX_TOP_LIMIT: i64 = 100;

pub struct ServeOptions {
    pub listen: SocketAddr,
    /// Written once the listener is bound: `{ "addr": .., "pid": .. }`.
    pub ready_file: Option<PathBuf>,
}

pub async fn serve(service: Arc<CatalogService>, options: ServeOptions) -> Result<()> {
    let listener = TcpListener::bind(options.listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {}: {e}", options.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    tracing::info!(addr = %bound, "listening");
    if let Some(path) = options.ready_file.as_ref() {
        let payload = json!({ "addr": bound.to_string(), "pid": std::process::id() });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    }

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        };
        let (stream, peer) = accepted.map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let service = Arc::clone(&service);

        tokio::spawn(async move {
            let handler = service_fn(move |req| handle_request(req, Arc::clone(&service)));
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }

    service.shutdown();
    service.checkpoint().await?;
    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    service: Arc<CatalogService>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let body = if method == Method::POST {
        req.into_body().collect().await?.to_bytes()
    } else {
        Bytes::new()
    };

    let (status, value) = dispatch(&service, &method, &path, query.as_deref(), &body).await;
    tracing::debug!(method = %method, path = %path, status = status.as_u16(), "request");
    Ok(json_response(status, &value))
}

// ============================================================================
// Routing
// ============================================================================

type Reply = (StatusCode, Value);

fn detail(status: StatusCode, msg: impl Into<String>) -> Reply {
    (status, json!({ "detail": msg.into() }))
}

fn ok<T: Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn store_error(err: StoreError) -> Reply {
    match err {
        StoreError::NotFound { kind, id } => {
            detail(StatusCode::NOT_FOUND, format!("{kind} {id} not found"))
        }
        other => detail(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

/// Route one request. Transport-free so it can be tested directly.
pub async fn dispatch(
    service: &CatalogService,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: &[u8],
) -> Reply {
    match (method, path) {
        (&Method::GET, "/") => {
            return (
                StatusCode::OK,
                json!({ "message": "Holocron catalog mirror", "api": API_PREFIX }),
            )
        }
        (&Method::GET, "/health") => return (StatusCode::OK, json!({ "status": "ok" })),
        _ => {}
    }

    let Some(rest) = path.strip_prefix(API_PREFIX) else {
        return detail(StatusCode::NOT_FOUND, "Not Found");
    };
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let params = parse_query_params(query);

    match (method, segments.as_slice()) {
        (&Method::POST, ["vote"]) => cast_vote(service, body).await,
        (&Method::GET, ["vote", "top"]) => top(service, &params).await,
        (_, ["vote", ..]) => detail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),

        (m, [collection, tail @ ..]) => {
            let Some(kind) = kind_for_route(collection) else {
                return detail(StatusCode::NOT_FOUND, "Not Found");
            };
            match (m, tail) {
                (&Method::GET, []) => match service.list(kind).await {
                    Ok(rows) => (StatusCode::OK, Value::Array(rows.iter().map(entity_json).collect())),
                    Err(e) => store_error(e),
                },
                (&Method::GET, ["search"]) => search(service, kind, &params).await,
                (&Method::POST, ["fetch"]) => fetch(service, kind).await,
                (&Method::GET, [id]) => {
                    let Ok(raw) = id.parse::<u64>() else {
                        return detail(StatusCode::BAD_REQUEST, format!("invalid id `{id}`"));
                    };
                    match service.get(kind, EntityId::new(raw)).await {
                        Ok(entity) => (StatusCode::OK, entity_json(&entity)),
                        Err(e) => store_error(e),
                    }
                }
                (_, [] | ["search"] | ["fetch"] | [_]) => {
                    detail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
                }
                _ => detail(StatusCode::NOT_FOUND, "Not Found"),
            }
        }
        _ => detail(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn kind_for_route(segment: &str) -> Option<EntityKind> {
    EntityKind::ALL.into_iter().find(|k| k.plural() == segment)
}

async fn search(service: &CatalogService, kind: EntityKind, params: &HashMap<String, String>) -> Reply {
    let field = match kind {
        EntityKind::Film => "title",
        _ => "name",
    };
    let Some(q) = params.get(field).or_else(|| params.get("q")) else {
        return detail(StatusCode::BAD_REQUEST, format!("missing query parameter `{field}`"));
    };
    match service.search(kind, q).await {
        Ok(rows) => (StatusCode::OK, Value::Array(rows.iter().map(entity_json).collect())),
        Err(e) => store_error(e),
    }
}

async fn fetch(service: &CatalogService, kind: EntityKind) -> Reply {
    match service.ingest(kind).await {
        Ok(summary) => ok(&summary),
        Err(err @ IngestError::SourceUnavailable { .. }) => {
            detail(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Err(err) => detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct VoteRequest {
    entity_type: String,
    entity_id: u64,
}

#[derive(Debug, Serialize)]
struct VoteResponse {
    entity_type: EntityKind,
    entity_id: EntityId,
    vote_count: u64,
}

async fn cast_vote(service: &CatalogService, body: &[u8]) -> Reply {
    let request: VoteRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return detail(StatusCode::BAD_REQUEST, format!("invalid vote body: {e}")),
    };
    let kind = match request.entity_type.parse::<EntityKind>() {
        Ok(kind) => kind,
        Err(e) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let id = EntityId::new(request.entity_id);
    match service.cast_vote(kind, id).await {
        Ok(vote_count) => ok(&VoteResponse {
            entity_type: kind,
            entity_id: id,
            vote_count,
        }),
        Err(e) => store_error(e),
    }
}

async fn top(service: &CatalogService, params: &HashMap<String, String>) -> Reply {
    let kind = match params.get("entity_type").map(|s| s.parse::<EntityKind>()) {
        None => None,
        Some(Ok(kind)) => Some(kind),
        Some(Err(e)) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let limit = match params.get("limit").map(|s| s.trim().parse::<i64>()) {
        None => DEFAULT_TOP_LIMIT,
        Some(Ok(n)) if (1..=MAX_TOP_LIMIT).contains(&n) => n,
        Some(_) => {
            return detail(
                StatusCode::BAD_REQUEST,
                format!("limit must be an integer between 1 and {MAX_TOP_LIMIT}"),
            )
        }
    };
    match service.top_ranked(kind, limit).await {
        Ok(ranked) => ok(&ranked),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Flat JSON view of a row: scalar attributes at top level, references as
/// id arrays named after the remote fields, pending ones listed separately.
pub fn entity_json(entity: &Entity) -> Value {
    let attributes = match &entity.attributes {
        Attributes::Character(a) => serde_json::to_value(a),
        Attributes::Film(a) => serde_json::to_value(a),
        Attributes::Starship(a) => serde_json::to_value(a),
    };
    let mut out = match attributes {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    out.insert("id".into(), json!(entity.id));
    out.insert("kind".into(), json!(entity.kind));
    out.insert("natural_key".into(), json!(entity.natural_key));
    out.insert("vote_count".into(), json!(entity.vote_count));

    let links: &[(&str, EntityKind)] = match entity.kind {
        EntityKind::Character => &[("films", EntityKind::Film), ("starships", EntityKind::Starship)],
        EntityKind::Film => &[("characters", EntityKind::Character), ("starships", EntityKind::Starship)],
        EntityKind::Starship => &[("pilots", EntityKind::Character), ("films", EntityKind::Film)],
    };
    for (field, kind) in links {
        out.insert((*field).into(), json!(entity.resolved_ids(*kind)));
    }
    let pending: Vec<String> = entity.unresolved().map(|r| r.target.to_string()).collect();
    out.insert("pending_references".into(), json!(pending));

    Value::Object(out)
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"detail\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"detail\":\"internal\"}"))))
}

fn parse_query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(q) = query else {
        return out;
    };
    for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
        out.insert(k.into_owned(), v.into_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use holocron_ingest::{FetchError, FixtureSource, IngestConfig, RetryPolicy};
    use holocron_storage::MemoryStore;

    fn service_with(source: FixtureSource) -> CatalogService {
        let config = IngestConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                multiplier: 1,
            },
            ..IngestConfig::default()
        };
        CatalogService::new(Arc::new(MemoryStore::new()), Arc::new(source), config)
    }

    fn fixtures() -> FixtureSource {
        FixtureSource::new()
            .with_records(
                EntityKind::Character,
                vec![
                    json!({ "name": "Luke Skywalker", "films": ["https://swapi.info/api/films/1"], "url": "https://swapi.info/api/people/1" }),
                    json!({ "name": "Leia Organa", "url": "https://swapi.info/api/people/5" }),
                ],
            )
            .with_records(
                EntityKind::Film,
                vec![json!({ "title": "A New Hope", "episode_id": 4, "url": "https://swapi.info/api/films/1" })],
            )
    }

    async fn call(service: &CatalogService, method: Method, path: &str) -> Reply {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        dispatch(service, &method, path, query, b"").await
    }

    async fn vote(service: &CatalogService, body: Value) -> Reply {
        let bytes = serde_json::to_vec(&body).unwrap();
        dispatch(service, &Method::POST, "/api/v1/vote/", None, &bytes).await
    }

    #[tokio::test]
    async fn health_and_banner() {
        let service = service_with(FixtureSource::new());
        assert_eq!(call(&service, Method::GET, "/health").await.1["status"], "ok");
        assert_eq!(call(&service, Method::GET, "/").await.0, StatusCode::OK);
        assert_eq!(call(&service, Method::GET, "/nope").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fetch_then_list_get_and_search() {
        let service = service_with(fixtures());
        let (status, summary) = call(&service, Method::POST, "/api/v1/characters/fetch").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["imported"], 2);
        call(&service, Method::POST, "/api/v1/films/fetch").await;

        let (_, list) = call(&service, Method::GET, "/api/v1/characters/").await;
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], "Leia Organa");

        let luke_id = list[1]["id"].as_u64().unwrap();
        let (status, luke) = call(&service, Method::GET, &format!("/api/v1/characters/{luke_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(luke["films"].as_array().unwrap().len(), 1);
        assert_eq!(luke["pending_references"], json!([]));

        let (_, hits) = call(&service, Method::GET, "/api/v1/characters/search/?name=sky").await;
        assert_eq!(hits.as_array().unwrap().len(), 1);
        let (_, hits) = call(&service, Method::GET, "/api/v1/films/search/?title=hope").await;
        assert_eq!(hits[0]["title"], "A New Hope");
        let (status, _) = call(&service, Method::GET, "/api/v1/films/search/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_ids_are_404_and_bad_ids_400() {
        let service = service_with(fixtures());
        let (status, body) = call(&service, Method::GET, "/api/v1/starships/42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("not found"));
        let (status, _) = call(&service, Method::GET, "/api/v1/starships/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&service, Method::DELETE, "/api/v1/starships/1").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn votes_and_ranking() {
        let service = service_with(fixtures());
        call(&service, Method::POST, "/api/v1/characters/fetch").await;
        let (_, list) = call(&service, Method::GET, "/api/v1/characters/").await;
        let leia = list[0]["id"].as_u64().unwrap();

        for expected in 1..=3 {
            let (status, body) = vote(&service, json!({ "entity_type": "character", "entity_id": leia })).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["vote_count"], expected);
        }

        let (status, _) = vote(&service, json!({ "entity_type": "character", "entity_id": 9999 })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = vote(&service, json!({ "entity_type": "planet", "entity_id": leia })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = dispatch(&service, &Method::POST, "/api/v1/vote/", None, b"{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, top) = call(&service, Method::GET, "/api/v1/vote/top?entity_type=character&limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(top.as_array().unwrap().len(), 1);
        assert_eq!(top[0]["id"].as_u64(), Some(leia));
        assert_eq!(top[0]["vote_count"], 3);

        let (_, all) = call(&service, Method::GET, "/api/v1/vote/top").await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        for bad in ["limit=0", "limit=101", "limit=ten", "entity_type=planet"] {
            let (status, _) = call(&service, Method::GET, &format!("/api/v1/vote/top?{bad}")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
        }
    }

    #[tokio::test]
    async fn unreachable_source_is_503() {
        let source = FixtureSource::new()
            .fail_page(EntityKind::Starship, 0, FetchError::Transient("down".into()))
            .fail_page(EntityKind::Starship, 0, FetchError::Transient("down".into()));
        let service = service_with(source);
        let (status, body) = call(&service, Method::POST, "/api/v1/starships/fetch").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("unavailable"));
    }
}
