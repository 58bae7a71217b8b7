//! HTTP surface: the XRPC endpoints a Bluesky app view calls on a feed
//! generator, the did:web document, and a hydrated preview of a feed.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::algos::{AlgorithmRegistry, FeedSkeleton};
use crate::db::Database;
use crate::follows::GraphClient;

pub const DEFAULT_LIMIT: usize = 20;
/// Upper bound the getFeedSkeleton lexicon allows.
pub const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<AlgorithmRegistry>,
    pub hostname: String,
    /// Session used to hydrate feed previews; previews are unavailable without it.
    pub graph: Option<Arc<dyn GraphClient>>,
}

impl AppState {
    pub fn new(db: Database, registry: Arc<AlgorithmRegistry>, hostname: impl Into<String>) -> Self {
        Self {
            db,
            registry,
            hostname: hostname.into(),
            graph: None,
        }
    }

    pub fn with_graph_client(mut self, graph: Arc<dyn GraphClient>) -> Self {
        self.graph = Some(graph);
        self
    }
}

/// The did:web document is only served when the service DID is rooted at
/// this host.
pub fn hosts_did_document(service_did: &str, hostname: &str) -> bool {
    service_did.ends_with(hostname)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/.well-known/did.json", get(did_json))
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator),
        )
        .route("/xrpc/app.bsky.feed.getFeedSkeleton", get(get_feed_skeleton))
        .route("/get-feed-with-details", get(get_feed_with_details))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `cancel_token` fires, then drains in-flight requests.
pub async fn serve(listener: TcpListener, state: AppState, cancel_token: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("Serving feeds on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
        .context("HTTP server failed")
}

async fn index() -> &'static str {
    "Feed generator for accounts followed by the operator. See /xrpc/app.bsky.feed.describeFeedGenerator."
}

async fn did_json(State(state): State<AppState>) -> Response {
    let service_did = state.registry.service_did();
    if !hosts_did_document(service_did, &state.hostname) {
        return StatusCode::NOT_FOUND.into_response();
    }

    Json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": service_did,
        "service": [
            {
                "id": "#bsky_fg",
                "type": "BskyFeedGenerator",
                "serviceEndpoint": format!("https://{}", state.hostname),
            }
        ]
    }))
    .into_response()
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub uri: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratorDescription {
    pub did: String,
    pub feeds: Vec<FeedDescriptor>,
}

async fn describe_feed_generator(State(state): State<AppState>) -> Json<GeneratorDescription> {
    Json(GeneratorDescription {
        did: state.registry.service_did().to_string(),
        feeds: state
            .registry
            .list_feeds()
            .into_iter()
            .map(|uri| FeedDescriptor { uri })
            .collect(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SkeletonParams {
    pub feed: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

fn unsupported_algorithm() -> Response {
    (StatusCode::BAD_REQUEST, "Unsupported algorithm").into_response()
}

/// Runs the requested algorithm, or the error response to send instead.
async fn query_feed(state: &AppState, params: &SkeletonParams) -> Result<FeedSkeleton, Response> {
    let feed = params.feed.as_deref().unwrap_or_default();
    let algo = state.registry.lookup(feed).ok_or_else(unsupported_algorithm)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    algo.query(&state.db, params.cursor.as_deref(), limit)
        .await
        .map_err(|err| {
            error!("feed query failed for {feed}: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Feed query failed").into_response()
        })
}

async fn get_feed_skeleton(
    State(state): State<AppState>,
    Query(params): Query<SkeletonParams>,
) -> Response {
    match query_feed(&state, &params).await {
        Ok(skeleton) => Json(skeleton).into_response(),
        Err(response) => response,
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DetailedFeed {
    pub posts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Same parameters as getFeedSkeleton; the skeleton is hydrated into full
/// post views through the operator's session for previewing in a browser.
async fn get_feed_with_details(
    State(state): State<AppState>,
    Query(params): Query<SkeletonParams>,
) -> Response {
    let skeleton = match query_feed(&state, &params).await {
        Ok(skeleton) => skeleton,
        Err(response) => return response,
    };

    let uris: Vec<String> = skeleton.feed.into_iter().map(|item| item.post).collect();
    if uris.is_empty() {
        return Json(DetailedFeed {
            posts: Vec::new(),
            cursor: skeleton.cursor,
        })
        .into_response();
    }

    let Some(graph) = state.graph.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Post hydration unavailable").into_response();
    };

    match graph.get_posts(&uris).await {
        Ok(posts) => Json(DetailedFeed {
            posts,
            cursor: skeleton.cursor,
        })
        .into_response(),
        Err(err) => {
            error!("fetching details for {} posts failed: {err}", uris.len());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error fetching post details: {err}"),
            )
                .into_response()
        }
    }
}
