//! chingu-graph engine binary
//!
//! Wires the stores, the Redis mirror, the event listener and the two
//! schedulers together, and exposes a thin HTTP surface: health, metrics,
//! event ingress and the recommendation read. Business controllers live
//! elsewhere; this process owns the reconciliation pipeline.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chingu_graph::config::EngineConfig;
use chingu_graph::dlq::{DlqReprocessor, DlqStore, RedisReplayTarget, ReprocessorConfig};
use chingu_graph::errors::EngineError;
use chingu_graph::events::{EventBus, FriendEvent, InteractionKind, MirrorListener};
use chingu_graph::friendship::FriendshipStore;
use chingu_graph::interaction::{run_nightly_decay, InteractionScoreStore};
use chingu_graph::members::MemberDirectory;
use chingu_graph::metrics;
use chingu_graph::mirror::{FriendshipMirror, MirrorPolicy};
use chingu_graph::recommend::{FriendRecommender, RecommendedFriend};

struct AppState {
    friendships: Arc<FriendshipStore>,
    members: Arc<MemberDirectory>,
    dlq: Arc<DlqStore>,
    bus: EventBus,
    recommender: FriendRecommender,
}

fn join_err(e: tokio::task::JoinError) -> EngineError {
    EngineError::Internal(anyhow::anyhow!(e))
}

async fn init_redis(redis_url: &str) -> Result<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(3)
        .set_connection_timeout(Some(Duration::from_secs(2)));

    let client = redis::Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🧭 Starting chingu-graph engine...");

    let config = EngineConfig::from_env();
    config.log();

    if let Err(e) = metrics::register_metrics() {
        warn!(error = %e, "metrics registration failed, continuing without");
    }

    std::fs::create_dir_all(&config.storage_path)?;
    let friendships = Arc::new(FriendshipStore::new(&config.storage_path.join("friendships"))?);
    info!("Friendship store initialized");
    let members = Arc::new(MemberDirectory::new(&config.storage_path.join("members"))?);
    info!("Member directory initialized");
    let dlq = Arc::new(DlqStore::new(&config.storage_path.join("dlq"))?);
    info!("DLQ store initialized");

    let redis = init_redis(&config.redis_url).await?;
    info!("Redis connection manager initialized");

    let mirror = FriendshipMirror::new(
        redis.clone(),
        MirrorPolicy {
            max_attempts: config.mirror_max_attempts,
            backoff_base_ms: config.mirror_backoff_base_ms,
        },
    );
    let scores = InteractionScoreStore::new(redis.clone(), config.interaction_decay_factor);
    let recommender = FriendRecommender::new(friendships.clone(), members.clone(), scores.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (bus, event_rx) = EventBus::new(config.event_queue_capacity);

    let listener = MirrorListener::new(mirror, dlq.clone());
    let listener_handle = tokio::spawn(listener.run(event_rx, shutdown_rx.clone()));

    let reprocessor = DlqReprocessor::new(
        dlq.clone(),
        RedisReplayTarget::new(redis.clone()),
        ReprocessorConfig {
            batch_size: config.drain_batch_size,
            max_retry: config.dlq_max_retry,
            ..ReprocessorConfig::default()
        },
    );
    let reprocessor_handle = tokio::spawn(reprocessor.run(config.drain_interval_secs, shutdown_rx.clone()));

    let decay_handle = tokio::spawn(run_nightly_decay(
        scores,
        config.decay_hour_utc,
        shutdown_rx.clone(),
    ));

    let state = Arc::new(AppState {
        friendships,
        members,
        dlq,
        bus,
        recommender,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/members", post(upsert_member))
        .route("/api/friends", post(add_friendship).delete(remove_friendship))
        .route("/api/interactions", post(record_interaction))
        .route("/api/recommendations/{member_id}", get(get_recommendations))
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Listening on {addr}");

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Shutdown signal received, stopping background tasks...");
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(Duration::from_secs(10), async {
        let _ = tokio::join!(listener_handle, reprocessor_handle, decay_handle);
    })
    .await
    .is_err()
    {
        warn!("background tasks did not stop within 10s, forcing exit");
    }

    info!("Flushing stores...");
    if let Err(e) = state.friendships.flush() {
        warn!(error = %e, "friendship store flush failed");
    }
    if let Err(e) = state.members.flush() {
        warn!(error = %e, "member directory flush failed");
    }
    if let Err(e) = state.dlq.flush() {
        warn!(error = %e, "DLQ store flush failed");
    }

    info!("👋 Engine shutdown complete");
    Ok(())
}

/// Handle graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, EngineError> {
    let dlq = state.dlq.clone();
    let stats = tokio::task::spawn_blocking(move || dlq.stats())
        .await
        .map_err(join_err)??;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "dlq_pending": stats.pending,
        "dlq_failed": stats.failed,
    })))
}

async fn metrics_endpoint() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = metrics::METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "metrics encoding failed");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[derive(Deserialize)]
struct MemberPayload {
    member_id: i64,
    name: String,
}

async fn upsert_member(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MemberPayload>,
) -> Result<StatusCode, EngineError> {
    let members = state.members.clone();
    tokio::task::spawn_blocking(move || members.upsert(payload.member_id, &payload.name))
        .await
        .map_err(join_err)??;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct FriendshipPayload {
    member_id: i64,
    friend_id: i64,
}

async fn add_friendship(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FriendshipPayload>,
) -> Result<StatusCode, EngineError> {
    let friendships = state.friendships.clone();
    tokio::task::spawn_blocking(move || {
        friendships.add_friendship(payload.member_id, payload.friend_id)
    })
    .await
    .map_err(join_err)??;

    // Commit first, then publish; the mirror catches up asynchronously.
    state
        .bus
        .publish(FriendEvent::FriendshipCreated {
            member_id: payload.member_id,
            friend_id: payload.friend_id,
        })
        .await?;

    Ok(StatusCode::CREATED)
}

async fn remove_friendship(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FriendshipPayload>,
) -> Result<StatusCode, EngineError> {
    let friendships = state.friendships.clone();
    tokio::task::spawn_blocking(move || {
        friendships.remove_friendship(payload.member_id, payload.friend_id)
    })
    .await
    .map_err(join_err)??;

    state
        .bus
        .publish(FriendEvent::FriendshipRemoved {
            member_id: payload.member_id,
            friend_id: payload.friend_id,
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct InteractionPayload {
    kind: String,
    author_id: Option<i64>,
    actor_id: Option<i64>,
}

async fn record_interaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InteractionPayload>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let kind = match payload.kind.as_str() {
        "post_like" => InteractionKind::PostLike,
        "comment_create" => InteractionKind::CommentCreate,
        "comment_like" => InteractionKind::CommentLike,
        other => {
            return Err(EngineError::InvalidEvent {
                reason: format!("unknown interaction kind '{other}'"),
            })
        }
    };

    let event_id = state
        .bus
        .publish(FriendEvent::Interaction {
            kind,
            author_id: payload.author_id,
            actor_id: payload.actor_id,
        })
        .await?;

    Ok(Json(serde_json::json!({ "event_id": event_id })))
}

#[derive(Deserialize)]
struct RecommendQuery {
    limit: Option<usize>,
}

async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i64>,
    Query(query): Query<RecommendQuery>,
) -> Result<Json<Vec<RecommendedFriend>>, EngineError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let records = state.recommender.recommend(member_id, limit).await?;
    Ok(Json(records))
}
