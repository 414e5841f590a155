//! Domain events and the async mirror listener
//!
//! Friendship create/delete and interaction events flow through an mpsc
//! bus into [`MirrorListener`], which mirrors them into Redis with bounded
//! retry. When retry is exhausted the listener itself produces the DLQ
//! row, carrying the original event id, so no event is silently lost.
//!
//! The anonymous-author and self-interaction guards live here, in the
//! listener, not in the score store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::INTERACTION_SCORE_STEP;
use crate::dlq::{DlqStore, FriendEventDlq};
use crate::errors::{EngineError, Result};
use crate::metrics::DLQ_ENQUEUED_TOTAL;
use crate::mirror::{FriendshipMirror, MirrorOp};

/// Where a qualifying interaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    PostLike,
    CommentCreate,
    CommentLike,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostLike => "post_like",
            Self::CommentCreate => "comment_create",
            Self::CommentLike => "comment_like",
        }
    }
}

/// Domain events consumed by the mirror pipeline.
#[derive(Debug, Clone)]
pub enum FriendEvent {
    FriendshipCreated {
        member_id: i64,
        friend_id: i64,
    },
    FriendshipRemoved {
        member_id: i64,
        friend_id: i64,
    },
    /// Author/actor ids are nullable: anonymous content never scores.
    Interaction {
        kind: InteractionKind,
        author_id: Option<i64>,
        actor_id: Option<i64>,
    },
}

/// Event envelope; the id doubles as the ScoreUp idempotency key.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: FriendEvent,
}

/// Publisher half of the event pipeline.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn publish(&self, event: FriendEvent) -> Result<Uuid> {
        let envelope = EngineEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        };
        let event_id = envelope.event_id;
        self.tx
            .send(envelope)
            .await
            .map_err(|_| EngineError::InvalidEvent {
                reason: "event listener has shut down".to_string(),
            })?;
        Ok(event_id)
    }
}

/// Consumes domain events and reconciles the Redis mirror.
pub struct MirrorListener {
    mirror: FriendshipMirror,
    dlq: Arc<DlqStore>,
}

impl MirrorListener {
    pub fn new(mirror: FriendshipMirror, dlq: Arc<DlqStore>) -> Self {
        Self { mirror, dlq }
    }

    /// Map an event to its mirror operation; `None` when a guard skips it.
    fn op_for(event: &EngineEvent) -> Option<MirrorOp> {
        match &event.event {
            FriendEvent::FriendshipCreated {
                member_id,
                friend_id,
            } => Some(MirrorOp::FriendAdd {
                member_id: *member_id,
                friend_id: *friend_id,
            }),
            FriendEvent::FriendshipRemoved {
                member_id,
                friend_id,
            } => Some(MirrorOp::FriendRemove {
                member_id: *member_id,
                friend_id: *friend_id,
            }),
            FriendEvent::Interaction {
                kind,
                author_id,
                actor_id,
            } => match (*author_id, *actor_id) {
                (Some(author), Some(actor)) if author != actor => Some(MirrorOp::ScoreUp {
                    member_id: author,
                    target_id: actor,
                    amount: INTERACTION_SCORE_STEP,
                    event_id: event.event_id,
                }),
                (Some(author), Some(_)) => {
                    debug!(
                        kind = kind.as_str(),
                        member_id = author,
                        "self-interaction, no score"
                    );
                    None
                }
                _ => {
                    debug!(kind = kind.as_str(), "anonymous interaction, no score");
                    None
                }
            },
        }
    }

    /// Mirror one event; dead-letter it when retry is exhausted.
    pub async fn handle(&self, event: EngineEvent) {
        let Some(op) = Self::op_for(&event) else {
            return;
        };

        if let Err(e) = self.mirror.apply_with_retry(&op).await {
            warn!(
                event_id = %event.event_id,
                op = op.kind(),
                error = %e,
                "mirror apply exhausted retries, dead-lettering"
            );
            let row = FriendEventDlq::from_op(event.event_id, &op, &e.to_string());
            match self.dlq.insert(&row) {
                Ok(()) => {
                    DLQ_ENQUEUED_TOTAL
                        .with_label_values(&[row.event_type.as_str()])
                        .inc();
                }
                Err(insert_err) => {
                    tracing::error!(
                        event_id = %event.event_id,
                        error = %insert_err,
                        "failed to dead-letter event; event lost"
                    );
                }
            }
        }
    }

    /// Listener loop until the bus closes or shutdown is signalled.
    pub async fn run(self, mut rx: mpsc::Receiver<EngineEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("mirror listener started");
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("mirror listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event: FriendEvent) -> EngineEvent {
        EngineEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }

    #[test]
    fn test_friendship_events_always_map() {
        let ev = envelope(FriendEvent::FriendshipCreated {
            member_id: 1,
            friend_id: 2,
        });
        assert!(matches!(
            MirrorListener::op_for(&ev),
            Some(MirrorOp::FriendAdd {
                member_id: 1,
                friend_id: 2
            })
        ));
    }

    #[test]
    fn test_anonymous_interaction_is_skipped() {
        let ev = envelope(FriendEvent::Interaction {
            kind: InteractionKind::PostLike,
            author_id: None,
            actor_id: Some(2),
        });
        assert!(MirrorListener::op_for(&ev).is_none());

        let ev = envelope(FriendEvent::Interaction {
            kind: InteractionKind::CommentLike,
            author_id: Some(1),
            actor_id: None,
        });
        assert!(MirrorListener::op_for(&ev).is_none());
    }

    #[test]
    fn test_self_interaction_is_skipped() {
        let ev = envelope(FriendEvent::Interaction {
            kind: InteractionKind::CommentCreate,
            author_id: Some(7),
            actor_id: Some(7),
        });
        assert!(MirrorListener::op_for(&ev).is_none());
    }

    #[test]
    fn test_qualifying_interaction_scores_with_event_id() {
        let ev = envelope(FriendEvent::Interaction {
            kind: InteractionKind::PostLike,
            author_id: Some(1),
            actor_id: Some(2),
        });
        match MirrorListener::op_for(&ev) {
            Some(MirrorOp::ScoreUp {
                member_id,
                target_id,
                amount,
                event_id,
            }) => {
                assert_eq!(member_id, 1);
                assert_eq!(target_id, 2);
                assert_eq!(amount, INTERACTION_SCORE_STEP);
                assert_eq!(event_id, ev.event_id);
            }
            other => panic!("expected ScoreUp, got {other:?}"),
        }
    }
}
