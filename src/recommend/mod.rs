//! Friend recommendation: degree calculation plus ranking
//!
//! Read-only per-request computation over owned transient state; nothing
//! here touches shared mutable state, so requests run unsynchronized.

pub mod degree;
pub mod ranker;

pub use degree::{Candidate, RelationGraph};
pub use ranker::{introduce_text, rank, RecommendedFriend};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::errors::{EngineError, Result};
use crate::friendship::FriendshipStore;
use crate::interaction::InteractionScoreStore;
use crate::members::MemberDirectory;
use crate::metrics::{RECOMMEND_DURATION, RECOMMEND_TOTAL, Timer};

/// Orchestrates edge collection, degree calculation, score lookup and
/// ranking. Stores are passed in as explicit handles.
pub struct FriendRecommender {
    friendships: Arc<FriendshipStore>,
    members: Arc<MemberDirectory>,
    scores: InteractionScoreStore,
}

impl FriendRecommender {
    pub fn new(
        friendships: Arc<FriendshipStore>,
        members: Arc<MemberDirectory>,
        scores: InteractionScoreStore,
    ) -> Self {
        Self {
            friendships,
            members,
            scores,
        }
    }

    /// Walk the ≤3-hop neighborhood of `ego` and build the relation state.
    ///
    /// Second-degree edges feed `create_second_relation`; the edges of the
    /// resulting degree-2 candidates feed `update_third_relation`, which
    /// must run after it.
    pub fn collect_relation(friendships: &FriendshipStore, ego: i64) -> Result<RelationGraph> {
        let first = friendships.friends_of(ego)?;

        let mut second: HashMap<i64, Vec<i64>> = HashMap::with_capacity(first.len());
        for &friend in &first {
            second.insert(friend, friendships.friends_of(friend)?);
        }
        let mut graph = RelationGraph::create_second_relation(ego, &first, &second);

        let second_ids = graph.second_degree_ids();
        let mut third: HashMap<i64, Vec<i64>> = HashMap::with_capacity(second_ids.len());
        for candidate in second_ids {
            third.insert(candidate, friendships.friends_of(candidate)?);
        }
        graph.update_third_relation(&third);

        Ok(graph)
    }

    /// Compute ranked recommendations for a member.
    ///
    /// Insufficient graph data degrades to an empty result; an unreachable
    /// score store degrades to ranking on base scores alone.
    pub async fn recommend(&self, ego: i64, limit: usize) -> Result<Vec<RecommendedFriend>> {
        let _timer = Timer::new(RECOMMEND_DURATION.clone());

        let friendships = self.friendships.clone();
        let graph = tokio::task::spawn_blocking(move || Self::collect_relation(&friendships, ego))
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;
        let graph = match graph {
            Ok(graph) => graph,
            Err(e) => {
                RECOMMEND_TOTAL.with_label_values(&["error"]).inc();
                return Err(e);
            }
        };

        let candidates = graph.candidates();
        if candidates.is_empty() {
            RECOMMEND_TOTAL.with_label_values(&["ok"]).inc();
            return Ok(Vec::new());
        }

        let candidate_ids: Vec<i64> = candidates.iter().map(|c| c.member_id).collect();
        let interaction = match self.scores.scores_for(ego, &candidate_ids).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "interaction scores unavailable, ranking on base scores");
                HashMap::new()
            }
        };

        let members = self.members.clone();
        let records = tokio::task::spawn_blocking(move || {
            rank(candidates, &members, &interaction, limit)
        })
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;

        match &records {
            Ok(_) => RECOMMEND_TOTAL.with_label_values(&["ok"]).inc(),
            Err(_) => RECOMMEND_TOTAL.with_label_values(&["error"]).inc(),
        }
        records
    }
}
