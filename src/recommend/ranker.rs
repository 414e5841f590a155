//! Recommendation ranker
//!
//! Turns degree-calculator candidates into ranked, annotated records.
//! Two-phase construction: the candidate skeletons already carry ids and
//! flags; one batched directory lookup resolves every candidate and
//! acquaintance name at once, then the introduce text is computed.
//!
//! Final order: base score + interaction score descending, member id
//! ascending as the deterministic tiebreak.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::errors::Result;
use crate::members::MemberDirectory;
use crate::recommend::degree::Candidate;

/// One ranked recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendedFriend {
    pub friend_member_id: i64,
    pub member_name: String,
    /// 2 = friend-of-friend, 3 = extended network.
    pub depth: u8,
    pub acquaintance_id: Option<i64>,
    pub acquaintance_name: Option<String>,
    pub many_acquaintance: bool,
    /// Korean acquaintance text; always `None` at depth 3.
    pub introduce: Option<String>,
    pub score: f64,
}

/// Introduce-text rule. Depth 2 only; a missing acquaintance name yields
/// nothing.
pub fn introduce_text(depth: u8, acquaintance_name: Option<&str>, many: bool) -> Option<String> {
    if depth != 2 {
        return None;
    }
    let name = acquaintance_name?;
    if many {
        Some(format!("{name} 외 다수의 친구"))
    } else {
        Some(format!("{name}의 친구"))
    }
}

/// Build and rank the final records.
///
/// Candidates without a directory record (deleted members) are dropped.
pub fn rank(
    candidates: Vec<Candidate>,
    members: &MemberDirectory,
    interaction_scores: &HashMap<i64, f64>,
    limit: usize,
) -> Result<Vec<RecommendedFriend>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // One pass over the directory for every id this result can mention.
    let mut ids: Vec<i64> = candidates.iter().map(|c| c.member_id).collect();
    ids.extend(candidates.iter().filter_map(|c| c.acquaintance_id));
    ids.sort_unstable();
    ids.dedup();
    let names = members.names_of(&ids)?;

    let mut records = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(name) = names.get(&candidate.member_id) else {
            debug!(
                member_id = candidate.member_id,
                "candidate has no directory record, dropping"
            );
            continue;
        };
        let acquaintance_name = candidate
            .acquaintance_id
            .and_then(|id| names.get(&id).cloned());
        let introduce = introduce_text(
            candidate.degree,
            acquaintance_name.as_deref(),
            candidate.many_acquaintance,
        );
        let score = candidate.score
            + interaction_scores
                .get(&candidate.member_id)
                .copied()
                .unwrap_or(0.0);

        records.push(RecommendedFriend {
            friend_member_id: candidate.member_id,
            member_name: name.clone(),
            depth: candidate.degree,
            acquaintance_id: candidate.acquaintance_id,
            acquaintance_name,
            many_acquaintance: candidate.many_acquaintance,
            introduce,
            score,
        });
    }

    records.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.friend_member_id.cmp(&b.friend_member_id))
    });
    records.truncate(limit);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introduce_single_acquaintance() {
        assert_eq!(
            introduce_text(2, Some("Alice"), false),
            Some("Alice의 친구".to_string())
        );
    }

    #[test]
    fn test_introduce_many_acquaintances() {
        assert_eq!(
            introduce_text(2, Some("Alice"), true),
            Some("Alice 외 다수의 친구".to_string())
        );
    }

    #[test]
    fn test_introduce_depth_three_is_always_none() {
        assert_eq!(introduce_text(3, Some("Alice"), false), None);
        assert_eq!(introduce_text(3, Some("Alice"), true), None);
        assert_eq!(introduce_text(3, None, false), None);
    }

    #[test]
    fn test_introduce_missing_acquaintance_is_none() {
        assert_eq!(introduce_text(2, None, false), None);
        assert_eq!(introduce_text(2, None, true), None);
    }
}
