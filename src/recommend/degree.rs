//! Degree calculator: weighted union-find over the social graph
//!
//! BFS-style expansion from the ego combined with a disjoint set
//! (union-by-rank, path compression) over an integer-indexed arena. A
//! node's degree is its hop distance at first discovery and is never
//! downgraded. Rediscovery along another first-degree path accumulates
//! the base score and raises the many-acquaintance flag - the signal the
//! ranker collapses into "... 외 다수의 친구".
//!
//! `create_second_relation` builds the state with an empty third-degree
//! set; `update_third_relation` must run strictly afterwards because the
//! third-degree exclusion set depends on already-known 1st/2nd-degree
//! membership.

use std::collections::HashMap;

use crate::constants::{SECOND_DEGREE_BASE_SCORE, THIRD_DEGREE_BASE_SCORE};

/// One arena slot: disjoint-set bookkeeping plus degree/score state.
#[derive(Debug, Clone)]
struct Node {
    member_id: i64,
    parent: usize,
    rank: u32,
    /// 0 = ego, 1..=3 = social distance at first discovery.
    degree: u8,
    score: f64,
    /// First first-degree friend through which this candidate was found.
    acquaintance: Option<i64>,
    many_acquaintance: bool,
}

/// Candidate view handed to the ranker.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub member_id: i64,
    pub degree: u8,
    pub score: f64,
    pub acquaintance_id: Option<i64>,
    pub many_acquaintance: bool,
}

/// Transient per-request relation state. Rebuilt per request; nothing is
/// persisted.
pub struct RelationGraph {
    ego: i64,
    nodes: Vec<Node>,
    index: HashMap<i64, usize>,
}

impl RelationGraph {
    /// Build ego + first-degree + second-degree state.
    ///
    /// `second_degree` maps each first-degree friend to that friend's own
    /// friend list. An ego with zero friends yields an empty relation.
    pub fn create_second_relation(
        ego: i64,
        first_degree: &[i64],
        second_degree: &HashMap<i64, Vec<i64>>,
    ) -> Self {
        let mut graph = Self {
            ego,
            nodes: Vec::with_capacity(first_degree.len() + 1),
            index: HashMap::new(),
        };
        let ego_idx = graph.intern(ego, 0, 0.0, None);

        for &friend in first_degree {
            if friend == ego {
                continue;
            }
            let idx = graph.intern(friend, 1, 0.0, None);
            graph.union(ego_idx, idx);
        }

        for &friend in first_degree {
            let Some(reachable) = second_degree.get(&friend) else {
                continue;
            };
            let friend_idx = match graph.index.get(&friend) {
                Some(idx) => *idx,
                None => continue,
            };
            for &candidate in reachable {
                if candidate == ego {
                    continue;
                }
                match graph.index.get(&candidate).copied() {
                    Some(existing) => {
                        // Degree fixed at first discovery; a second path to
                        // a degree-2 candidate only accumulates weight.
                        if graph.nodes[existing].degree == 2 {
                            graph.add_score(existing, SECOND_DEGREE_BASE_SCORE);
                            graph.nodes[existing].many_acquaintance = true;
                        }
                    }
                    None => {
                        let idx =
                            graph.intern(candidate, 2, SECOND_DEGREE_BASE_SCORE, Some(friend));
                        graph.union(friend_idx, idx);
                    }
                }
            }
        }

        graph
    }

    /// Extend with third-degree candidates. Must run after second-degree
    /// computation: anything already interned (ego, friends, degree-2
    /// candidates) is excluded so existing relations are never
    /// re-recommended at a worse degree.
    ///
    /// `third_degree` maps each degree-2 candidate to its friend list.
    pub fn update_third_relation(&mut self, third_degree: &HashMap<i64, Vec<i64>>) {
        for (&via, reachable) in third_degree {
            let via_idx = match self.index.get(&via).copied() {
                Some(idx) if self.nodes[idx].degree == 2 => idx,
                _ => continue,
            };
            for &candidate in reachable {
                if candidate == self.ego {
                    continue;
                }
                match self.index.get(&candidate).copied() {
                    Some(existing) => {
                        if self.nodes[existing].degree == 3 {
                            self.add_score(existing, THIRD_DEGREE_BASE_SCORE);
                            self.nodes[existing].many_acquaintance = true;
                        }
                    }
                    None => {
                        // Extended network: no representative acquaintance.
                        let idx = self.intern(candidate, 3, THIRD_DEGREE_BASE_SCORE, None);
                        self.union(via_idx, idx);
                    }
                }
            }
        }
    }

    fn intern(&mut self, member_id: i64, degree: u8, score: f64, acquaintance: Option<i64>) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            member_id,
            parent: idx,
            rank: 0,
            degree,
            score,
            acquaintance,
            many_acquaintance: false,
        });
        self.index.insert(member_id, idx);
        idx
    }

    fn add_score(&mut self, idx: usize, amount: f64) {
        self.nodes[idx].score += amount;
    }

    /// Root of a node's component, compressing the path walked.
    fn find(&mut self, idx: usize) -> usize {
        let mut root = idx;
        while self.nodes[root].parent != root {
            root = self.nodes[root].parent;
        }
        let mut cursor = idx;
        while self.nodes[cursor].parent != root {
            let next = self.nodes[cursor].parent;
            self.nodes[cursor].parent = root;
            cursor = next;
        }
        root
    }

    /// Union by rank.
    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        if self.nodes[root_a].rank < self.nodes[root_b].rank {
            self.nodes[root_a].parent = root_b;
        } else if self.nodes[root_a].rank > self.nodes[root_b].rank {
            self.nodes[root_b].parent = root_a;
        } else {
            self.nodes[root_b].parent = root_a;
            self.nodes[root_a].rank += 1;
        }
    }

    /// Whether two members sit in the same reachability component.
    pub fn connected(&mut self, a: i64, b: i64) -> bool {
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            return false;
        };
        self.find(ia) == self.find(ib)
    }

    pub fn degree_of(&self, member_id: i64) -> Option<u8> {
        self.index.get(&member_id).map(|&idx| self.nodes[idx].degree)
    }

    /// Recommendation candidates (degree 2 and 3) in discovery order.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.nodes
            .iter()
            .filter(|node| node.degree >= 2)
            .map(|node| Candidate {
                member_id: node.member_id,
                degree: node.degree,
                score: node.score,
                acquaintance_id: node.acquaintance,
                many_acquaintance: node.many_acquaintance,
            })
            .collect()
    }

    /// Degree-2 member ids; the caller fetches their edges for
    /// `update_third_relation`.
    pub fn second_degree_ids(&self) -> Vec<i64> {
        self.nodes
            .iter()
            .filter(|node| node.degree == 2)
            .map(|node| node.member_id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        // Only the ego node means no relations at all.
        self.nodes.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(i64, &[i64])]) -> HashMap<i64, Vec<i64>> {
        pairs
            .iter()
            .map(|(id, friends)| (*id, friends.to_vec()))
            .collect()
    }

    #[test]
    fn test_empty_ego_yields_empty_relation() {
        let graph = RelationGraph::create_second_relation(1, &[], &HashMap::new());
        assert!(graph.is_empty());
        assert!(graph.candidates().is_empty());
    }

    #[test]
    fn test_first_degree_is_never_a_candidate() {
        let second = edges(&[(2, &[1, 3]), (3, &[1, 2])]);
        let graph = RelationGraph::create_second_relation(1, &[2, 3], &second);
        // 2 and 3 are direct friends of each other but already degree 1
        assert!(graph.candidates().is_empty());
        assert_eq!(graph.degree_of(2), Some(1));
        assert_eq!(graph.degree_of(3), Some(1));
    }

    #[test]
    fn test_shared_candidate_accumulates_and_flags() {
        // ego 1; friends 2, 3; both know 4
        let second = edges(&[(2, &[1, 4]), (3, &[1, 4])]);
        let graph = RelationGraph::create_second_relation(1, &[2, 3], &second);

        let candidates = graph.candidates();
        assert_eq!(candidates.len(), 1);
        let d = &candidates[0];
        assert_eq!(d.member_id, 4);
        assert_eq!(d.degree, 2);
        assert!(d.many_acquaintance);
        // first acquaintance encountered is retained
        assert_eq!(d.acquaintance_id, Some(2));
        assert_eq!(d.score, 2.0 * SECOND_DEGREE_BASE_SCORE);
    }

    #[test]
    fn test_third_degree_excludes_known_members() {
        // 1 - 2 - 4 - 5, and 4 also knows 2 and 1's friend 3
        let second = edges(&[(2, &[1, 4]), (3, &[1])]);
        let mut graph = RelationGraph::create_second_relation(1, &[2, 3], &second);

        let third = edges(&[(4, &[2, 3, 5, 1])]);
        graph.update_third_relation(&third);

        assert_eq!(graph.degree_of(2), Some(1)); // never downgraded
        assert_eq!(graph.degree_of(3), Some(1));
        assert_eq!(graph.degree_of(4), Some(2));
        assert_eq!(graph.degree_of(5), Some(3));

        let five = graph
            .candidates()
            .into_iter()
            .find(|c| c.member_id == 5)
            .unwrap();
        assert_eq!(five.acquaintance_id, None);
        assert_eq!(five.score, THIRD_DEGREE_BASE_SCORE);
    }

    #[test]
    fn test_degrees_stay_in_range() {
        let second = edges(&[(2, &[1, 4, 5]), (3, &[1, 5])]);
        let mut graph = RelationGraph::create_second_relation(1, &[2, 3], &second);
        let third = edges(&[(4, &[6, 7]), (5, &[6, 8])]);
        graph.update_third_relation(&third);

        for candidate in graph.candidates() {
            assert!(candidate.degree == 2 || candidate.degree == 3);
            // no degree-3 candidate is also a direct friend
            assert!(candidate.member_id != 2 && candidate.member_id != 3);
        }
        // rediscovered extended member accumulates
        let six = graph
            .candidates()
            .into_iter()
            .find(|c| c.member_id == 6)
            .unwrap();
        assert_eq!(six.degree, 3);
        assert_eq!(six.score, 2.0 * THIRD_DEGREE_BASE_SCORE);
    }

    #[test]
    fn test_components_are_connected_to_ego() {
        let second = edges(&[(2, &[1, 4])]);
        let mut graph = RelationGraph::create_second_relation(1, &[2], &second);
        let third = edges(&[(4, &[5])]);
        graph.update_third_relation(&third);

        assert!(graph.connected(1, 2));
        assert!(graph.connected(1, 4));
        assert!(graph.connected(1, 5));
        assert!(!graph.connected(1, 99));
    }

    #[test]
    fn test_ego_in_friend_lists_is_ignored() {
        // ego shows up in its friends' lists; must never become a candidate
        let second = edges(&[(2, &[1])]);
        let graph = RelationGraph::create_second_relation(1, &[2], &second);
        assert_eq!(graph.degree_of(1), Some(0));
        assert!(graph.candidates().is_empty());
    }
}
