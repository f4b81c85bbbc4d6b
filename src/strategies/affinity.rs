use super::strategy::OrderingStrategy;
use crate::types::{Candidate, CandidateSet, ServerId};

/// Rank order with the sticky server promoted to the front.
///
/// Candidates are stable-sorted ascending by rank, so equal ranks keep
/// catalog order. A hint naming a candidate in the set moves that one
/// candidate to position 0; a stale hint is ignored.
pub struct AffinityStrategy;

impl AffinityStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AffinityStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderingStrategy for AffinityStrategy {
    fn order(&self, candidates: &CandidateSet, hint: Option<&ServerId>) -> Vec<Candidate> {
        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        // sort_by_key is stable
        ordered.sort_by_key(|c| c.rank);

        if let Some(hint) = hint {
            if let Some(pos) = ordered.iter().position(|c| &c.id == hint) {
                let preferred = ordered.remove(pos);
                ordered.insert(0, preferred);
            }
        }

        ordered.into_iter().cloned().collect()
    }
}
