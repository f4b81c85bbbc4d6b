use crate::types::{Candidate, CandidateSet, ServerId};

/// Decides the order in which a cluster's candidates are dialed.
pub trait OrderingStrategy: Send + Sync {
    /// Returns every candidate exactly once, most preferred first.
    ///
    /// `hint` is the cluster's last known-good server; it may name an id
    /// that is no longer in `candidates`.
    fn order(&self, candidates: &CandidateSet, hint: Option<&ServerId>) -> Vec<Candidate>;
}
