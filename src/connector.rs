//! Affinity-aware failover across a cluster's candidate servers.
//!
//! A resolution reads the cluster's affinity hint, orders the candidates,
//! and dials them one at a time. Each candidate gets `max_attempts` dials
//! with a linear backoff of `attempt * delay_factor` between them before the
//! next candidate is tried. When the winning server differs from the hint,
//! the affinity cache is updated in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::affinity::AffinityCache;
use crate::catalog::CredentialCatalog;
use crate::dialer::{DialError, Dialer};
use crate::error::{Error, Result};
use crate::strategies::affinity::AffinityStrategy;
use crate::strategies::strategy::OrderingStrategy;
use crate::types::{CandidateSet, ClusterId, ResolvedServer, ServerId, SiteContext};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY_FACTOR: Duration = Duration::from_millis(500);

/// Per-candidate retry budget and the optional overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Dials per candidate before failing over. At least 1.
    pub max_attempts: u32,
    /// Backoff after failed attempt `n` is `n * delay_factor`.
    pub delay_factor: Duration,
    /// Caps a whole resolution, backoffs included.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_factor: DEFAULT_DELAY_FACTOR,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_factor: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), delay_factor, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sleep before retrying after failed attempt `attempt` (1-indexed), or
    /// `None` after the final attempt.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.delay_factor * attempt)
    }

    /// Total sleep spent on a candidate that fails every attempt.
    pub fn exhausted_candidate_delay(&self) -> Duration {
        (1..self.max_attempts).map(|attempt| self.delay_factor * attempt).sum()
    }
}

pub struct FailoverConnector {
    affinity: AffinityCache,
    strategy: Arc<dyn OrderingStrategy>,
    policy: RetryPolicy,
}

impl FailoverConnector {
    pub fn new(affinity: AffinityCache, policy: RetryPolicy) -> Self {
        Self { affinity, strategy: Arc::new(AffinityStrategy::new()), policy }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn OrderingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn affinity(&self) -> &AffinityCache {
        &self.affinity
    }

    /// Looks up `database` in the catalog and resolves its cluster.
    ///
    /// A catalog miss fails with [`Error::NotFound`] before anything is dialed.
    pub async fn resolve_database<C, D>(
        &self,
        catalog: &C,
        site: &SiteContext,
        database: &str,
        dialer: &D,
    ) -> Result<ResolvedServer>
    where
        C: CredentialCatalog + ?Sized,
        D: Dialer + ?Sized,
    {
        let entry = catalog.lookup(site, database).await?;
        self.resolve(&entry.candidates, &entry.cluster_id, dialer).await
    }

    /// Picks the first reachable candidate of `cluster`.
    pub async fn resolve<D>(
        &self,
        candidates: &CandidateSet,
        cluster: &ClusterId,
        dialer: &D,
    ) -> Result<ResolvedServer>
    where
        D: Dialer + ?Sized,
    {
        let (server, _connection) = self.connect(candidates, cluster, dialer).await?;
        Ok(server)
    }

    /// Like [`resolve`](Self::resolve) but hands back the open connection.
    pub async fn connect<D>(
        &self,
        candidates: &CandidateSet,
        cluster: &ClusterId,
        dialer: &D,
    ) -> Result<(ResolvedServer, D::Connection)>
    where
        D: Dialer + ?Sized,
    {
        self.connect_with_cancellation(candidates, cluster, dialer, &CancellationToken::new()).await
    }

    /// Runs a resolution that stops with [`Error::Cancelled`] as soon as
    /// `token` fires, whether mid-dial or mid-backoff.
    pub async fn connect_with_cancellation<D>(
        &self,
        candidates: &CandidateSet,
        cluster: &ClusterId,
        dialer: &D,
        token: &CancellationToken,
    ) -> Result<(ResolvedServer, D::Connection)>
    where
        D: Dialer + ?Sized,
    {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let deadline = self.policy.deadline.map(|d| Instant::now() + d);

        let hint = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            hint = self.affinity.get(cluster) => hint,
        };

        let order = self.strategy.order(candidates, hint.as_ref());
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error: Option<DialError> = None;

        'candidates: for candidate in &order {
            for attempt in 1..=max_attempts {
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(Error::Cancelled),
                    () = deadline_elapsed(deadline) => {
                        last_error = Some(DialError::DeadlineElapsed);
                        break 'candidates;
                    }
                    outcome = dialer.dial(&candidate.url) => outcome,
                };

                let err = match outcome {
                    Ok(connection) => {
                        let server = ResolvedServer::from_candidate(candidate);
                        self.remember(cluster, hint.as_ref(), &server.id);
                        return Ok((server, connection));
                    }
                    Err(err) => err,
                };

                if let Some(backoff) = self.policy.backoff(attempt) {
                    debug!(
                        cluster = %cluster,
                        server = %candidate.id,
                        attempt,
                        backoff = ?backoff,
                        error = %err,
                        "connection attempt failed, retrying after backoff"
                    );
                    last_error = Some(err);

                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(Error::Cancelled),
                        () = deadline_elapsed(deadline) => {
                            last_error = Some(DialError::DeadlineElapsed);
                            break 'candidates;
                        }
                        () = tokio::time::sleep(backoff) => {}
                    }
                } else {
                    warn!(
                        cluster = %cluster,
                        server = %candidate.id,
                        attempts = max_attempts,
                        error = %err,
                        "connection failed after all attempts, failing over"
                    );
                    last_error = Some(err);
                }
            }
        }

        error!(
            cluster = %cluster,
            candidates = order.len(),
            "failed to connect to any database server"
        );
        Err(Error::ConnectionExhausted { cluster: cluster.clone(), candidates: order.len(), last_error })
    }

    /// Writes the winner back unless the hint already named it.
    fn remember(&self, cluster: &ClusterId, hint: Option<&ServerId>, resolved: &ServerId) {
        if hint == Some(resolved) {
            return;
        }

        match hint {
            Some(previous) => {
                info!(cluster = %cluster, previous = %previous, server = %resolved, "active server changed")
            }
            None => info!(cluster = %cluster, server = %resolved, "recording active server"),
        }
        // detached; the outcome is only logged
        let _ = self.affinity.set(cluster, resolved);
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
