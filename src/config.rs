use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::affinity::command::{DEFAULT_UPDATE_COMMAND, DEFAULT_UPDATE_TIMEOUT};
use crate::affinity::dns::DnsAffinityConfig;
use crate::affinity::DEFAULT_LOOKUP_TIMEOUT;
use crate::connector::RetryPolicy;
use crate::dialer::DEFAULT_DIAL_TIMEOUT;
use crate::site::{DEFAULT_QUERY_ANALYZER_ROOT, DEFAULT_SITE_PHP_ROOT};

const ENV_PREFIX: &str = "REPLICA_FAILOVER_";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub retry: RetryPolicy,
    pub dns: DnsAffinityConfig,
    pub lookup_timeout: Duration,
    /// Command line prefix; `cluster-<id> <server>` is appended.
    pub update_command: String,
    pub update_timeout: Duration,
    pub dial_timeout: Duration,
    /// Holds `<site>/ah-site-stage` and the credential files.
    pub catalog_root: PathBuf,
    pub query_analyzer_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            dns: DnsAffinityConfig::default(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            update_command: DEFAULT_UPDATE_COMMAND.to_string(),
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            catalog_root: PathBuf::from(DEFAULT_SITE_PHP_ROOT),
            query_analyzer_root: PathBuf::from(DEFAULT_QUERY_ANALYZER_ROOT),
        }
    }
}

impl Config {
    /// Reads `REPLICA_FAILOVER_*` variables; anything unset or unparsable keeps its default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parsed = |name: &str| var(name).and_then(|v| v.parse::<u64>().ok());
        let millis = |name: &str| parsed(name).map(Duration::from_millis);

        let defaults = Config::default();

        let mut retry = RetryPolicy::new(
            var("MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry.max_attempts),
            millis("DELAY_FACTOR_MS").unwrap_or(defaults.retry.delay_factor),
        );
        if let Some(deadline) = millis("DEADLINE_MS") {
            retry = retry.with_deadline(deadline);
        }

        let nameservers = var("DNS_SERVERS")
            .map(|v| parse_list::<IpAddr>(&v))
            .filter(|ips| !ips.is_empty())
            .unwrap_or(defaults.dns.nameservers);

        let dns = DnsAffinityConfig {
            nameservers,
            port: var("DNS_PORT").and_then(|v| v.parse().ok()).unwrap_or(defaults.dns.port),
            service: var("DNS_SERVICE").unwrap_or(defaults.dns.service),
            timeout: millis("DNS_TIMEOUT_MS").unwrap_or(defaults.dns.timeout),
            attempts: parsed("DNS_ATTEMPTS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.dns.attempts),
        };

        Config {
            retry,
            dns,
            lookup_timeout: millis("LOOKUP_TIMEOUT_MS").unwrap_or(defaults.lookup_timeout),
            update_command: var("UPDATE_COMMAND").unwrap_or(defaults.update_command),
            update_timeout: millis("UPDATE_TIMEOUT_MS").unwrap_or(defaults.update_timeout),
            dial_timeout: millis("DIAL_TIMEOUT_MS").unwrap_or(defaults.dial_timeout),
            catalog_root: var("CATALOG_ROOT").map(PathBuf::from).unwrap_or(defaults.catalog_root),
            query_analyzer_root: var("QUERY_ANALYZER_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.query_analyzer_root),
        }
    }
}

/// Comma-separated values; unparsable items are skipped.
fn parse_list<T: FromStr>(value: &str) -> Vec<T> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}
