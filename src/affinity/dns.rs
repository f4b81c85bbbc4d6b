//! Affinity lookup through DNS CNAME records.
//!
//! The record for cluster `N` is `cluster-N.<service>`; its CNAME target,
//! minus the trailing root dot, is the cached server id.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::Resolver;

use super::{AffinityError, AffinityLookup};
use crate::types::{ClusterId, ServerId};

pub const DEFAULT_DNS_SERVICE: &str = "mysql";
pub const DEFAULT_DNS_PORT: u16 = 53;
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_DNS_ATTEMPTS: usize = 1;

#[derive(Debug, Clone)]
pub struct DnsAffinityConfig {
    /// Queried over TCP, in order.
    pub nameservers: Vec<IpAddr>,
    pub port: u16,
    /// Suffix of the record name, e.g. `mysql` in `cluster-12.mysql`.
    pub service: String,
    pub timeout: Duration,
    pub attempts: usize,
}

impl Default for DnsAffinityConfig {
    fn default() -> Self {
        Self {
            nameservers: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            port: DEFAULT_DNS_PORT,
            service: DEFAULT_DNS_SERVICE.to_string(),
            timeout: DEFAULT_DNS_TIMEOUT,
            attempts: DEFAULT_DNS_ATTEMPTS,
        }
    }
}

impl DnsAffinityConfig {
    pub fn record_name(&self, cluster: &ClusterId) -> String {
        format!("cluster-{}.{}", cluster, self.service)
    }

    /// One TCP-only entry per configured nameserver.
    fn name_servers(&self) -> NameServerConfigGroup {
        self.nameservers
            .iter()
            .map(|ip| NameServerConfig::new(SocketAddr::new(*ip, self.port), Protocol::Tcp))
            .collect::<Vec<_>>()
            .into()
    }
}

pub struct DnsAffinityLookup {
    resolver: Resolver<TokioConnectionProvider>,
    config: DnsAffinityConfig,
}

impl DnsAffinityLookup {
    pub fn new(config: DnsAffinityConfig) -> Self {
        let resolver_config = ResolverConfig::from_parts(None, vec![], config.name_servers());

        let mut opts = ResolverOpts::default();
        opts.timeout = config.timeout;
        opts.attempts = config.attempts;

        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Self { resolver, config }
    }

    pub fn config(&self) -> &DnsAffinityConfig {
        &self.config
    }
}

#[async_trait]
impl AffinityLookup for DnsAffinityLookup {
    async fn lookup(&self, cluster: &ClusterId) -> Result<ServerId, AffinityError> {
        let record = self.config.record_name(cluster);

        let lookup = self
            .resolver
            .lookup(record.as_str(), RecordType::CNAME)
            .await
            .map_err(|e| AffinityError::Lookup { record: record.clone(), source: Box::new(e) })?;

        let target = lookup
            .iter()
            .find_map(|rdata| match rdata {
                RData::CNAME(cname) => Some(cname.0.to_string()),
                _ => None,
            })
            .ok_or_else(|| AffinityError::NoRecord { record: record.clone() })?;

        server_id_from_target(&record, &target)
    }
}

/// Strips the trailing root dot from a CNAME target, e.g. `ded-5.` to `ded-5`.
fn server_id_from_target(record: &str, target: &str) -> Result<ServerId, AffinityError> {
    let id = target.trim();
    let id = id.strip_suffix('.').unwrap_or(id);

    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(AffinityError::Malformed {
            record: record.to_string(),
            value: target.to_string(),
        });
    }

    Ok(ServerId::new(id))
}
