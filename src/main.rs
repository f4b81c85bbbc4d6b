use std::path::Path;
use std::sync::Arc;

use replica_failover::affinity::{CommandAffinityUpdater, DnsAffinityLookup};
use replica_failover::site::{docroot_from, mysql_port, query_analyzer_enabled};
use replica_failover::{
    AffinityCache, Config, FailoverConnector, FileCatalog, ResolvedServer, SiteContext, TcpDialer,
};

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  replica-failover <database>");
    eprintln!();
    eprintln!("Resolves the active server for a database and prints it as JSON.");
    eprintln!();
    eprintln!("Site detection:");
    eprintln!("  AH_SITE_GROUP, AH_SITE_ENVIRONMENT  - site group and environment");
    eprintln!("  DOCUMENT_ROOT                      - used when the above are unset");
    eprintln!();
    eprintln!("Settings (REPLICA_FAILOVER_ prefix):");
    eprintln!("  MAX_ATTEMPTS, DELAY_FACTOR_MS, DEADLINE_MS, DIAL_TIMEOUT_MS");
    eprintln!("  DNS_SERVERS, DNS_PORT, DNS_SERVICE, DNS_TIMEOUT_MS, DNS_ATTEMPTS, LOOKUP_TIMEOUT_MS");
    eprintln!("  UPDATE_COMMAND, UPDATE_TIMEOUT_MS, CATALOG_ROOT, QUERY_ANALYZER_ROOT");
}

/// Detects the site from the hosting environment and resolves `database`.
async fn run(config: &Config, database: &str) -> replica_failover::Result<ResolvedServer> {
    let site_group = std::env::var("AH_SITE_GROUP").ok();
    let docroot = docroot_from(
        site_group.as_deref(),
        std::env::var("AH_SITE_ENVIRONMENT").ok().as_deref(),
        std::env::var("DOCUMENT_ROOT").ok().as_deref(),
    )?;
    let site = SiteContext::from_docroot(&docroot, &config.catalog_root).await?;
    tracing::debug!(site = %site, docroot = %docroot.display(), "detected site");

    let account = site_group.unwrap_or_else(|| site.site.clone());
    let port = mysql_port(query_analyzer_enabled(Path::new(&config.query_analyzer_root), &account).await);
    let catalog = FileCatalog::new(&config.catalog_root).with_default_port(port);

    let updater = CommandAffinityUpdater::from_command_line(&config.update_command)
        .unwrap_or_default()
        .with_timeout(config.update_timeout);
    let affinity = AffinityCache::new(
        Arc::new(DnsAffinityLookup::new(config.dns.clone())),
        Arc::new(updater),
    )
    .with_lookup_timeout(config.lookup_timeout);

    let connector = FailoverConnector::new(affinity, config.retry);
    let dialer = TcpDialer::new(config.dial_timeout);

    let resolved = connector.resolve_database(&catalog, &site, database, &dialer).await;

    // the affinity update runs detached; keep the runtime up until it is done
    connector.affinity().wait_pending().await;

    resolved
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(database) = std::env::args().nth(1) else {
        print_usage();
        std::process::exit(2);
    };

    let config = Config::from_env();
    let server = run(&config, &database).await?;
    println!("{}", serde_json::to_string_pretty(&server)?);

    Ok(())
}
