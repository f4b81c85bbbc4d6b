//! Candidate sets per (site, stage, database).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::site::MYSQL_PORT;
use crate::types::{Candidate, CandidateSet, ClusterId, ServerId, SiteContext};
use crate::url::{ConnectionUrl, UrlError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("no credentials for database {database} on {site}.{stage}")]
    NotFound { site: String, stage: String, database: String },

    #[error("failed to read credentials from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credentials from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid url for server {server}: {source}")]
    InvalidUrl {
        server: ServerId,
        #[source]
        source: UrlError,
    },

    #[error("server {server} listed more than once")]
    DuplicateServer { server: ServerId },
}

impl CatalogError {
    fn not_found(site: &SiteContext, database: &str) -> Self {
        CatalogError::NotFound {
            site: site.site.clone(),
            stage: site.stage.clone(),
            database: database.to_string(),
        }
    }
}

/// The cluster behind a database name and its candidate servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub cluster_id: ClusterId,
    pub candidates: CandidateSet,
}

#[async_trait]
pub trait CredentialCatalog: Send + Sync {
    /// Candidates for `database` within exactly this site and stage.
    async fn lookup(&self, site: &SiteContext, database: &str) -> Result<CatalogEntry, CatalogError>;
}

/// Ids appear as JSON numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(u64),
    Text(String),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Number(n) => n.to_string(),
            IdRepr::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    cluster_id: IdRepr,
    #[serde(default)]
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    id: IdRepr,
    url: String,
    rank: Option<i64>,
}

/// Reads `<root>/<site>/<stage>-<database>-credentials.json`.
///
/// ```json
/// { "cluster_id": 1234,
///   "servers": [ { "id": "ded-1", "url": "mysqli://u:p@ded-1:3306/db", "rank": 0 } ] }
/// ```
///
/// A server without `rank` ranks by its position in the list. Urls without
/// a port get `default_port`.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    root: PathBuf,
    default_port: u16,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), default_port: MYSQL_PORT }
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn path_for(&self, site: &SiteContext, database: &str) -> PathBuf {
        self.root
            .join(&site.site)
            .join(format!("{}-{}-credentials.json", site.stage, database))
    }

    fn parse(&self, path: &Path, content: &str) -> Result<CatalogEntry, CatalogError> {
        let file: CredentialsFile = serde_json::from_str(content)
            .map_err(|source| CatalogError::Parse { path: path.to_path_buf(), source })?;

        let mut candidates = CandidateSet::new();
        for (position, entry) in file.servers.into_iter().enumerate() {
            let id = ServerId::new(String::from(entry.id));
            let url = ConnectionUrl::parse_with_default_port(&entry.url, self.default_port)
                .map_err(|source| CatalogError::InvalidUrl { server: id.clone(), source })?;
            let rank = entry.rank.unwrap_or(position as i64);

            candidates
                .insert(Candidate::new(id, rank, url))
                .map_err(|dup| CatalogError::DuplicateServer { server: dup.id })?;
        }

        Ok(CatalogEntry { cluster_id: ClusterId::new(String::from(file.cluster_id)), candidates })
    }
}

#[async_trait]
impl CredentialCatalog for FileCatalog {
    async fn lookup(&self, site: &SiteContext, database: &str) -> Result<CatalogEntry, CatalogError> {
        let path = self.path_for(site, database);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "credentials file missing");
                return Err(CatalogError::not_found(site, database));
            }
            Err(source) => return Err(CatalogError::Read { path, source }),
        };

        let entry = self.parse(&path, &content)?;
        if entry.candidates.is_empty() {
            return Err(CatalogError::not_found(site, database));
        }

        debug!(
            path = %path.display(),
            cluster = %entry.cluster_id,
            candidates = entry.candidates.len(),
            "loaded credentials"
        );
        Ok(entry)
    }
}

/// Catalog held in memory, keyed by site, stage and database.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<(SiteContext, String), CatalogEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, site: SiteContext, database: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert((site, database.into()), entry);
    }
}

#[async_trait]
impl CredentialCatalog for StaticCatalog {
    async fn lookup(&self, site: &SiteContext, database: &str) -> Result<CatalogEntry, CatalogError> {
        self.entries
            .get(&(site.clone(), database.to_string()))
            .filter(|entry| !entry.candidates.is_empty())
            .cloned()
            .ok_or_else(|| CatalogError::not_found(site, database))
    }
}
