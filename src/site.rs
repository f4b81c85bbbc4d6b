//! Which site and stage this process serves, and which port MySQL listens on.

use std::path::{Path, PathBuf};

use crate::types::SiteContext;

pub const MYSQL_PORT: u16 = 3306;
/// Port of the query-analyzing proxy, when one is enabled for the account.
pub const QUERY_ANALYZER_PORT: u16 = 6446;

pub const DEFAULT_SITE_PHP_ROOT: &str = "/var/www/site-php";
pub const DEFAULT_QUERY_ANALYZER_ROOT: &str = "/mnt/tmp";

const STAGE_FILE: &str = "ah-site-stage";
const QUERY_ANALYZER_FLAG: &str = "ah-query-analyzer";
const DOCROOT_PREFIXES: [&str; 2] = ["/var/www/html/", "/mnt/www/html/"];

#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("document root not found")]
    DocrootMissing,

    #[error("document root {0} is not a hosted site path")]
    DocrootNotRecognized(PathBuf),

    #[error("failed to read site stage from {}: {source}", path.display())]
    StageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("site stage file {} is empty", path.display())]
    StageEmpty { path: PathBuf },
}

/// Picks the document root from the hosting environment.
///
/// Site group and environment win over an explicit document root.
pub fn docroot_from(
    site_group: Option<&str>,
    site_environment: Option<&str>,
    document_root: Option<&str>,
) -> Result<PathBuf, SiteError> {
    match (site_group, site_environment) {
        (Some(group), Some(env)) if !group.is_empty() && !env.is_empty() => {
            return Ok(PathBuf::from(format!("/var/www/html/{group}.{env}/docroot")));
        }
        _ => {}
    }

    match document_root {
        Some(root) if !root.is_empty() => Ok(PathBuf::from(root)),
        _ => Err(SiteError::DocrootMissing),
    }
}

/// Extracts the site name from a docroot like `/var/www/html/<site>/docroot`.
pub fn site_name_from_docroot(docroot: &Path) -> Option<String> {
    let path = docroot.to_str()?;
    let lower = path.to_ascii_lowercase();

    DOCROOT_PREFIXES.iter().find_map(|prefix| {
        let start = lower.find(prefix)? + prefix.len();
        let rest = &path[start..];
        // the site segment must be followed by another path component
        let end = rest.find('/')?;
        let name = &rest[..end];

        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        valid.then(|| name.to_string())
    })
}

impl SiteContext {
    /// Resolves site and stage for a docroot, reading the stage from
    /// `<site_php_root>/<site>/ah-site-stage`.
    pub async fn from_docroot(docroot: &Path, site_php_root: &Path) -> Result<Self, SiteError> {
        let site = site_name_from_docroot(docroot)
            .ok_or_else(|| SiteError::DocrootNotRecognized(docroot.to_path_buf()))?;

        let path = site_php_root.join(&site).join(STAGE_FILE);
        let stage = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SiteError::StageRead { path: path.clone(), source })?;

        let stage = stage.trim();
        if stage.is_empty() {
            return Err(SiteError::StageEmpty { path });
        }

        Ok(SiteContext::new(site, stage))
    }
}

pub fn mysql_port(has_query_analyzer: bool) -> u16 {
    if has_query_analyzer {
        QUERY_ANALYZER_PORT
    } else {
        MYSQL_PORT
    }
}

/// Whether the query analyzer flag file exists for `account`.
pub async fn query_analyzer_enabled(root: &Path, account: &str) -> bool {
    let flag = root.join(account).join(QUERY_ANALYZER_FLAG);
    tokio::fs::try_exists(&flag).await.unwrap_or(false)
}
