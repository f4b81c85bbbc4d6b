use crate::catalog::CatalogError;
use crate::dialer::DialError;
use crate::site::SiteError;
use crate::types::ClusterId;

/// Errors surfaced by a resolution.
///
/// Dial failures and affinity failures are absorbed inside the connector
/// and only appear here as the diagnostic payload of `ConnectionExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no database credentials for {database} on {site}.{stage}")]
    NotFound { site: String, stage: String, database: String },

    #[error("failed to connect to any of {candidates} servers in cluster {cluster}")]
    ConnectionExhausted {
        cluster: ClusterId,
        candidates: usize,
        #[source]
        last_error: Option<DialError>,
    },

    #[error("resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Catalog(CatalogError),

    #[error(transparent)]
    Site(#[from] SiteError),
}

impl From<CatalogError> for Error {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { site, stage, database } => {
                Error::NotFound { site, stage, database }
            }
            other => Error::Catalog(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
