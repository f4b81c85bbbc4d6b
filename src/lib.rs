pub mod affinity;
pub mod catalog;
pub mod config;
pub mod connector;
pub mod dialer;
pub mod error;
pub mod site;
pub mod strategies;
pub mod types;
pub mod url;

pub use affinity::{AffinityCache, AffinityLookup, AffinityUpdater};
pub use catalog::{CatalogEntry, CredentialCatalog, FileCatalog, StaticCatalog};
pub use config::Config;
pub use connector::{FailoverConnector, RetryPolicy};
pub use dialer::{DialError, Dialer, TcpDialer};
pub use error::{Error, Result};
pub use site::mysql_port;
pub use strategies::strategy::OrderingStrategy;
pub use types::{Candidate, CandidateSet, ClusterId, ResolvedServer, ServerId, SiteContext};
pub use url::ConnectionUrl;
