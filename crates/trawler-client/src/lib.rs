pub mod anonymize;
pub mod blob;
pub mod extractors;
mod http;
pub mod proxy_provider;
pub mod solver;
pub mod stealth;

#[cfg(feature = "browser")]
pub mod browser;
#[cfg(feature = "browser")]
mod page;

pub use anonymize::ProxyFront;
pub use blob::{AnyBlobStore, FsBlobStore, S3BlobStore};
pub use extractors::{GENERIC_SOURCE, PageSnapshotExtractor};
pub use proxy_provider::{AnyProxyProvider, HttpProxyProvider, StaticProxyProvider};
pub use solver::RemoteSolver;

#[cfg(feature = "browser")]
pub use browser::{ChromeLauncher, ChromeSession};
#[cfg(feature = "browser")]
pub use page::ChromePage;
