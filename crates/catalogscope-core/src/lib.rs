pub mod adapter;
pub mod cache;
pub mod codec;
pub mod error;
pub mod flight;
pub mod fqn;
pub mod service;
pub mod transport;
pub mod types;

// Re-export main types and functions
pub use adapter::{
    AdapterConfig, CatalogAdapter, CatalogSnapshot, InMemoryAdapter, OpenMetadataAdapter,
};
pub use cache::{CacheBackend, CacheEntry, CacheStore, KeyPattern, MemoryCacheBackend};
pub use codec::{EntityKind, IdCodec};
pub use error::{CacheError, CatalogError, CatalogResult, CodecError, ErrorKind};
pub use flight::SingleFlight;
pub use service::{CacheTtls, CachedCatalogService, ServiceConfig};
pub use transport::{RetryPolicy, RetryingTransport, Transport, TransportError, UpstreamResponse};

// Re-export types explicitly
pub use types::{
    CatalogSearchHit, ColumnDetail, ColumnSummary, DatasetSummary, DatasourceSummary,
    LineageDirection, LineageEdge, LineageGraph, LineageNode, TableDetail, TableSummary,
};
