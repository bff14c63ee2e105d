//! Pinecone-compatible, namespace-sharded indexes on top of lantern
//! collections, plus bulk import from a live Pinecone index.

pub mod error;
pub mod import;
pub mod index;
pub mod lantern;
pub mod migrate;
pub mod pinecone;
pub mod vector;

pub use error::{ImportError, ImportResult};
pub use import::{
    BatchFailure, BulkImporter, ImportProgress, ImportReport, SourceDescription, VectorSource,
};
pub use index::Index;
pub use lantern::{CreateIndex, Lantern};
pub use migrate::{create_from_pinecone, Migration, MigrationOptions};
pub use pinecone::PineconeClient;
pub use vector::{
    FetchResponse, IndexDescription, IndexStats, IndexStatus, NamespaceStats, QueryMatch,
    QueryRequest, QueryResponse, UpsertVector, Vector,
};
