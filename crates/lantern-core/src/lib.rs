//! Client for Postgres with the lantern extension: statement construction,
//! pooled transactional execution and a collection-level API.

pub mod builder;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod params;
pub mod pg;
pub mod pool;
pub mod record;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use builder::{DistanceMetric, Field, HnswParams, IdType, QueryBuilder, Statement};
pub use catalog::{IndexCatalogEntry, DEFAULT_NAMESPACE};
pub use client::{Collection, CollectionConfig, SearchRequest};
pub use config::PoolConfig;
pub use error::{LanternError, Result};
pub use filter::{FilterCondition, FilterValue, MetadataFilter, PredicateOp};
pub use params::{Param, Translator};
pub use pg::PgManager;
pub use pool::{Cell, Connection, ManageConnection, Pool, Row, Session};
pub use record::{VectorRecord, VectorResult};
