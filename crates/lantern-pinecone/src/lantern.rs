use crate::index::Index;
use crate::vector::IndexDescription;
use lantern_core::catalog::{self, IndexCatalogEntry};
use lantern_core::{DistanceMetric, LanternError, Pool, PoolConfig, Result};
use std::sync::Arc;
use tracing::info;

/// Parameters for a new logical index.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub m: Option<u32>,
    pub ef: Option<u32>,
    pub ef_construction: Option<u32>,
    /// Build the default namespace's table and indexes right away.
    pub init_index: bool,
}

impl CreateIndex {
    pub fn new(name: impl Into<String>, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric,
            m: Some(12),
            ef: Some(64),
            ef_construction: Some(64),
            init_index: true,
        }
    }

    pub fn hnsw(mut self, m: Option<u32>, ef: Option<u32>, ef_construction: Option<u32>) -> Self {
        self.m = m;
        self.ef = ef;
        self.ef_construction = ef_construction;
        self
    }

    pub fn init_index(mut self, init: bool) -> Self {
        self.init_index = init;
        self
    }
}

/// Handle on the index catalog of one database.
pub struct Lantern {
    pool: Arc<Pool>,
}

impl Lantern {
    pub fn connect(config: PoolConfig) -> Result<Self> {
        Self::with_pool(Arc::new(Pool::connect(config)?))
    }

    /// Ensures the catalog table exists.
    pub fn with_pool(pool: Arc<Pool>) -> Result<Self> {
        let create = catalog::create_catalog_table();
        pool.with_connection(|s| s.execute(&create))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn create_index(&self, request: &CreateIndex) -> Result<Index> {
        catalog::check_index_name(&request.name)?;
        if request.dimension == 0 {
            return Err(LanternError::Validation(
                "index dimension must be positive".into(),
            ));
        }
        let entry = IndexCatalogEntry {
            name: request.name.clone(),
            metric: request.metric,
            dimension: request.dimension,
            m: request.m,
            ef: request.ef,
            ef_construction: request.ef_construction,
        };
        let namespaces = catalog::create_namespace_table(&entry.name);
        let insert = catalog::insert_index(&entry);
        self.pool.with_connection(|s| {
            s.execute(&namespaces)?;
            s.execute(&insert)
        })?;
        info!(index = %entry.name, metric = %entry.metric, dimension = entry.dimension, "created index");

        let index = self.index(&entry.name)?;
        if request.init_index {
            index.init_index()?;
        }
        Ok(index)
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.index(name)?.drop_index()
    }

    pub fn list_indexes(&self) -> Result<Vec<String>> {
        let stmt = catalog::list_indexes();
        let rows = self.pool.with_connection(|s| s.query(&stmt))?;
        rows.iter().map(|r| r.text("name")).collect()
    }

    pub fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        Ok(self.index(name)?.describe())
    }

    pub fn index(&self, name: &str) -> Result<Index> {
        Index::open(self.pool.clone(), name, None)
    }

    pub fn index_with_ef(&self, name: &str, ef: u32) -> Result<Index> {
        Index::open(self.pool.clone(), name, Some(ef))
    }

    pub fn close(&self) {
        self.pool.close();
    }
}
