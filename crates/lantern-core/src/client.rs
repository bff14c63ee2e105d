//! Collection client: CRUD and search against one physical table.

use crate::builder::{
    encode_copy_rows, DistanceMetric, Field, HnswParams, IdType, QueryBuilder,
};
use crate::config::PoolConfig;
use crate::error::{LanternError, Result};
use crate::filter::MetadataFilter;
use crate::pool::Pool;
use crate::record::{VectorRecord, VectorResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionConfig {
    pub table_name: String,
    pub dimensions: usize,
    pub metric: DistanceMetric,
    pub id_type: IdType,
    /// Rank with the native distance operator instead of the distance function.
    pub pgvector_compat: bool,
    pub m: Option<u32>,
    pub ef: Option<u32>,
    pub ef_construction: Option<u32>,
}

impl CollectionConfig {
    pub fn new(table_name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            table_name: table_name.into(),
            dimensions,
            metric: DistanceMetric::Cosine,
            id_type: IdType::Text,
            pgvector_compat: true,
            m: Some(12),
            ef: Some(64),
            ef_construction: Some(64),
        }
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn id_type(mut self, id_type: IdType) -> Self {
        self.id_type = id_type;
        self
    }

    pub fn pgvector_compat(mut self, enabled: bool) -> Self {
        self.pgvector_compat = enabled;
        self
    }

    pub fn hnsw(mut self, m: Option<u32>, ef: Option<u32>, ef_construction: Option<u32>) -> Self {
        self.m = m;
        self.ef = ef;
        self.ef_construction = ef_construction;
        self
    }

    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            dimension: Some(self.dimensions as u32),
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef,
        }
    }
}

/// Nearest-neighbour request. With neither `vector` nor `query_id` the
/// search browses rows matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub vector: Option<Vec<f32>>,
    pub query_id: Option<String>,
    pub limit: usize,
    pub filter: Option<MetadataFilter>,
    /// Empty selects every column.
    pub fields: Vec<Field>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            vector: None,
            query_id: None,
            limit: 10,
            filter: None,
            fields: Vec::new(),
        }
    }
}

impl SearchRequest {
    pub fn by_vector(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            ..Default::default()
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            query_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn browse() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn fields(mut self, fields: &[Field]) -> Self {
        self.fields = fields.to_vec();
        self
    }
}

pub struct Collection {
    pool: Arc<Pool>,
    builder: QueryBuilder,
    config: CollectionConfig,
}

impl Collection {
    pub fn new(pool: Arc<Pool>, config: CollectionConfig) -> Self {
        let builder = QueryBuilder::new(
            config.table_name.clone(),
            config.dimensions,
            config.id_type,
            config.metric,
            config.pgvector_compat,
        );
        Self {
            pool,
            builder,
            config,
        }
    }

    /// Collection with a pool of its own.
    pub fn connect(pool_config: PoolConfig, config: CollectionConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(Pool::connect(pool_config)?), config))
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn table_name(&self) -> &str {
        self.builder.table_name()
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    fn check_records(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Err(LanternError::validation("data can not be empty"));
        }
        records
            .iter()
            .try_for_each(|r| r.check_dimension(self.config.dimensions))
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(LanternError::validation(format!(
                "vector has {} dimensions, expected {}",
                vector.len(),
                self.config.dimensions
            )));
        }
        Ok(())
    }

    /// A failing probe means the table is missing; pool errors still propagate.
    pub fn exists(&self) -> Result<bool> {
        let probe = self.builder.row_exists();
        self.pool.with_connection(|s| Ok(s.query(&probe).is_ok()))
    }

    pub fn create_table(&self) -> Result<()> {
        let stmt = self.builder.create_table();
        self.pool.with_connection(|s| s.execute(&stmt))?;
        info!(table = self.table_name(), "created collection table");
        Ok(())
    }

    /// Embedding index and metadata index in one unit of work.
    pub fn create_index(&self) -> Result<()> {
        let embedding = self
            .builder
            .create_embedding_index(&self.config.hnsw_params());
        let metadata = self.builder.create_metadata_index();
        self.pool.with_connection(|s| {
            s.execute(&embedding)?;
            s.execute(&metadata)
        })?;
        info!(table = self.table_name(), "created collection indexes");
        Ok(())
    }

    pub fn create_embedding_index(&self, params: &HnswParams) -> Result<()> {
        let stmt = self.builder.create_embedding_index(params);
        self.pool.with_connection(|s| s.execute(&stmt)).map(|_| ())
    }

    pub fn create_metadata_index(&self) -> Result<()> {
        let stmt = self.builder.create_metadata_index();
        self.pool.with_connection(|s| s.execute(&stmt)).map(|_| ())
    }

    pub fn drop_embedding_index(&self) -> Result<()> {
        let stmt = self.builder.drop_embedding_index();
        self.pool.with_connection(|s| s.execute(&stmt)).map(|_| ())
    }

    pub fn truncate(&self) -> Result<()> {
        let stmt = self.builder.truncate();
        self.pool.with_connection(|s| s.execute(&stmt)).map(|_| ())
    }

    pub fn drop_table(&self) -> Result<()> {
        let stmt = self.builder.drop_table();
        self.pool.with_connection(|s| s.execute(&stmt))?;
        info!(table = self.table_name(), "dropped collection table");
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let stmt = self.builder.count();
        let rows = self.pool.with_connection(|s| s.query(&stmt))?;
        let row = rows
            .first()
            .ok_or_else(|| LanternError::decode("cnt", "count returned no rows"))?;
        Ok(row.int("cnt")?.max(0) as u64)
    }

    pub fn get_by_id(&self, id: &str, fields: &[Field]) -> Result<Option<VectorResult>> {
        let stmt = self.builder.get_by_id(id, fields);
        let rows = self.pool.with_connection(|s| s.query(&stmt))?;
        rows.first().map(VectorResult::from_row).transpose()
    }

    pub fn get_by_ids(&self, ids: &[String], fields: &[Field]) -> Result<Vec<VectorResult>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = self.builder.get_by_ids(ids, fields);
        let rows = self.pool.with_connection(|s| s.query(&stmt))?;
        rows.iter().map(VectorResult::from_row).collect()
    }

    /// Results come back in ascending distance order. A `query_id` that
    /// matches no row yields no results.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<VectorResult>> {
        let vector = match (&request.vector, &request.query_id) {
            (Some(vector), _) => {
                self.check_vector(vector)?;
                Some(vector.clone())
            }
            (None, Some(id)) => {
                match self
                    .get_by_id(id, &[Field::Embedding])?
                    .and_then(|r| r.embedding)
                {
                    Some(embedding) => Some(embedding),
                    None => return Ok(Vec::new()),
                }
            }
            (None, None) => None,
        };

        let stmt = self.builder.search(
            vector.as_deref(),
            request.limit,
            request.filter.as_ref(),
            &request.fields,
        )?;
        let hints = self.builder.search_hints(request.limit);
        let rows = self.pool.with_connection(|s| {
            for hint in &hints {
                s.batch_execute(hint)?;
            }
            s.query(&stmt)
        })?;
        debug!(table = self.table_name(), hits = rows.len(), "search");
        rows.iter().map(VectorResult::from_row).collect()
    }

    pub fn upsert(&self, record: impl Into<VectorRecord>) -> Result<u64> {
        self.upsert_many(&[record.into()])
    }

    /// Inserts rows whose ids are not present yet. Existing ids keep their
    /// stored values. Returns the number of rows written.
    pub fn upsert_many(&self, records: &[VectorRecord]) -> Result<u64> {
        self.check_records(records)?;
        let batches = self.builder.upsert_batches(records);
        self.pool.with_connection(|s| {
            batches
                .iter()
                .try_fold(0u64, |total, stmt| Ok(total + s.execute(stmt)?))
        })
    }

    /// COPY load. Unlike `upsert_many` a duplicate id fails the whole load.
    pub fn bulk_insert(&self, records: &[VectorRecord]) -> Result<u64> {
        self.check_records(records)?;
        let sql = self.builder.copy_in();
        let payload = encode_copy_rows(records);
        let copied = self.pool.with_connection(|s| s.copy_in(&sql, &payload))?;
        debug!(table = self.table_name(), copied, "bulk insert");
        Ok(copied)
    }

    pub fn update_by_id(
        &self,
        id: &str,
        embedding: Option<&[f32]>,
        metadata: Option<&Value>,
    ) -> Result<u64> {
        if let Some(embedding) = embedding {
            self.check_vector(embedding)?;
        }
        let stmt = self.builder.update_by_id(id, embedding, metadata)?;
        self.pool.with_connection(|s| s.execute(&stmt))
    }

    pub fn delete_by_ids(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let stmt = self.builder.delete_by_ids(ids);
        self.pool.with_connection(|s| s.execute(&stmt))
    }

    /// An empty filter would match every row and is rejected.
    pub fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<u64> {
        if filter.is_empty() {
            return Err(LanternError::validation(
                "delete by metadata needs at least one condition",
            ));
        }
        let stmt = self.builder.delete_by_metadata(filter)?;
        self.pool.with_connection(|s| s.execute(&stmt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, MockManager};
    use crate::params::Param;
    use crate::pool::{Cell, Row};
    use serde_json::json;

    fn collection(manager: &MockManager, config: CollectionConfig) -> Collection {
        let pool = Pool::new(manager.clone(), PoolConfig::new("mock://").max_size(2));
        Collection::new(Arc::new(pool), config)
    }

    fn items(manager: &MockManager) -> Collection {
        collection(manager, CollectionConfig::new("items", 3))
    }

    #[test]
    fn config_defaults() {
        let config = CollectionConfig::new("items", 3);
        assert_eq!(config.metric, DistanceMetric::Cosine);
        assert_eq!(config.id_type, IdType::Text);
        assert!(config.pgvector_compat);
        assert_eq!(config.hnsw_params().m, Some(12));
        assert_eq!(config.hnsw_params().ef_search, Some(64));
    }

    #[test]
    fn empty_upsert_fails_before_touching_the_pool() {
        let manager = MockManager::new();
        let c = items(&manager);
        assert!(c.upsert_many(&[]).unwrap_err().is_validation());
        assert!(c.bulk_insert(&[]).unwrap_err().is_validation());
        assert_eq!(manager.connections(), 0);
    }

    #[test]
    fn dimension_mismatch_fails_before_touching_the_pool() {
        let manager = MockManager::new();
        let c = items(&manager);
        let err = c.upsert(VectorRecord::new("1", vec![1.0, 2.0])).unwrap_err();
        assert!(err.is_validation());
        let err = c.search(&SearchRequest::by_vector(vec![1.0])).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(manager.connections(), 0);
    }

    #[test]
    fn upsert_many_runs_every_chunk_in_one_transaction() {
        let manager = MockManager::new();
        let c = items(&manager);
        let records: Vec<_> = (0..1500)
            .map(|i| VectorRecord::new(i.to_string(), vec![0.0; 3]))
            .collect();
        assert_eq!(c.upsert_many(&records).unwrap(), 2);
        let events = manager.events();
        let begins = events.iter().filter(|e| **e == Event::Begin).count();
        let inserts = events
            .iter()
            .filter(|e| matches!(e, Event::Execute(sql, _) if sql.starts_with("INSERT")))
            .count();
        assert_eq!((begins, inserts), (1, 2));
    }

    #[test]
    fn search_sets_hints_before_the_query() {
        let manager = MockManager::new();
        let c = collection(
            &manager,
            CollectionConfig::new("items", 3).pgvector_compat(false),
        );
        c.search(&SearchRequest::by_vector(vec![1.0, 0.0, 0.0]).limit(4))
            .unwrap();
        let statements = manager.statements();
        assert_eq!(
            &statements[..3],
            &[
                "SET LOCAL hnsw.init_k = 4",
                "SET LOCAL enable_seqscan = OFF",
                "SET LOCAL lantern.pgvectorcompat = OFF"
            ]
        );
        assert!(statements[3].contains("ORDER BY cos_dist(embedding, $1::real[]) ASC LIMIT 4"));
    }

    #[test]
    fn search_by_unknown_id_is_empty() {
        let manager = MockManager::new();
        let c = items(&manager);
        let hits = c.search(&SearchRequest::by_id("missing")).unwrap();
        assert!(hits.is_empty());
        // only the point lookup ran
        assert!(manager
            .statements()
            .iter()
            .all(|s| !s.contains("AS distance")));
    }

    #[test]
    fn search_by_id_uses_the_stored_embedding() {
        let manager = MockManager::new();
        manager.on_query(
            "WHERE id = $1",
            vec![Row::new(
                vec!["embedding".into()],
                vec![Cell::Vector(vec![0.0, 1.0, 0.0])],
            )],
        );
        let c = items(&manager);
        c.search(&SearchRequest::by_id("7").limit(2)).unwrap();
        let search = manager
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::Query(sql, params) if sql.contains("AS distance") => Some(params),
                _ => None,
            })
            .unwrap();
        assert_eq!(search, vec![Param::Vector(vec![0.0, 1.0, 0.0])]);
    }

    #[test]
    fn browse_mode_returns_constant_distance() {
        let manager = MockManager::new();
        manager.on_query(
            "AS distance",
            vec![Row::new(
                vec!["id".into(), "distance".into()],
                vec![Cell::Text("a".into()), Cell::Float(-1.0)],
            )],
        );
        let c = items(&manager);
        let hits = c
            .search(&SearchRequest::browse().fields(&[Field::Id]))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance, -1.0);
        assert!(manager.statements().iter().all(|s| !s.contains("ORDER BY")));
    }

    #[test]
    fn exists_swallows_statement_failure_only() {
        let manager = MockManager::new();
        manager.fail_on("SELECT 1 FROM");
        let c = items(&manager);
        assert!(!c.exists().unwrap());
        manager.fail_connect(true);
        let other = collection(&manager, CollectionConfig::new("other", 3));
        assert!(other.exists().is_err());
    }

    #[test]
    fn count_reads_the_cnt_column() {
        let manager = MockManager::new();
        manager.on_query(
            "COUNT(*)",
            vec![Row::new(vec!["cnt".into()], vec![Cell::Int(42)])],
        );
        assert_eq!(items(&manager).count().unwrap(), 42);
    }

    #[test]
    fn bulk_insert_streams_copy_payload() {
        let manager = MockManager::new();
        let c = items(&manager);
        let records = vec![
            VectorRecord::new("1", vec![0.0, 0.0, 1.0]),
            VectorRecord::new("2", vec![0.0, 1.0, 0.0]).with_metadata(json!({"k": "v"})),
        ];
        assert_eq!(c.bulk_insert(&records).unwrap(), 2);
        let copy = manager
            .events()
            .into_iter()
            .find(|e| matches!(e, Event::Copy(..)))
            .unwrap();
        assert_eq!(
            copy.sql(),
            Some("COPY \"items\" (id, metadata, embedding) FROM STDIN")
        );
    }

    #[test]
    fn empty_metadata_delete_is_rejected() {
        let manager = MockManager::new();
        let err = items(&manager)
            .delete_by_metadata(&MetadataFilter::new())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn empty_id_lists_skip_the_backend() {
        let manager = MockManager::new();
        let c = items(&manager);
        assert_eq!(c.delete_by_ids(&[]).unwrap(), 0);
        assert!(c.get_by_ids(&[], &[]).unwrap().is_empty());
        assert_eq!(manager.connections(), 0);
    }

    #[test]
    fn drop_table_cascades() {
        let manager = MockManager::new();
        items(&manager).drop_table().unwrap();
        assert_eq!(
            manager.statements(),
            vec!["DROP TABLE IF EXISTS \"items\" CASCADE"]
        );
    }

    #[test]
    fn create_index_builds_both_indexes() {
        let manager = MockManager::new();
        items(&manager).create_index().unwrap();
        let statements = manager.statements();
        assert!(statements[0].contains("USING hnsw (embedding dist_cos_ops) WITH (m = 12, ef_construction = 64, ef = 64, dim = 3)"));
        assert!(statements[1].contains("USING GIN (metadata jsonb_path_ops)"));
    }
}
