//! One logical index multiplexed over a physical table per namespace.

use crate::vector::{
    FetchResponse, IndexDescription, IndexStats, IndexStatus, NamespaceStats, QueryMatch,
    QueryRequest, QueryResponse, UpsertVector, Vector,
};
use lantern_core::catalog::{self, IndexCatalogEntry};
use lantern_core::{
    Collection, CollectionConfig, Field, IdType, LanternError, Pool, Result, SearchRequest,
    VectorRecord,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Index {
    pool: Arc<Pool>,
    entry: IndexCatalogEntry,
    namespaces: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Index {
    /// Loads the catalog row for `name` and every known namespace. `ef`
    /// overrides the stored search-time candidate list size.
    pub(crate) fn open(pool: Arc<Pool>, name: &str, ef: Option<u32>) -> Result<Self> {
        let select = catalog::select_index(name);
        let rows = pool.with_connection(|s| s.query(&select))?;
        let mut entry = rows
            .first()
            .map(IndexCatalogEntry::from_row)
            .transpose()?
            .ok_or_else(|| LanternError::IndexNotFound(name.to_string()))?;
        if ef.is_some() {
            entry.ef = ef;
        }
        let index = Self {
            pool,
            entry,
            namespaces: RwLock::new(HashMap::new()),
        };
        index.refresh_namespaces()?;
        Ok(index)
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn entry(&self) -> &IndexCatalogEntry {
        &self.entry
    }

    pub fn dimension(&self) -> usize {
        self.entry.dimension
    }

    fn collection_for(&self, namespace: &str) -> Collection {
        let config = CollectionConfig {
            table_name: catalog::namespace_table_name(&self.entry.name, namespace),
            dimensions: self.entry.dimension,
            metric: self.entry.metric,
            id_type: IdType::Text,
            pgvector_compat: true,
            m: self.entry.m,
            ef: self.entry.ef,
            ef_construction: self.entry.ef_construction,
        };
        Collection::new(self.pool.clone(), config)
    }

    /// Re-reads the namespace table and adds handles for namespaces created
    /// by other clients.
    pub fn refresh_namespaces(&self) -> Result<()> {
        let stmt = catalog::list_namespaces(&self.entry.name);
        let rows = self.pool.with_connection(|s| s.query(&stmt))?;
        let names = rows
            .iter()
            .map(|r| r.text("name"))
            .collect::<Result<Vec<_>>>()?;
        let mut map = self.namespaces.write();
        for name in names {
            if !map.contains_key(&name) {
                let collection = Arc::new(self.collection_for(&name));
                map.insert(name, collection);
            }
        }
        Ok(())
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<_> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn namespace(&self, namespace: &str) -> Result<Arc<Collection>> {
        self.namespace_with(namespace, true)
    }

    /// Read-side lookup: re-reads the namespace table on a miss and never
    /// creates anything.
    fn existing_namespace(&self, namespace: &str) -> Result<Option<Arc<Collection>>> {
        if let Some(collection) = self.namespaces.read().get(namespace) {
            return Ok(Some(collection.clone()));
        }
        self.refresh_namespaces()?;
        Ok(self.namespaces.read().get(namespace).cloned())
    }

    /// Registers `namespace` and creates its table without the indexes, for
    /// loads that build indexes after the data is in.
    pub fn prepare_namespace(&self, namespace: &str) -> Result<()> {
        self.namespace_with(namespace, false).map(|_| ())
    }

    fn namespace_with(&self, namespace: &str, build_indexes: bool) -> Result<Arc<Collection>> {
        if let Some(collection) = self.namespaces.read().get(namespace) {
            return Ok(collection.clone());
        }
        let mut map = self.namespaces.write();
        if let Some(collection) = map.get(namespace) {
            return Ok(collection.clone());
        }
        catalog::check_namespace(&self.entry.name, namespace)?;
        let insert = catalog::insert_namespace(&self.entry.name, namespace);
        self.pool.with_connection(|s| s.execute(&insert))?;
        let collection = Arc::new(self.collection_for(namespace));
        collection.create_table()?;
        if build_indexes {
            collection.create_index()?;
        }
        info!(index = %self.entry.name, namespace, "created namespace");
        map.insert(namespace.to_string(), collection.clone());
        Ok(collection)
    }

    /// Writes `vectors` into `namespace`, creating it on first use. `copy`
    /// loads through COPY instead of INSERT. Returns the number of vectors
    /// submitted.
    pub fn upsert<I, V>(&self, vectors: I, namespace: &str, copy: bool) -> Result<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<UpsertVector>,
    {
        let records = vectors
            .into_iter()
            .map(|v| v.into().into_record())
            .collect::<Result<Vec<VectorRecord>>>()?;
        if records.is_empty() {
            return Err(LanternError::Validation("data can not be empty".into()));
        }
        records
            .iter()
            .try_for_each(|r| r.check_dimension(self.entry.dimension))?;

        let collection = self.namespace(namespace)?;
        if copy {
            collection.bulk_insert(&records)?;
        } else {
            collection.upsert_many(&records)?;
        }
        debug!(index = %self.entry.name, namespace, count = records.len(), copy, "upsert");
        Ok(records.len())
    }

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        if request.vector.is_none() && request.id.is_none() {
            return Err(LanternError::Validation(
                "query needs a vector or an id".into(),
            ));
        }
        if request.top_k == 0 {
            return Err(LanternError::Validation("top_k must be at least 1".into()));
        }
        let mut response = QueryResponse {
            namespace: request.namespace.clone(),
            matches: Vec::new(),
        };
        let Some(collection) = self.existing_namespace(&request.namespace)? else {
            return Ok(response);
        };
        let mut fields = vec![Field::Id];
        if request.include_values {
            fields.push(Field::Embedding);
        }
        if request.include_metadata {
            fields.push(Field::Metadata);
        }
        let search = SearchRequest {
            vector: request.vector.clone(),
            query_id: request.id.clone(),
            limit: request.top_k,
            filter: request.filter.clone(),
            fields,
        };
        let metric = self.entry.metric;
        response.matches = collection
            .search(&search)?
            .into_iter()
            .map(|hit| QueryMatch {
                id: hit.id.unwrap_or_default(),
                score: metric.score(hit.distance),
                values: hit.embedding,
                metadata: hit.metadata,
            })
            .collect();
        Ok(response)
    }

    /// Unknown namespaces read as empty.
    pub fn fetch(&self, ids: &[String], namespace: &str) -> Result<FetchResponse> {
        let Some(collection) = self.existing_namespace(namespace)? else {
            return Ok(FetchResponse {
                namespace: namespace.to_string(),
                vectors: BTreeMap::new(),
            });
        };
        let vectors = collection
            .get_by_ids(ids, &Field::ALL)?
            .into_iter()
            .filter_map(|hit| {
                let id = hit.id?;
                let vector = Vector {
                    id: id.clone(),
                    values: hit.embedding.unwrap_or_default(),
                    metadata: hit.metadata,
                };
                Some((id, vector))
            })
            .collect();
        Ok(FetchResponse {
            namespace: namespace.to_string(),
            vectors,
        })
    }

    pub fn delete(&self, ids: &[String], namespace: &str) -> Result<u64> {
        match self.existing_namespace(namespace)? {
            Some(collection) => collection.delete_by_ids(ids),
            None => Ok(0),
        }
    }

    /// Replaces the values and/or the metadata of one stored vector.
    pub fn update(
        &self,
        id: &str,
        values: Option<&[f32]>,
        set_metadata: Option<&Value>,
        namespace: &str,
    ) -> Result<u64> {
        self.namespace(namespace)?
            .update_by_id(id, values, set_metadata)
    }

    pub fn describe_index_stats(&self) -> Result<IndexStats> {
        self.refresh_namespaces()?;
        let collections: Vec<_> = self
            .namespaces
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect();
        let mut namespaces = BTreeMap::new();
        let mut total = 0;
        for (name, collection) in collections {
            let vector_count = collection.count()?;
            total += vector_count;
            namespaces.insert(name, NamespaceStats { vector_count });
        }
        Ok(IndexStats {
            dimension: self.entry.dimension,
            index_fullness: 1.0,
            total_vector_count: total,
            namespaces,
        })
    }

    pub fn describe(&self) -> IndexDescription {
        IndexDescription {
            name: self.entry.name.clone(),
            dimension: self.entry.dimension,
            metric: self.entry.metric.name().to_string(),
            status: IndexStatus { ready: true },
        }
    }

    fn collections(&self) -> Vec<Arc<Collection>> {
        self.namespaces.read().values().cloned().collect()
    }

    pub fn init_tables(&self) -> Result<()> {
        self.collections().iter().try_for_each(|c| c.create_table())
    }

    pub fn init_indexes(&self) -> Result<()> {
        self.collections().iter().try_for_each(|c| c.create_index())
    }

    pub fn init_index(&self) -> Result<()> {
        self.collections().iter().try_for_each(|c| {
            c.create_table()?;
            c.create_index()
        })
    }

    /// Drops every namespace table, then the namespace table and the
    /// catalog row together.
    pub fn drop_index(&self) -> Result<()> {
        for collection in self.collections() {
            collection.drop_table()?;
        }
        let drop_namespaces = catalog::drop_namespace_table(&self.entry.name);
        let delete_entry = catalog::delete_index(&self.entry.name);
        self.pool.with_connection(|s| {
            s.execute(&drop_namespaces)?;
            s.execute(&delete_entry)
        })?;
        self.namespaces.write().clear();
        info!(index = %self.entry.name, "dropped index");
        Ok(())
    }
}
