//! Recreate a Pinecone index as a lantern index.

use crate::error::{ImportError, ImportResult};
use crate::import::{BulkImporter, ImportProgress, ImportReport, VectorSource};
use crate::index::Index;
use crate::lantern::{CreateIndex, Lantern};
use lantern_core::DistanceMetric;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOptions {
    /// Name of the lantern index to create.
    pub index_name: String,
    /// Namespace used when `ids` is given.
    pub namespace: String,
    /// Copy only these ids. Empty copies every namespace in full.
    pub ids: Vec<String>,
    /// Drop an existing lantern index of the same name first.
    pub recreate: bool,
    /// Build the HNSW and metadata indexes after the copy.
    pub create_lantern_index: bool,
    pub m: Option<u32>,
    pub ef: Option<u32>,
    pub ef_construction: Option<u32>,
    pub importer: BulkImporter,
}

impl MigrationOptions {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            namespace: String::new(),
            ids: Vec::new(),
            recreate: false,
            create_lantern_index: true,
            m: Some(12),
            ef: Some(64),
            ef_construction: Some(64),
            importer: BulkImporter::default(),
        }
    }
}

pub struct Migration {
    pub index: Index,
    pub report: ImportReport,
}

/// Copies `source` into a new lantern index. Tables are created first, the
/// data is bulk-copied, and the indexes are built last.
pub fn create_from_pinecone(
    lantern: &Lantern,
    source: &dyn VectorSource,
    options: &MigrationOptions,
) -> ImportResult<Migration> {
    if options.recreate {
        match lantern.delete_index(&options.index_name) {
            Ok(()) => info!(index = %options.index_name, "dropped existing index"),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }

    let stats = source.stats()?;
    let description = source.describe()?;
    let metric = DistanceMetric::parse(&description.metric)
        .map_err(|_| ImportError::UnsupportedMetric(description.metric.clone()))?;
    if !description.ready {
        return Err(ImportError::IndexNotReady(description.name));
    }

    let index = lantern.create_index(
        &CreateIndex::new(&options.index_name, description.dimension, metric)
            .hnsw(options.m, options.ef, options.ef_construction)
            .init_index(false),
    )?;
    index.init_tables()?;

    let importer = &options.importer;
    let progress = ImportProgress::default();
    let mut report = ImportReport::default();
    if options.ids.is_empty() {
        for (namespace, namespace_stats) in &stats.namespaces {
            index.prepare_namespace(namespace)?;
            let ids = importer.discover_ids(
                source,
                description.dimension,
                namespace_stats.vector_count,
                namespace,
            )?;
            report.merge(importer.import_ids(source, &index, &ids, namespace, &progress)?);
            info!(namespace = %namespace, copied = progress.copied(), "namespace copied");
        }
    } else {
        index.prepare_namespace(&options.namespace)?;
        report.merge(importer.import_ids(
            source,
            &index,
            &options.ids,
            &options.namespace,
            &progress,
        )?);
    }

    if options.create_lantern_index {
        info!(index = %options.index_name, "building indexes");
        index.init_indexes()?;
    }
    Ok(Migration { index, report })
}
