//! Parallel copy of vectors from an external source into an [`Index`].

use crate::error::{ImportError, ImportResult};
use crate::index::Index;
use crate::vector::{IndexStats, UpsertVector, Vector};
use rand::Rng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub ready: bool,
}

/// A remote index vectors are copied from.
pub trait VectorSource: Send + Sync {
    fn describe(&self) -> ImportResult<SourceDescription>;
    fn stats(&self) -> ImportResult<IndexStats>;
    /// Vectors for the ids that exist; missing ids are skipped.
    fn fetch(&self, ids: &[String], namespace: &str) -> ImportResult<Vec<Vector>>;
    /// Ids of the `top_k` nearest neighbours of `vector`.
    fn query_ids(&self, vector: &[f32], top_k: usize, namespace: &str) -> ImportResult<Vec<String>>;
}

/// Shared counters workers bump as batches land.
#[derive(Debug, Default)]
pub struct ImportProgress {
    copied: AtomicU64,
    batches: AtomicU64,
}

impl ImportProgress {
    pub fn copied(&self) -> u64 {
        self.copied.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    fn record(&self, copied: u64) {
        self.copied.fetch_add(copied, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub namespace: String,
    pub first_id: String,
    pub size: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub copied: u64,
    pub batches: u64,
    pub failures: Vec<BatchFailure>,
}

impl ImportReport {
    pub fn merge(&mut self, other: ImportReport) {
        self.copied += other.copied;
        self.batches += other.batches;
        self.failures.extend(other.failures);
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkImporter {
    pub workers: usize,
    pub batch_size: usize,
    /// Neighbours requested per discovery probe.
    pub probe_top_k: usize,
    /// Discovery gives up after this many probes in a row find no new id.
    pub max_idle_probes: usize,
}

impl Default for BulkImporter {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            batch_size: 1000,
            probe_top_k: 10_000,
            max_idle_probes: 32,
        }
    }
}

impl BulkImporter {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn probe_top_k(mut self, top_k: usize) -> Self {
        self.probe_top_k = top_k.max(1);
        self
    }

    pub fn max_idle_probes(mut self, probes: usize) -> Self {
        self.max_idle_probes = probes.max(1);
        self
    }

    /// Copies `ids` from `source` into `namespace` of `index`. The ids are
    /// split into one contiguous shard per worker; a failed batch is recorded
    /// in the report and never stops the other workers.
    pub fn import_ids(
        &self,
        source: &dyn VectorSource,
        index: &Index,
        ids: &[String],
        namespace: &str,
        progress: &ImportProgress,
    ) -> ImportResult<ImportReport> {
        if ids.is_empty() {
            return Ok(ImportReport::default());
        }
        let shard = ids.len().div_ceil(self.workers.max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.max(1))
            .thread_name(|i| format!("lantern-import-{i}"))
            .build()?;
        let reports: Vec<ImportReport> = pool.install(|| {
            ids.par_chunks(shard)
                .map(|chunk| self.import_shard(source, index, chunk, namespace, progress))
                .collect()
        });
        let mut report = ImportReport::default();
        for shard_report in reports {
            report.merge(shard_report);
        }
        info!(
            index = index.name(),
            namespace,
            copied = report.copied,
            failed_batches = report.failures.len(),
            "import finished"
        );
        Ok(report)
    }

    fn import_shard(
        &self,
        source: &dyn VectorSource,
        index: &Index,
        ids: &[String],
        namespace: &str,
        progress: &ImportProgress,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        for batch in ids.chunks(self.batch_size.max(1)) {
            let outcome = source.fetch(batch, namespace).and_then(|vectors| {
                if vectors.is_empty() {
                    return Ok(0);
                }
                let n = index.upsert(vectors.into_iter().map(UpsertVector::Native), namespace, true)?;
                Ok(n as u64)
            });
            match outcome {
                Ok(0) => {}
                Ok(copied) => {
                    report.copied += copied;
                    report.batches += 1;
                    progress.record(copied);
                }
                Err(err) => {
                    warn!(namespace, first_id = %batch[0], size = batch.len(), "import batch failed: {err}");
                    report.failures.push(BatchFailure {
                        namespace: namespace.to_string(),
                        first_id: batch[0].clone(),
                        size: batch.len(),
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Collects ids from `source` with random probe vectors until `target`
    /// distinct ids are known or probes stop finding new ones.
    pub fn discover_ids(
        &self,
        source: &dyn VectorSource,
        dimension: usize,
        target: u64,
        namespace: &str,
    ) -> ImportResult<Vec<String>> {
        if dimension == 0 {
            return Err(ImportError::Source("source dimension is zero".into()));
        }
        let mut rng = rand::thread_rng();
        let mut seen: HashSet<String> = HashSet::new();
        let mut idle = 0;
        while (seen.len() as u64) < target && idle < self.max_idle_probes {
            let probe: Vec<f32> = (0..dimension).map(|_| rng.gen::<f32>()).collect();
            let before = seen.len();
            seen.extend(source.query_ids(&probe, self.probe_top_k, namespace)?);
            idle = if seen.len() == before { idle + 1 } else { 0 };
        }
        if (seen.len() as u64) < target {
            warn!(
                namespace,
                found = seen.len(),
                target,
                "id discovery stopped before reaching the namespace size"
            );
        }
        let mut ids: Vec<String> = seen.into_iter().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::tests::books;
    use crate::vector::NamespaceStats;
    use lantern_core::mock::Event;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// In-memory source: ids `0..n` in every configured namespace.
    pub(crate) struct FakeSource {
        pub(crate) description: SourceDescription,
        pub(crate) namespaces: BTreeMap<String, u64>,
        pub(crate) failing_ids: HashSet<String>,
        pub(crate) fetched: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub(crate) fn new(metric: &str, namespaces: &[(&str, u64)]) -> Self {
            Self {
                description: SourceDescription {
                    name: "books".into(),
                    dimension: 3,
                    metric: metric.into(),
                    ready: true,
                },
                namespaces: namespaces
                    .iter()
                    .map(|(n, c)| (n.to_string(), *c))
                    .collect(),
                failing_ids: HashSet::new(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn size(&self, namespace: &str) -> u64 {
            self.namespaces.get(namespace).copied().unwrap_or(0)
        }
    }

    impl VectorSource for FakeSource {
        fn describe(&self) -> ImportResult<SourceDescription> {
            Ok(self.description.clone())
        }

        fn stats(&self) -> ImportResult<IndexStats> {
            Ok(IndexStats {
                dimension: self.description.dimension,
                index_fullness: 0.0,
                total_vector_count: self.namespaces.values().sum(),
                namespaces: self
                    .namespaces
                    .iter()
                    .map(|(n, c)| (n.clone(), NamespaceStats { vector_count: *c }))
                    .collect(),
            })
        }

        fn fetch(&self, ids: &[String], namespace: &str) -> ImportResult<Vec<Vector>> {
            if ids.iter().any(|id| self.failing_ids.contains(id)) {
                return Err(ImportError::Source("fetch rejected".into()));
            }
            self.fetched.lock().extend(ids.iter().cloned());
            let size = self.size(namespace);
            Ok(ids
                .iter()
                .filter(|id| id.parse::<u64>().map(|i| i < size).unwrap_or(false))
                .map(|id| Vector::new(id.clone(), vec![0.0, 0.0, 1.0]))
                .collect())
        }

        fn query_ids(&self, _vector: &[f32], top_k: usize, namespace: &str) -> ImportResult<Vec<String>> {
            // deterministic window so discovery needs several probes
            let size = self.size(namespace);
            let start = rand::thread_rng().gen_range(0..size.max(1));
            Ok((0..top_k as u64)
                .map(|i| (start + i) % size.max(1))
                .take(size as usize)
                .map(|i| i.to_string())
                .collect())
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    fn copied_rows(events: &[Event]) -> usize {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Copy(_, data) => Some(data.split(|b| *b == b'\n').count()),
                _ => None,
            })
            .sum()
    }

    #[test]
    fn every_id_is_copied_exactly_once() {
        let (manager, pool) = books("cosine", &[""]);
        let index = Index::open(pool, "books", None).unwrap();
        let source = FakeSource::new("cosine", &[("", 95)]);
        let importer = BulkImporter::default().workers(4).batch_size(10);
        let progress = ImportProgress::default();
        let report = importer
            .import_ids(&source, &index, &ids(95), "", &progress)
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.copied, 95);
        assert_eq!(progress.copied(), 95);
        assert_eq!(copied_rows(&manager.events()), 95);
        let mut fetched = source.fetched.lock().clone();
        fetched.sort();
        fetched.dedup();
        assert_eq!(fetched.len(), 95);
    }

    #[test]
    fn empty_batches_are_skipped() {
        let (manager, pool) = books("cosine", &[""]);
        let index = Index::open(pool, "books", None).unwrap();
        // ids 10.. do not exist in the source
        let source = FakeSource::new("cosine", &[("", 10)]);
        let importer = BulkImporter::default().workers(1).batch_size(10);
        let progress = ImportProgress::default();
        let report = importer
            .import_ids(&source, &index, &ids(40), "", &progress)
            .unwrap();
        assert_eq!((report.copied, report.batches), (10, 1));
        let copies = manager
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Copy(..)))
            .count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn failed_batches_do_not_stop_other_workers() {
        let (_, pool) = books("cosine", &[""]);
        let index = Index::open(pool, "books", None).unwrap();
        let mut source = FakeSource::new("cosine", &[("", 40)]);
        source.failing_ids.insert("5".into());
        let importer = BulkImporter::default().workers(2).batch_size(10);
        let report = importer
            .import_ids(&source, &index, &ids(40), "", &ImportProgress::default())
            .unwrap();
        assert_eq!(report.copied, 30);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].first_id, "0");
        assert_eq!(report.failures[0].size, 10);
    }

    #[test]
    fn imports_into_a_fresh_namespace() {
        let (manager, pool) = books("cosine", &[""]);
        let index = Arc::new(Index::open(pool, "books", None).unwrap());
        let source = FakeSource::new("cosine", &[("fr", 20)]);
        BulkImporter::default()
            .workers(4)
            .batch_size(5)
            .import_ids(&source, &index, &ids(20), "fr", &ImportProgress::default())
            .unwrap();
        let created = manager
            .statements()
            .iter()
            .filter(|s| s.contains("CREATE TABLE IF NOT EXISTS \"books_fr\""))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn discovery_reaches_the_target() {
        let source = FakeSource::new("cosine", &[("", 50)]);
        let ids = BulkImporter::default()
            .probe_top_k(7)
            .max_idle_probes(10_000)
            .discover_ids(&source, 3, 50, "")
            .unwrap();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn discovery_stops_when_probes_go_idle() {
        // stats claim more vectors than queries can ever return
        let source = FakeSource::new("cosine", &[("", 5)]);
        let ids = BulkImporter::default()
            .max_idle_probes(3)
            .discover_ids(&source, 3, 100, "")
            .unwrap();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn no_ids_is_an_empty_report() {
        let (manager, pool) = books("cosine", &[""]);
        let index = Index::open(pool, "books", None).unwrap();
        manager.clear_events();
        let source = FakeSource::new("cosine", &[]);
        let report = BulkImporter::default()
            .import_ids(&source, &index, &[], "", &ImportProgress::default())
            .unwrap();
        assert_eq!(report, ImportReport::default());
        assert!(manager.events().is_empty());
    }
}
