//! Requires `LANTERN_DB_URL`; skipped otherwise.

use lantern_core::{DistanceMetric, PoolConfig};
use lantern_pinecone::{CreateIndex, Lantern, QueryRequest, Vector};
use serde_json::json;
use uuid::Uuid;

fn lantern() -> Option<Lantern> {
    let url = std::env::var("LANTERN_DB_URL").ok()?;
    Some(Lantern::connect(PoolConfig::new(url).max_size(4)).unwrap())
}

#[test]
fn namespaces_do_not_see_each_other() {
    let Some(lantern) = lantern() else {
        return;
    };
    let name = format!("ns-{}", Uuid::new_v4().simple());
    let index = lantern
        .create_index(&CreateIndex::new(&name, 3, DistanceMetric::Cosine))
        .unwrap();

    index
        .upsert(
            [Vector::new("a", vec![1.0, 0.0, 0.0]).with_metadata(json!({"lang": "en"}))],
            "",
            false,
        )
        .unwrap();
    index
        .upsert([("b", vec![0.0f32, 1.0, 0.0], json!({"lang": "fr"}))], "fr", true)
        .unwrap();

    let default_hits = index
        .query(&QueryRequest::by_vector(vec![0.0, 1.0, 0.0]).top_k(10))
        .unwrap();
    let ids: Vec<_> = default_hits.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);

    let fr_hits = index
        .query(
            &QueryRequest::by_vector(vec![0.0, 1.0, 0.0])
                .namespace("fr")
                .include_metadata(true),
        )
        .unwrap();
    assert_eq!(fr_hits.matches.len(), 1);
    assert_eq!(fr_hits.matches[0].id, "b");
    assert!(fr_hits.matches[0].score > 0.99);
    assert_eq!(fr_hits.matches[0].metadata, Some(json!({"lang": "fr"})));

    let stats = index.describe_index_stats().unwrap();
    assert_eq!(stats.total_vector_count, 2);
    assert_eq!(stats.namespaces["fr"].vector_count, 1);

    assert!(lantern.list_indexes().unwrap().contains(&name));
    lantern.delete_index(&name).unwrap();
    assert!(lantern.index(&name).err().unwrap().is_not_found());
}
