//! Runs against a live Postgres with the lantern extension when
//! `LANTERN_DB_URL` is set; every test is a no-op otherwise.

use lantern_core::{
    Collection, CollectionConfig, DistanceMetric, Field, MetadataFilter, PoolConfig,
    PredicateOp, SearchRequest, VectorRecord,
};
use serde_json::json;
use uuid::Uuid;

fn collection(metric: DistanceMetric) -> Option<Collection> {
    let url = std::env::var("LANTERN_DB_URL").ok()?;
    let table = format!("e2e_{}", Uuid::new_v4().simple());
    let collection = Collection::connect(
        PoolConfig::new(url).max_size(4),
        CollectionConfig::new(table, 3).metric(metric),
    )
    .unwrap();
    collection.create_table().unwrap();
    Some(collection)
}

fn unit_vectors() -> Vec<VectorRecord> {
    vec![
        VectorRecord::new("1", vec![1.0, 0.0, 0.0]).with_metadata(json!({"name": "a", "year": 1999})),
        VectorRecord::new("2", vec![0.0, 1.0, 0.0]).with_metadata(json!({"name": "b", "year": 2005})),
        VectorRecord::new("3", vec![0.0, 0.0, 1.0]).with_metadata(json!({"name": "c", "year": 2011})),
    ]
}

#[test]
fn filtered_search_projects_only_requested_columns() {
    let Some(c) = collection(DistanceMetric::Euclidean) else {
        return;
    };
    c.upsert_many(&unit_vectors()).unwrap();
    c.create_index().unwrap();

    let hits = c
        .search(
            &SearchRequest::by_vector(vec![1.0, 0.0, 0.0])
                .limit(2)
                .filter(MetadataFilter::new().eq("name", "b"))
                .fields(&[Field::Id]),
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id.as_deref(), Some("2"));
    assert!(hits[0].embedding.is_none());
    assert!(hits[0].metadata.is_none());

    let newer = c
        .search(
            &SearchRequest::by_vector(vec![1.0, 0.0, 0.0])
                .filter(MetadataFilter::new().predicate("year", PredicateOp::Gt, 2000)),
        )
        .unwrap();
    let mut ids: Vec<_> = newer.into_iter().filter_map(|r| r.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["2", "3"]);
    c.drop_table().unwrap();
}

#[test]
fn first_writer_wins_on_upsert() {
    let Some(c) = collection(DistanceMetric::Cosine) else {
        return;
    };
    c.upsert(VectorRecord::new("x", vec![1.0, 0.0, 0.0]).with_metadata(json!({"v": 1})))
        .unwrap();
    c.upsert(VectorRecord::new("x", vec![0.0, 1.0, 0.0]).with_metadata(json!({"v": 2})))
        .unwrap();
    let stored = c.get_by_id("x", &[]).unwrap().unwrap();
    assert_eq!(stored.embedding, Some(vec![1.0, 0.0, 0.0]));
    assert_eq!(stored.metadata, Some(json!({"v": 1})));
    assert_eq!(c.count().unwrap(), 1);
    c.drop_table().unwrap();
}

#[test]
fn bulk_insert_round_trips_through_copy() {
    let Some(c) = collection(DistanceMetric::Cosine) else {
        return;
    };
    let records = vec![
        VectorRecord::new("q", vec![0.5, 0.25, 1.0]).with_metadata(json!({"quote": "say \"hi\""})),
        VectorRecord::new("p", vec![1.0, 2.0, 3.0]),
    ];
    assert_eq!(c.bulk_insert(&records).unwrap(), 2);
    let q = c.get_by_id("q", &[]).unwrap().unwrap();
    assert_eq!(q.embedding, Some(vec![0.5, 0.25, 1.0]));
    assert_eq!(q.metadata, Some(json!({"quote": "say \"hi\""})));
    let p = c.get_by_id("p", &[Field::Metadata]).unwrap().unwrap();
    assert_eq!(p.metadata, Some(json!({})));
    c.drop_table().unwrap();
}

#[test]
fn browse_mode_returns_every_row() {
    let Some(c) = collection(DistanceMetric::Cosine) else {
        return;
    };
    c.upsert_many(&unit_vectors()).unwrap();
    let rows = c.search(&SearchRequest::browse().limit(10)).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.distance == -1.0));
    c.drop_table().unwrap();
}

#[test]
fn updates_and_deletes_narrow_to_their_rows() {
    let Some(c) = collection(DistanceMetric::Cosine) else {
        return;
    };
    c.upsert_many(&unit_vectors()).unwrap();
    c.update_by_id("1", None, Some(&json!({"name": "z"}))).unwrap();
    let one = c.get_by_id("1", &[]).unwrap().unwrap();
    assert_eq!(one.metadata, Some(json!({"name": "z"})));
    assert_eq!(one.embedding, Some(vec![1.0, 0.0, 0.0]));

    c.delete_by_metadata(&MetadataFilter::new().eq("name", "z"))
        .unwrap();
    c.delete_by_ids(&["2".to_string()]).unwrap();
    assert_eq!(c.count().unwrap(), 1);
    assert!(c.exists().unwrap());
    c.drop_table().unwrap();
    assert!(!c.exists().unwrap());
}
