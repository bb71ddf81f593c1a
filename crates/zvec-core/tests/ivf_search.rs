//! End-to-end IVF pipeline: build, persist, load, search.

use std::sync::Arc;

use zvec_core::constants::{INVALID_KEY, IVF_KEYS_SEG_ID};
use zvec_core::ivf::{
    load_centroids, CentroidSearcher, IvfBuilder, IvfBuilderOptions, IvfEntity, IvfSearcher,
    IvfSearcherContext, SearchStats, TopkHeap,
};
use zvec_core::meta::{DataType, IndexMeta, MetricKind, Params};
use zvec_core::storage::{IndexStorage, MemIndexStorage, MmapIndexStorage};
use zvec_core::Bitmap;

const DIM: usize = 4;

fn cluster_centroids() -> Vec<Vec<f32>> {
    vec![
        vec![0.0, 0.0, 0.0, 0.0],
        vec![10.0, 10.0, 10.0, 10.0],
        vec![-10.0, 10.0, -10.0, 10.0],
    ]
}

/// 60 keys spread over three clusters; key k sits near cluster `k % 3`.
fn build_f32_index() -> (MemIndexStorage, Vec<(u64, Vec<f32>)>) {
    let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Fp32, DIM);
    let mut builder =
        IvfBuilder::new(meta, cluster_centroids(), IvfBuilderOptions::default()).unwrap();

    let mut rows = Vec::new();
    for k in 0..60u64 {
        let centroid = &cluster_centroids()[(k % 3) as usize];
        let jitter = (k as f32) * 0.003;
        let vector: Vec<f32> = centroid.iter().map(|c| c + jitter).collect();
        builder.add(k, &vector).unwrap();
        rows.push((k, vector));
    }
    (builder.build().unwrap(), rows)
}

fn make_searcher(storage: &dyn IndexStorage) -> (Arc<IvfEntity>, IvfSearcher) {
    let entity = Arc::new(IvfEntity::load(storage).unwrap());
    let centroids = load_centroids(storage, DIM).unwrap();
    let searcher = IvfSearcher::new(
        Arc::clone(&entity),
        CentroidSearcher::new(centroids, DIM, entity.metric()).unwrap(),
    )
    .unwrap();
    (entity, searcher)
}

fn true_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[test]
fn test_scan_completeness_over_all_lists() {
    let (storage, _) = build_f32_index();
    let entity = Arc::new(IvfEntity::load(&storage).unwrap());

    let query = vec![0.0f32; DIM];
    let mut reformer = entity.make_reformer();
    let qdata = reformer.transform(&query, DIM).unwrap();

    let mut heap = TopkHeap::new(1000);
    let mut stats = SearchStats::default();
    let mut scanned = 0u32;
    for list_id in 0..entity.inverted_list_count() {
        scanned += entity
            .search(list_id, &qdata, None, &mut heap, &mut stats)
            .unwrap();
    }
    assert_eq!(scanned as usize, entity.vector_count());
    assert_eq!(stats.dist_calced_count, 60);
    assert_eq!(stats.filtered_count, 0);
}

#[test]
fn test_topk_results_are_exact_nearest() {
    let (storage, rows) = build_f32_index();
    let (entity, searcher) = make_searcher(&storage);

    let query = vec![0.1f32, 0.1, 0.1, 0.1];
    let mut ctx = IvfSearcherContext::new(Arc::clone(&entity));
    ctx.set_topk(5);
    searcher.search(&mut ctx, &query, None).unwrap();

    let results = ctx.result(0);
    assert_eq!(results.len(), 5);

    // Scores ascend and match the true metric (identity normalizer).
    for pair in results.windows(2) {
        assert!(pair[0].score <= pair[1].score);
    }
    let mut expected: Vec<(u64, f32)> = rows
        .iter()
        .map(|(k, v)| (*k, true_euclidean(v, &query)))
        .collect();
    expected.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
    for (doc, (key, score)) in results.iter().zip(expected.iter()) {
        assert_eq!(doc.key, *key);
        assert!((doc.score - score).abs() < 1e-4, "{} vs {score}", doc.score);
    }
}

#[test]
fn test_filter_excludes_keys_and_counts() {
    let (storage, _) = build_f32_index();
    let (entity, searcher) = make_searcher(&storage);

    // Filter out every key congruent to 0 mod 3 (the cluster the query
    // sits in).
    let filter: Bitmap = (0..60usize).filter(|k| k % 3 == 0).collect();

    let query = vec![0.0f32; DIM];
    let mut ctx = IvfSearcherContext::new(Arc::clone(&entity));
    ctx.set_topk(10);
    searcher.search(&mut ctx, &query, Some(&filter)).unwrap();

    for doc in ctx.result(0) {
        assert_ne!(doc.key % 3, 0, "filtered key {} leaked", doc.key);
    }
    assert!(ctx.stats(0).filtered_count > 0);
}

#[test]
fn test_scan_ratio_one_matches_exhaustive() {
    let (storage, rows) = build_f32_index();
    let (entity, searcher) = make_searcher(&storage);

    let mut params = Params::new();
    params.set_f32(zvec_core::constants::PARAM_IVF_SEARCHER_SCAN_RATIO, 1.0);
    params.set_u32(
        zvec_core::constants::PARAM_IVF_SEARCHER_BRUTE_FORCE_THRESHOLD,
        1,
    );
    let mut ctx = searcher.create_context(&params).unwrap();
    assert_eq!(ctx.centroid_topk(), entity.inverted_list_count());
    ctx.set_topk(3);

    let query = vec![9.9f32, 9.9, 9.9, 9.9];
    searcher.search(&mut ctx, &query, None).unwrap();

    let mut expected: Vec<(u64, f32)> = rows
        .iter()
        .map(|(k, v)| (*k, true_euclidean(v, &query)))
        .collect();
    expected.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
    let got: Vec<u64> = ctx.result(0).iter().map(|d| d.key).collect();
    let want: Vec<u64> = expected.iter().take(3).map(|(k, _)| *k).collect();
    assert_eq!(got, want);
}

#[test]
fn test_invalid_scan_ratio_rejected() {
    let (storage, _) = build_f32_index();
    let (entity, _) = make_searcher(&storage);

    let mut params = Params::new();
    params.set_f32(zvec_core::constants::PARAM_IVF_SEARCHER_SCAN_RATIO, 0.0);
    assert!(IvfSearcherContext::with_params(entity, &params).is_err());
}

#[test]
fn test_mmap_round_trip_matches_memory() {
    let (storage, _) = build_f32_index();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.zvst");
    storage.dump(&path).unwrap();

    let mapped = MmapIndexStorage::open(&path).unwrap();
    let (mem_entity, mem_searcher) = make_searcher(&storage);
    let (mapped_entity, mapped_searcher) = make_searcher(&mapped);

    assert_eq!(mem_entity.vector_count(), mapped_entity.vector_count());

    let query = vec![-9.0f32, 9.0, -9.0, 9.0];
    let mut mem_ctx = IvfSearcherContext::new(mem_entity);
    mem_ctx.set_topk(4);
    mem_searcher.search(&mut mem_ctx, &query, None).unwrap();

    let mut mapped_ctx = IvfSearcherContext::new(mapped_entity);
    mapped_ctx.set_topk(4);
    mapped_searcher.search(&mut mapped_ctx, &query, None).unwrap();

    let mem_keys: Vec<u64> = mem_ctx.result(0).iter().map(|d| d.key).collect();
    let mapped_keys: Vec<u64> = mapped_ctx.result(0).iter().map(|d| d.key).collect();
    assert_eq!(mem_keys, mapped_keys);
}

#[test]
fn test_tombstoned_key_is_skipped() {
    let (storage, _) = build_f32_index();

    // Tombstone key 0 by overwriting its key slot in the keys segment.
    let keys_seg = storage.get(IVF_KEYS_SEG_ID).unwrap();
    let mut keys = keys_seg.read(0, keys_seg.data_size()).unwrap().to_vec();
    let victim = 0usize;
    keys[victim * 8..victim * 8 + 8].copy_from_slice(&INVALID_KEY.to_le_bytes());
    let mut patched = MemIndexStorage::new();
    for seg_id in [
        "inverted_header",
        "inverted_body",
        "inverted_meta",
        "offsets",
        "mapping",
        "centroids",
    ] {
        let seg = storage.get(seg_id).unwrap();
        patched.put(seg_id, seg.read(0, seg.data_size()).unwrap());
    }
    patched.put(IVF_KEYS_SEG_ID, keys);

    let (entity, searcher) = make_searcher(&patched);
    let query = vec![0.0f32; DIM];
    let mut ctx = IvfSearcherContext::new(Arc::clone(&entity));
    ctx.set_topk(60);
    searcher.search(&mut ctx, &query, None).unwrap();

    // Physical id 0 held key 0 (first record of the first list); the
    // tombstoned record no longer surfaces.
    assert!(ctx.result(0).iter().all(|d| d.key != 0));
    assert_eq!(ctx.result(0).len(), 59);
}

#[test]
fn test_fetch_vector_attaches_payload() {
    let (storage, rows) = build_f32_index();
    let (entity, searcher) = make_searcher(&storage);

    let query = vec![10.0f32, 10.0, 10.0, 10.0];
    let mut ctx = IvfSearcherContext::new(Arc::clone(&entity));
    ctx.set_topk(2);
    ctx.set_fetch_vector(true);
    searcher.search(&mut ctx, &query, None).unwrap();

    for doc in ctx.result(0) {
        let bytes = doc.vector.as_ref().expect("vector payload");
        assert_eq!(bytes.len(), DIM * 4);
        let decoded: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let original = &rows.iter().find(|(k, _)| *k == doc.key).unwrap().1;
        assert_eq!(&decoded, original);
    }
}

#[test]
fn test_get_vector_by_key_column_major_reassembly() {
    let (storage, rows) = build_f32_index();
    let entity = IvfEntity::load(&storage).unwrap();

    for (key, vector) in rows.iter().take(10) {
        let bytes = entity.get_vector_by_key(*key).unwrap();
        let decoded: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(&decoded, vector, "key {key}");
    }
    assert!(entity.get_vector_by_key(12_345).is_err());
}

#[test]
fn test_clone_entity_serves_same_results() {
    let (storage, _) = build_f32_index();
    let entity = IvfEntity::load(&storage).unwrap();
    let clone = entity.clone_entity();

    let query = vec![0.0f32; DIM];
    let mut reformer = entity.make_reformer();
    let qdata = reformer.transform(&query, DIM).unwrap();

    let mut heap_a = TopkHeap::new(5);
    let mut heap_b = TopkHeap::new(5);
    let mut stats = SearchStats::default();
    entity
        .search(0, &qdata, None, &mut heap_a, &mut stats)
        .unwrap();
    clone
        .search(0, &qdata, None, &mut heap_b, &mut stats)
        .unwrap();
    heap_a.sort();
    heap_b.sort();
    let keys_a: Vec<u64> = heap_a.iter().map(|d| d.key).collect();
    let keys_b: Vec<u64> = heap_b.iter().map(|d| d.key).collect();
    assert_eq!(keys_a, keys_b);
}

#[test]
fn test_int8_quantized_pipeline_recovers_distances() {
    let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Int8, DIM);
    let centroids = vec![vec![0.0; DIM], vec![1.0; DIM]];
    let mut builder =
        IvfBuilder::new(meta, centroids.clone(), IvfBuilderOptions::default()).unwrap();

    let mut rows = Vec::new();
    for k in 0..48u64 {
        let base = if k % 2 == 0 { 0.0f32 } else { 1.0 };
        let jitter = (k as f32) * 0.004;
        let vector: Vec<f32> = (0..DIM).map(|d| base + jitter + (d as f32) * 0.01).collect();
        builder.add(k, &vector).unwrap();
        rows.push((k, vector));
    }
    let storage = builder.build().unwrap();
    let entity = Arc::new(IvfEntity::load(&storage).unwrap());
    let flat: Vec<f32> = centroids.into_iter().flatten().collect();
    let searcher = IvfSearcher::new(
        Arc::clone(&entity),
        CentroidSearcher::new(flat, DIM, MetricKind::Euclidean).unwrap(),
    )
    .unwrap();

    let query = vec![0.02f32, 0.03, 0.04, 0.05];
    let mut ctx = IvfSearcherContext::new(Arc::clone(&entity));
    ctx.set_topk(3);
    searcher.search(&mut ctx, &query, None).unwrap();

    let results = ctx.result(0);
    assert_eq!(results.len(), 3);

    // Scores approximate the true Euclidean distance after per-list
    // denormalization, within the quantization step.
    let mut expected: Vec<(u64, f32)> = rows
        .iter()
        .map(|(k, v)| (*k, true_euclidean(v, &query)))
        .collect();
    expected.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
    for doc in results {
        let want = expected.iter().find(|(k, _)| *k == doc.key).unwrap().1;
        assert!(
            (doc.score - want).abs() < 0.2,
            "key {} score {} want {want}",
            doc.key,
            doc.score
        );
    }
}
