//! End-to-end reconciliation: the job drives a mixed-version collection to
//! the target version while foreground traffic, outages, and cancellation
//! interfere.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use docmig::{FnStep, MigrationRegistry, RawDocument};
use docmig_reconcile::{ReconcileConfig, ReconcileJob};
use docmig_store::{
    DocumentStore, MemoryStore, Revision, ScanBatch, ScanPage, StoreError, StoreResult,
    StoredDocument,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn doc(v: Value) -> RawDocument {
    serde_json::from_value(v).unwrap()
}

/// v1 adds `v1: true`, v2 adds `v2: true`. v1 rejects poisoned documents.
fn registry() -> Arc<MigrationRegistry> {
    Arc::new(
        MigrationRegistry::builder()
            .step(FnStep::new(1, |mut d: RawDocument| {
                if d.contains_key("poison") {
                    return Err("poisoned document".into());
                }
                d.insert("v1".into(), Value::Bool(true));
                Ok(d)
            }))
            .step(FnStep::new(2, |mut d: RawDocument| {
                d.insert("v2".into(), Value::Bool(true));
                Ok(d)
            }))
            .target_version(2)
            .build()
            .unwrap(),
    )
}

fn fast_config() -> ReconcileConfig {
    ReconcileConfig {
        page_size: 10,
        concurrency: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
    }
}

async fn all_documents(store: &dyn DocumentStore) -> Vec<StoredDocument> {
    let mut documents = Vec::new();
    let mut after = None;
    loop {
        let batch = store
            .scan(&json!({}), ScanPage { after, limit: 50 })
            .await
            .unwrap();
        documents.extend(batch.documents);
        match batch.next {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }
    documents
}

fn assert_converged(stored: &StoredDocument) {
    assert_eq!(stored.doc["migrationVersion"], json!(2), "{}", stored.id);
    assert_eq!(stored.doc["v1"], json!(true), "{}", stored.id);
    assert_eq!(stored.doc["v2"], json!(true), "{}", stored.id);
}

#[tokio::test]
async fn converges_a_mixed_version_collection() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..60 {
        let raw = match i % 3 {
            0 => json!({"n": i}),
            1 => json!({"n": i, "migrationVersion": 0}),
            _ => json!({"n": i, "v1": true, "migrationVersion": 1}),
        };
        store.insert(&format!("d{i:03}"), doc(raw)).await.unwrap();
    }

    let job = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    let report = job.run().await;

    assert_eq!(report.migrated, 60);
    assert_eq!(report.failures, 0);
    assert!(!report.cancelled);

    for stored in all_documents(store.as_ref()).await {
        assert_converged(&stored);
        // Fields from the old shape are retained (additive steps).
        assert!(stored.doc.contains_key("n"));
    }
}

#[tokio::test]
async fn converged_collection_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert("d1", doc(json!({"v1": true, "v2": true, "migrationVersion": 2})))
        .await
        .unwrap();
    // Stamped by a newer release than this registry knows: left alone.
    store
        .insert("d2", doc(json!({"migrationVersion": 9})))
        .await
        .unwrap();

    let job = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    let report = job.run().await;

    assert_eq!(report.scanned, 0);
    assert_eq!(report.migrated, 0);
    assert_eq!(report.passes, 1);

    let d2 = store.get("d2").await.unwrap().unwrap();
    assert_eq!(d2.doc["migrationVersion"], json!(9));
}

#[tokio::test]
async fn rerunning_after_convergence_touches_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.insert("d1", doc(json!({"n": 1}))).await.unwrap();

    let job = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    job.run().await;
    let revision = store.get("d1").await.unwrap().unwrap().revision;

    let again = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    let report = again.run().await;
    assert_eq!(report.migrated, 0);
    assert_eq!(store.get("d1").await.unwrap().unwrap().revision, revision);
}

/// Wraps a store and, once, sneaks a foreground write in between the
/// job's read and its conditional write-back.
struct RacingStore {
    inner: Arc<MemoryStore>,
    raced: AtomicBool,
    foreground: RawDocument,
}

#[async_trait]
impl DocumentStore for RacingStore {
    async fn get(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(id).await
    }
    async fn insert(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.insert(id, doc).await
    }
    async fn put(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.put(id, doc).await
    }
    async fn put_if_revision(
        &self,
        id: &str,
        doc: RawDocument,
        expected: Revision,
    ) -> StoreResult<Revision> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner.put(id, self.foreground.clone()).await?;
        }
        self.inner.put_if_revision(id, doc, expected).await
    }
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete(id).await
    }
    async fn scan(&self, filter: &docmig::Filter, page: ScanPage) -> StoreResult<ScanBatch> {
        self.inner.scan(filter, page).await
    }
    async fn count_matching(&self, filter: &docmig::Filter) -> StoreResult<u64> {
        self.inner.count_matching(filter).await
    }
}

#[tokio::test]
async fn foreground_race_is_dropped_and_retried() {
    let inner = Arc::new(MemoryStore::new());
    inner.insert("d1", doc(json!({"n": 1}))).await.unwrap();

    // The foreground save rewrites the document but does not advance its
    // version, so it is still stale after the lost race.
    let store = Arc::new(RacingStore {
        inner: inner.clone(),
        raced: AtomicBool::new(false),
        foreground: doc(json!({"n": 2})),
    });

    let config = ReconcileConfig {
        concurrency: 1,
        ..fast_config()
    };
    let job = ReconcileJob::with_config(store, registry(), config);
    let report = job.run().await;

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.migrated, 1);
    assert!(report.passes >= 2);

    // No lost update and no half-merge: the final state is exactly the
    // foreground document, upgraded and stamped on the next pass.
    let stored = inner.get("d1").await.unwrap().unwrap();
    assert_converged(&stored);
    assert_eq!(stored.doc["n"], json!(2));
}

/// Fails the first few scans with `Unavailable`.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    outages_left: AtomicU32,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(id).await
    }
    async fn insert(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.insert(id, doc).await
    }
    async fn put(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.put(id, doc).await
    }
    async fn put_if_revision(
        &self,
        id: &str,
        doc: RawDocument,
        expected: Revision,
    ) -> StoreResult<Revision> {
        self.inner.put_if_revision(id, doc, expected).await
    }
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete(id).await
    }
    async fn scan(&self, filter: &docmig::Filter, page: ScanPage) -> StoreResult<ScanBatch> {
        if self
            .outages_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.scan(filter, page).await
    }
    async fn count_matching(&self, filter: &docmig::Filter) -> StoreResult<u64> {
        self.inner.count_matching(filter).await
    }
}

#[tokio::test]
async fn backs_off_through_an_outage_and_finishes() {
    let inner = Arc::new(MemoryStore::new());
    for i in 0..25 {
        inner
            .insert(&format!("d{i:02}"), doc(json!({"n": i})))
            .await
            .unwrap();
    }
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        outages_left: AtomicU32::new(3),
    });

    let job = ReconcileJob::with_config(store, registry(), fast_config());
    let report = job.run().await;

    assert_eq!(report.migrated, 25);
    assert!(!report.cancelled);
    for stored in all_documents(inner.as_ref()).await {
        assert_converged(&stored);
    }
}

/// Fails the first few conditional writes with `Unavailable`.
struct WriteOutageStore {
    inner: Arc<MemoryStore>,
    outages_left: AtomicU32,
}

#[async_trait]
impl DocumentStore for WriteOutageStore {
    async fn get(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(id).await
    }
    async fn insert(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.insert(id, doc).await
    }
    async fn put(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.put(id, doc).await
    }
    async fn put_if_revision(
        &self,
        id: &str,
        doc: RawDocument,
        expected: Revision,
    ) -> StoreResult<Revision> {
        if self
            .outages_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("write timeout".into()));
        }
        self.inner.put_if_revision(id, doc, expected).await
    }
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete(id).await
    }
    async fn scan(&self, filter: &docmig::Filter, page: ScanPage) -> StoreResult<ScanBatch> {
        self.inner.scan(filter, page).await
    }
    async fn count_matching(&self, filter: &docmig::Filter) -> StoreResult<u64> {
        self.inner.count_matching(filter).await
    }
}

#[tokio::test]
async fn write_outage_backs_off_and_still_converges() {
    let inner = Arc::new(MemoryStore::new());
    for i in 0..5 {
        inner
            .insert(&format!("d{i}"), doc(json!({"n": i})))
            .await
            .unwrap();
    }
    let store = Arc::new(WriteOutageStore {
        inner: inner.clone(),
        outages_left: AtomicU32::new(2),
    });

    let job = ReconcileJob::with_config(store, registry(), fast_config());
    let report = job.run().await;

    // A transient write-side outage is retried, never recorded as a
    // document failure, and never ends the run short of convergence.
    assert_eq!(report.migrated, 5);
    assert_eq!(report.failures, 0);
    assert!(!report.cancelled);
    for stored in all_documents(inner.as_ref()).await {
        assert_converged(&stored);
    }
}

/// Cancels the job's token after serving the first scan page.
struct CancellingStore {
    inner: Arc<MemoryStore>,
    token: OnceLock<CancellationToken>,
    pages: AtomicU32,
}

#[async_trait]
impl DocumentStore for CancellingStore {
    async fn get(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(id).await
    }
    async fn insert(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.insert(id, doc).await
    }
    async fn put(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        self.inner.put(id, doc).await
    }
    async fn put_if_revision(
        &self,
        id: &str,
        doc: RawDocument,
        expected: Revision,
    ) -> StoreResult<Revision> {
        self.inner.put_if_revision(id, doc, expected).await
    }
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete(id).await
    }
    async fn scan(&self, filter: &docmig::Filter, page: ScanPage) -> StoreResult<ScanBatch> {
        let batch = self.inner.scan(filter, page).await?;
        if self.pages.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(token) = self.token.get() {
                token.cancel();
            }
        }
        Ok(batch)
    }
    async fn count_matching(&self, filter: &docmig::Filter) -> StoreResult<u64> {
        self.inner.count_matching(filter).await
    }
}

#[tokio::test]
async fn cancellation_stops_at_a_page_boundary_without_partial_state() {
    let inner = Arc::new(MemoryStore::new());
    for i in 0..50 {
        inner
            .insert(&format!("d{i:02}"), doc(json!({"n": i})))
            .await
            .unwrap();
    }

    let store = Arc::new(CancellingStore {
        inner: inner.clone(),
        token: OnceLock::new(),
        pages: AtomicU32::new(0),
    });

    let job = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    store.token.set(job.cancellation_token()).unwrap();

    let report = job.run().await;
    assert!(report.cancelled);
    assert!(report.migrated < 50);

    // Every document is either untouched or fully migrated; nothing in
    // between.
    let mut migrated = 0;
    for stored in all_documents(inner.as_ref()).await {
        if stored.doc.contains_key("migrationVersion") {
            assert_converged(&stored);
            migrated += 1;
        } else {
            assert!(!stored.doc.contains_key("v1"));
            assert!(!stored.doc.contains_key("v2"));
        }
    }
    assert_eq!(migrated, report.migrated);

    // A fresh run picks up exactly where this one left off.
    let resume = ReconcileJob::with_config(inner.clone(), registry(), fast_config());
    let resumed = resume.run().await;
    assert_eq!(resumed.migrated, 50 - report.migrated);
    for stored in all_documents(inner.as_ref()).await {
        assert_converged(&stored);
    }
}

#[tokio::test]
async fn pre_cancelled_run_does_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.insert("d1", doc(json!({"n": 1}))).await.unwrap();

    let job = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    job.cancel();
    let report = job.run().await;

    assert!(report.cancelled);
    assert_eq!(report.migrated, 0);
    assert!(!store.get("d1").await.unwrap().unwrap().doc.contains_key("v1"));
}

#[tokio::test]
async fn failing_transform_is_skipped_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bad", doc(json!({"poison": true}))).await.unwrap();
    store.insert("good", doc(json!({"n": 1}))).await.unwrap();

    let job = ReconcileJob::with_config(store.clone(), registry(), fast_config());
    let report = job.run().await;

    assert_eq!(report.migrated, 1);
    // The poisoned document is re-scanned (and re-counted) once more on
    // the final pass before the run settles.
    assert!(report.failures >= 1);
    assert!(!report.cancelled);

    // The failing document's stored shape is untouched.
    let bad = store.get("bad").await.unwrap().unwrap();
    assert_eq!(bad.doc, doc(json!({"poison": true})));
    assert_converged(&store.get("good").await.unwrap().unwrap());
}
