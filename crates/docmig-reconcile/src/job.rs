use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docmig::{version_below, Filter, MigrationRegistry};
use docmig_store::{DocumentStore, ScanBatch, ScanPage, StoreError, StoredDocument};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pacing knobs for a reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Documents fetched per scan page.
    pub page_size: usize,
    /// Maximum in-flight document rewrites. Bounds the extra load the job
    /// puts on the store.
    pub concurrency: usize,
    /// First delay after the store reports itself unavailable.
    pub initial_backoff: Duration,
    /// Backoff ceiling; delays double up to this.
    pub max_backoff: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            concurrency: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Live counters, observable while the job runs.
#[derive(Debug, Default)]
pub struct ReconcileProgress {
    scanned: AtomicU64,
    migrated: AtomicU64,
    conflicts: AtomicU64,
    failures: AtomicU64,
}

impl ReconcileProgress {
    /// Stale documents fetched so far.
    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }

    /// Documents successfully rewritten to the target version.
    pub fn migrated(&self) -> u64 {
        self.migrated.load(Ordering::Relaxed)
    }

    /// Conditional writes dropped because a foreground write won the race.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Documents skipped because a transform or write failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Final accounting of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: u64,
    pub migrated: u64,
    pub conflicts: u64,
    pub failures: u64,
    /// Full scans performed.
    pub passes: u32,
    /// Whether the run stopped at a cancellation point rather than at
    /// convergence.
    pub cancelled: bool,
}

/// Per-document result inside a pass.
enum DocOutcome {
    Migrated,
    Conflict,
    Failed,
}

#[derive(Default)]
struct PassStats {
    migrated: u64,
    conflicts: u64,
    interrupted: bool,
}

/// The background job that converges every stored document to the
/// registry's target version.
///
/// Each pass pages through the documents whose `migrationVersion` is
/// absent or below target, upgrades each in memory via the registry,
/// stamps it, and writes it back conditionally on the revision read with
/// it. Lost races are dropped and re-scanned. Passes repeat until a pass
/// neither migrates nor conflicts on anything.
///
/// The run is idempotent and crash-safe: each document transition is a
/// single atomic write, and re-running only touches documents still below
/// target. Cancellation (via [`cancel`](Self::cancel) or the token from
/// [`cancellation_token`](Self::cancellation_token)) takes effect at page
/// boundaries; in-flight document writes finish first.
pub struct ReconcileJob {
    store: Arc<dyn DocumentStore>,
    registry: Arc<MigrationRegistry>,
    config: ReconcileConfig,
    progress: Arc<ReconcileProgress>,
    cancel: CancellationToken,
}

impl ReconcileJob {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<MigrationRegistry>) -> Self {
        Self::with_config(store, registry, ReconcileConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn DocumentStore>,
        registry: Arc<MigrationRegistry>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            progress: Arc::new(ReconcileProgress::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Counters updated live while [`run`](Self::run) executes; clone the
    /// handle into whatever reports operational progress.
    pub fn progress(&self) -> Arc<ReconcileProgress> {
        Arc::clone(&self.progress)
    }

    /// A token that stops the run at the next page boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request the run to stop at the next page boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drive the collection to convergence (or until cancelled).
    ///
    /// Store outages — on the scan or on a write-back — are retried with
    /// capped exponential backoff; they never abort the run. Per-document
    /// transform failures are counted, logged, and skipped.
    pub async fn run(&self) -> ReconcileReport {
        let filter = version_below(self.registry.target_version());
        let mut passes = 0u32;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            passes += 1;
            let stats = self.run_pass(&filter).await;
            tracing::info!(
                pass = passes,
                migrated = stats.migrated,
                conflicts = stats.conflicts,
                "reconciliation pass complete"
            );
            if stats.interrupted {
                cancelled = true;
                break;
            }
            // Converged: nothing left that this pass could or should
            // still move. Documents whose transform fails stay put until
            // an operator ships a fixed step.
            if stats.migrated == 0 && stats.conflicts == 0 {
                break;
            }
        }

        ReconcileReport {
            scanned: self.progress.scanned(),
            migrated: self.progress.migrated(),
            conflicts: self.progress.conflicts(),
            failures: self.progress.failures(),
            passes,
            cancelled,
        }
    }

    async fn run_pass(&self, filter: &Filter) -> PassStats {
        let concurrency = self.config.concurrency.max(1);
        let mut stats = PassStats::default();
        let mut workers: JoinSet<DocOutcome> = JoinSet::new();
        let mut after: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                stats.interrupted = true;
                break;
            }
            let Some(batch) = self.next_page(filter, after.take()).await else {
                stats.interrupted = true;
                break;
            };

            for stored in batch.documents {
                self.progress.scanned.fetch_add(1, Ordering::Relaxed);
                while workers.len() >= concurrency {
                    self.absorb(workers.join_next().await, &mut stats);
                }
                workers.spawn(migrate_one(
                    Arc::clone(&self.store),
                    Arc::clone(&self.registry),
                    stored,
                    self.config.clone(),
                    self.cancel.clone(),
                ));
            }

            match batch.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        while !workers.is_empty() {
            self.absorb(workers.join_next().await, &mut stats);
        }
        stats
    }

    fn absorb(
        &self,
        joined: Option<Result<DocOutcome, tokio::task::JoinError>>,
        stats: &mut PassStats,
    ) {
        match joined {
            Some(Ok(DocOutcome::Migrated)) => {
                stats.migrated += 1;
                self.progress.migrated.fetch_add(1, Ordering::Relaxed);
            }
            Some(Ok(DocOutcome::Conflict)) => {
                stats.conflicts += 1;
                self.progress.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            Some(Ok(DocOutcome::Failed)) | Some(Err(_)) => {
                self.progress.failures.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
    }

    /// Fetch one scan page, backing off while the store is unavailable.
    /// Returns `None` only when cancelled mid-backoff.
    async fn next_page(&self, filter: &Filter, after: Option<String>) -> Option<ScanBatch> {
        let mut delay = self.config.initial_backoff;
        loop {
            let page = ScanPage {
                after: after.clone(),
                limit: self.config.page_size,
            };
            match self.store.scan(filter, page).await {
                Ok(batch) => return Some(batch),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "scan failed, backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(self.config.max_backoff);
                }
            }
        }
    }
}

/// Upgrade, stamp, and conditionally write back one document.
///
/// A store outage on the write-back is transient, so it is retried with
/// the same capped backoff as the scan path rather than counted against
/// the document.
async fn migrate_one(
    store: Arc<dyn DocumentStore>,
    registry: Arc<MigrationRegistry>,
    stored: StoredDocument,
    config: ReconcileConfig,
    cancel: CancellationToken,
) -> DocOutcome {
    let mut upgraded = match registry.read_upgrade(&stored.doc) {
        Ok(doc) => doc,
        Err(err) => {
            tracing::warn!(id = %stored.id, error = %err, "transform failed, skipping document");
            return DocOutcome::Failed;
        }
    };
    registry.write_stamp(&mut upgraded);

    let mut delay = config.initial_backoff;
    loop {
        match store
            .put_if_revision(&stored.id, upgraded.clone(), stored.revision)
            .await
        {
            Ok(_) => {
                tracing::debug!(id = %stored.id, "document reconciled");
                return DocOutcome::Migrated;
            }
            // A foreground write (or delete) won the race; the re-scan
            // picks the document up again if it is still stale.
            Err(StoreError::RevisionMismatch { .. }) | Err(StoreError::NotFound { .. }) => {
                tracing::debug!(id = %stored.id, "concurrent write won, dropping");
                return DocOutcome::Conflict;
            }
            Err(err @ StoreError::Unavailable(_)) => {
                tracing::warn!(
                    id = %stored.id,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "write-back failed, backing off"
                );
                tokio::select! {
                    // Dropped like a lost race: the document is still
                    // stale and the next run re-scans it.
                    _ = cancel.cancelled() => return DocOutcome::Conflict,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(config.max_backoff);
            }
            Err(err) => {
                tracing::warn!(id = %stored.id, error = %err, "write-back rejected, skipping document");
                return DocOutcome::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = ReconcileConfig::default();
        assert!(config.page_size > 0);
        assert!(config.concurrency > 0);
        assert!(config.initial_backoff < config.max_backoff);
    }
}
