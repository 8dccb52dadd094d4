/*!
Store télémétrie à pannes injectables

Enveloppe un `JsonStore` en mémoire ; les N prochaines insertions échouent
(ou toutes, tant que le store est marqué indisponible).
*/

use edge_kernel::models::{Rule, TelemetryRecord};
use edge_kernel::ports::{HistoryQuery, JsonStore, Page, RuleStore, StoreError, TelemetryStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use uuid::Uuid;

pub struct FlakyStore {
    inner: JsonStore,
    failures_left: AtomicUsize,
    down: AtomicBool,
    insert_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: JsonStore::in_memory(),
            failures_left: AtomicUsize::new(0),
            down: AtomicBool::new(false),
            insert_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_inserts(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Tout ce qui a été persisté, du plus ancien au plus récent
    pub fn stored(&self) -> Vec<TelemetryRecord> {
        let query = HistoryQuery { limit: usize::MAX, ..Default::default() };
        let mut records = self.inner.find(&query).map(|p| p.records).unwrap_or_default();
        records.reverse();
        records
    }

    fn injected_failure(&self) -> bool {
        if self.down.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore for FlakyStore {
    fn insert_many(&self, records: &[TelemetryRecord]) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.injected_failure() {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.inner.insert_many(records)
    }

    fn find(&self, query: &HistoryQuery) -> Result<Page, StoreError> {
        self.inner.find(query)
    }

    fn records_since(&self, since: OffsetDateTime) -> Result<Vec<TelemetryRecord>, StoreError> {
        self.inner.records_since(since)
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<TelemetryRecord>, StoreError> {
        self.inner.recent_alerts(limit)
    }
}

impl RuleStore for FlakyStore {
    fn list_rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.inner.list_rules()
    }

    fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, StoreError> {
        self.inner.get_rule(id)
    }

    fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        self.inner.upsert_rule(rule)
    }

    fn delete_rule(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_rule(id)
    }

    fn count_rules(&self) -> Result<usize, StoreError> {
        self.inner.count_rules()
    }
}
