/**
 * JSON STORE - Persistance locale de la télémétrie et des règles
 *
 * RÔLE :
 * Implémente TelemetryStore et RuleStore sur des fichiers locaux, adapté à
 * une passerelle edge sans base de données.
 *
 * FONCTIONNEMENT :
 * - telemetry.jsonl : un enregistrement par ligne, chaque lot écrit en un
 *   seul appel (append) ; un append interrompu est tronqué à sa taille d'avant
 * - Rétention : seuls les `retention` enregistrements les plus récents sont
 *   gardés en mémoire ; le fichier est compacté quand il dépasse la rétention
 *   de plus de 10%
 * - rules.json : tableau complet réécrit à chaque mutation
 * - Cache mémoire protégé par Mutex, fichiers rechargés au démarrage
 * - Mode mémoire (sans fichiers) pour les tests
 */

use super::{HistoryQuery, Page, RuleStore, StoreError, TelemetryStore};
use crate::models::{Rule, TelemetryRecord};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TELEMETRY_FILE: &str = "telemetry.jsonl";
const COMPACT_FILE: &str = "telemetry.jsonl.compact";
const RULES_FILE: &str = "rules.json";

/// Enregistrements de télémétrie conservés par défaut
pub const DEFAULT_RETENTION: usize = 50_000;

struct TelemetryCache {
    records: Vec<TelemetryRecord>,
    /// Lignes présentes dans telemetry.jsonl
    on_disk: usize,
}

pub struct JsonStore {
    /// Dossier de stockage (None = mémoire uniquement)
    data_dir: Option<PathBuf>,
    retention: usize,
    telemetry: Mutex<TelemetryCache>,
    rules: Mutex<Vec<Rule>>,
}

impl JsonStore {
    /// Ouvre (ou crée) le stockage dans `data_dir`
    pub fn open<P: Into<PathBuf>>(data_dir: P) -> Result<Self, StoreError> {
        Self::open_with_retention(data_dir, DEFAULT_RETENTION)
    }

    pub fn open_with_retention<P: Into<PathBuf>>(data_dir: P, retention: usize) -> Result<Self, StoreError> {
        let dir = data_dir.into();
        fs::create_dir_all(&dir)?;

        let records = load_telemetry(&dir.join(TELEMETRY_FILE))?;
        let rules = load_rules(&dir.join(RULES_FILE))?;
        info!(
            "json store opened at {:?} ({} records, {} rules)",
            dir,
            records.len(),
            rules.len()
        );

        let on_disk = records.len();
        let store = Self {
            data_dir: Some(dir),
            retention: retention.max(1),
            telemetry: Mutex::new(TelemetryCache { records, on_disk }),
            rules: Mutex::new(rules),
        };
        store.enforce_retention(&mut store.telemetry.lock())?;
        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self::in_memory_with_retention(DEFAULT_RETENTION)
    }

    pub fn in_memory_with_retention(retention: usize) -> Self {
        Self {
            data_dir: None,
            retention: retention.max(1),
            telemetry: Mutex::new(TelemetryCache { records: Vec::new(), on_disk: 0 }),
            rules: Mutex::new(Vec::new()),
        }
    }

    fn append_telemetry(&self, records: &[TelemetryRecord]) -> Result<(), StoreError> {
        let Some(dir) = &self.data_dir else { return Ok(()) };

        // Sérialise tout le lot avant d'écrire : un échec ne laisse rien sur disque
        let mut chunk = String::new();
        for record in records {
            chunk.push_str(&serde_json::to_string(record)?);
            chunk.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(TELEMETRY_FILE))?;
        append_or_rollback(&mut file, chunk.as_bytes())?;
        Ok(())
    }

    /// Garde les `retention` plus récents en mémoire, compacte le fichier
    /// au-delà de la marge
    fn enforce_retention(&self, cache: &mut TelemetryCache) -> Result<(), StoreError> {
        if cache.records.len() > self.retention {
            let excess = cache.records.len() - self.retention;
            cache.records.drain(..excess);
            debug!("retention: dropped {excess} oldest telemetry records");
        }

        let slack = (self.retention / 10).max(1);
        if cache.on_disk <= self.retention + slack {
            return Ok(());
        }
        if let Some(dir) = &self.data_dir {
            let tmp = dir.join(COMPACT_FILE);
            let mut content = String::new();
            for record in &cache.records {
                content.push_str(&serde_json::to_string(record)?);
                content.push('\n');
            }
            fs::write(&tmp, content)?;
            fs::rename(&tmp, dir.join(TELEMETRY_FILE))?;
            info!("telemetry file compacted to {} records", cache.records.len());
        }
        cache.on_disk = cache.records.len();
        Ok(())
    }

    fn save_rules(&self, rules: &[Rule]) -> Result<(), StoreError> {
        let Some(dir) = &self.data_dir else { return Ok(()) };
        let json = serde_json::to_string_pretty(rules)?;
        fs::write(dir.join(RULES_FILE), json)?;
        Ok(())
    }
}

/// Fichier tronquable à une longueur donnée
trait Truncate: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Écrit tout `chunk` ou rien : sur échec partiel le fichier revient à sa
/// longueur d'avant l'écriture
fn append_or_rollback<W: Truncate>(out: &mut W, chunk: &[u8]) -> io::Result<()> {
    let start = out.current_len()?;
    if let Err(e) = out.write_all(chunk) {
        if let Err(t) = out.truncate_to(start) {
            warn!("could not roll back partial telemetry append: {t}");
        }
        return Err(e);
    }
    Ok(())
}

fn load_telemetry(path: &Path) -> Result<Vec<TelemetryRecord>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryRecord>(line) {
            Ok(record) => records.push(record),
            // ligne tronquée (coupure pendant un append) : on saute
            Err(e) => warn!("skipping corrupt telemetry line {}: {}", n + 1, e),
        }
    }
    Ok(records)
}

fn load_rules(path: &Path) -> Result<Vec<Rule>, StoreError> {
    if !path.exists() {
        fs::write(path, "[]")?;
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut rules: Vec<Rule> = serde_json::from_str(&content)?;
    rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(rules)
}

impl TelemetryStore for JsonStore {
    fn insert_many(&self, records: &[TelemetryRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut cache = self.telemetry.lock();
        self.append_telemetry(records)?;
        cache.records.extend_from_slice(records);
        cache.on_disk += records.len();
        debug!("stored {} telemetry records", records.len());

        // le lot est déjà persisté : un échec de compactage n'est pas un échec d'insertion
        if let Err(e) = self.enforce_retention(&mut cache) {
            warn!("telemetry compaction failed: {e}");
        }
        Ok(())
    }

    fn find(&self, query: &HistoryQuery) -> Result<Page, StoreError> {
        let cache = self.telemetry.lock();
        let mut matching: Vec<&TelemetryRecord> = cache.records.iter().filter(|r| query.matches(r)).collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let records = matching
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .cloned()
            .collect();

        Ok(Page { records, total })
    }

    fn records_since(&self, since: OffsetDateTime) -> Result<Vec<TelemetryRecord>, StoreError> {
        let cache = self.telemetry.lock();
        Ok(cache.records.iter().filter(|r| r.timestamp >= since).cloned().collect())
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<TelemetryRecord>, StoreError> {
        let cache = self.telemetry.lock();
        let mut alerts: Vec<&TelemetryRecord> = cache.records.iter().filter(|r| !r.alerts.is_empty()).collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(alerts.into_iter().take(limit).cloned().collect())
    }
}

impl RuleStore for JsonStore {
    fn list_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self.rules.lock().clone())
    }

    fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, StoreError> {
        Ok(self.rules.lock().iter().find(|r| r.id == id).cloned())
    }

    fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        let mut rules = self.rules.lock();
        let mut next = rules.clone();
        match next.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => next.push(rule.clone()),
        }

        self.save_rules(&next)?;
        *rules = next;
        Ok(())
    }

    fn delete_rule(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut rules = self.rules.lock();
        let next: Vec<Rule> = rules.iter().filter(|r| r.id != id).cloned().collect();
        if next.len() == rules.len() {
            return Ok(false);
        }

        self.save_rules(&next)?;
        *rules = next;
        Ok(true)
    }

    fn count_rules(&self) -> Result<usize, StoreError> {
        Ok(self.rules.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Operator, TelemetrySample};
    use time::macros::datetime;

    fn record_at(ts: OffsetDateTime, gas: i32, alerts: Vec<String>) -> TelemetryRecord {
        let mut sample = TelemetrySample::empty(ts);
        sample.gas = gas;
        TelemetryRecord::from_sample(&sample, alerts)
    }

    fn rule(name: &str, created_at: OffsetDateTime) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            name: name.into(),
            sensor: "gas".into(),
            operator: Operator::Gt,
            threshold: 700,
            action: "buzzer_on".into(),
            enabled: true,
            description: String::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_find_paginates_newest_first() {
        let store = JsonStore::in_memory();
        let batch: Vec<_> = (0..5)
            .map(|i| record_at(datetime!(2025-03-01 10:00 UTC) + time::Duration::minutes(i), 100 + i as i32, vec![]))
            .collect();
        store.insert_many(&batch).unwrap();

        let page = store
            .find(&HistoryQuery { limit: 2, skip: 1, ..Default::default() })
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].gas, 103);
        assert_eq!(page.records[1].gas, 102);
    }

    #[test]
    fn test_find_filters_time_range() {
        let store = JsonStore::in_memory();
        store
            .insert_many(&[
                record_at(datetime!(2025-03-01 08:00 UTC), 1, vec![]),
                record_at(datetime!(2025-03-01 09:00 UTC), 2, vec![]),
                record_at(datetime!(2025-03-01 10:00 UTC), 3, vec![]),
            ])
            .unwrap();

        let page = store
            .find(&HistoryQuery {
                start: Some(datetime!(2025-03-01 08:30 UTC)),
                end: Some(datetime!(2025-03-01 10:00 UTC)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records[0].gas, 3);
    }

    #[test]
    fn test_recent_alerts_skips_quiet_records() {
        let store = JsonStore::in_memory();
        store
            .insert_many(&[
                record_at(datetime!(2025-03-01 08:00 UTC), 800, vec!["gas".into()]),
                record_at(datetime!(2025-03-01 09:00 UTC), 100, vec![]),
                record_at(datetime!(2025-03-01 10:00 UTC), 900, vec!["gas".into()]),
            ])
            .unwrap();

        let alerts = store.recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].gas, 900);
    }

    #[test]
    fn test_reopen_reloads_telemetry_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let created = datetime!(2025-03-01 08:00 UTC);
        {
            let store = JsonStore::open(dir.path()).unwrap();
            store
                .insert_many(&[record_at(created, 10, vec![]), record_at(created, 20, vec!["x".into()])])
                .unwrap();
            store.upsert_rule(&rule("second", created + time::Duration::seconds(1))).unwrap();
            store.upsert_rule(&rule("first", created)).unwrap();
        }

        let store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.find(&HistoryQuery::default()).unwrap().total, 2);
        let names: Vec<String> = store.list_rules().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_corrupt_telemetry_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStore::open(dir.path()).unwrap();
            store.insert_many(&[record_at(datetime!(2025-03-01 08:00 UTC), 10, vec![])]).unwrap();
        }
        let path = dir.path().join(TELEMETRY_FILE);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{\"id\":\"trunc");
        fs::write(&path, content).unwrap();

        let store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.find(&HistoryQuery::default()).unwrap().total, 1);
    }

    #[test]
    fn test_memory_cache_keeps_only_newest_records() {
        let store = JsonStore::in_memory_with_retention(3);
        let start = datetime!(2025-03-01 10:00 UTC);
        for i in 0..5 {
            store
                .insert_many(&[record_at(start + time::Duration::minutes(i), i as i32 + 1, vec![])])
                .unwrap();
        }

        let page = store.find(&HistoryQuery::default()).unwrap();
        assert_eq!(page.total, 3);
        let gases: Vec<i32> = page.records.iter().map(|r| r.gas).collect();
        assert_eq!(gases, vec![5, 4, 3]);
        assert_eq!(store.records_since(start).unwrap().len(), 3);
    }

    #[test]
    fn test_telemetry_file_is_compacted_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let start = datetime!(2025-03-01 10:00 UTC);
        let batch: Vec<_> = (0..12)
            .map(|i| record_at(start + time::Duration::minutes(i), i as i32 + 1, vec![]))
            .collect();
        {
            let store = JsonStore::open_with_retention(dir.path(), 10).unwrap();
            store.insert_many(&batch).unwrap();
            assert_eq!(store.find(&HistoryQuery::default()).unwrap().total, 10);
        }

        let content = fs::read_to_string(dir.path().join(TELEMETRY_FILE)).unwrap();
        assert_eq!(content.lines().count(), 10);
        assert!(!dir.path().join(COMPACT_FILE).exists());

        // rouvert avec une rétention plus courte : tronqué dès l'ouverture
        let store = JsonStore::open_with_retention(dir.path(), 4).unwrap();
        let page = store.find(&HistoryQuery::default()).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.records[0].gas, 12);
        assert_eq!(page.records[3].gas, 9);
    }

    /// Accepte `room` octets puis échoue
    struct ShortWriter {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for ShortWriter {
        fn current_len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_partial_append_is_rolled_back() {
        let mut out = ShortWriter { data: b"{\"gas\":1}\n".to_vec(), room: 12 };
        let err = append_or_rollback(&mut out, b"{\"gas\":2}\n{\"gas\":3}\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(out.data, b"{\"gas\":1}\n");

        out.room = 64;
        append_or_rollback(&mut out, b"{\"gas\":2}\n").unwrap();
        assert_eq!(out.data, b"{\"gas\":1}\n{\"gas\":2}\n");
    }

    #[test]
    fn test_upsert_replaces_and_delete_reports_missing() {
        let store = JsonStore::in_memory();
        let mut r = rule("gas", datetime!(2025-03-01 08:00 UTC));
        store.upsert_rule(&r).unwrap();
        r.threshold = 500;
        store.upsert_rule(&r).unwrap();

        assert_eq!(store.count_rules().unwrap(), 1);
        assert_eq!(store.get_rule(r.id).unwrap().unwrap().threshold, 500);
        assert!(store.delete_rule(r.id).unwrap());
        assert!(!store.delete_rule(r.id).unwrap());
    }
}
