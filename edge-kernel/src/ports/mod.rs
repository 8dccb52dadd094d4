/**
 * DATA PORTS - Interface de persistance du noyau edge
 *
 * RÔLE :
 * Définit les contrats que le noyau consomme pour stocker la télémétrie
 * et les règles. Le noyau ne connaît que ces traits, jamais le moteur.
 *
 * FONCTIONNEMENT :
 * - TelemetryStore = insertion en lot (tout ou rien), historique paginé,
 *   lecture de fenêtre pour les agrégations, alertes récentes
 * - RuleStore = CRUD des règles + comptage (bootstrap des règles par défaut)
 * - Appels synchrones et faillibles : pas de retry ici, c'est le buffer
 *   télémétrie qui décide de la reprise
 *
 * IMPLÉMENTATIONS :
 * - JsonStore : fichiers JSON locaux (ou mémoire pour les tests)
 */

pub mod analytics;
pub mod json_store;

pub use json_store::JsonStore;

use crate::models::{Rule, TelemetryRecord};
use time::OffsetDateTime;
use uuid::Uuid;

/// Erreurs possibles lors des opérations de persistance
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Requête d'historique : fenêtre temporelle optionnelle + pagination
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub limit: usize,
    pub skip: usize,
}

impl Default for HistoryQuery {
    /// 100 résultats max, les plus récents d'abord
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: 100,
            skip: 0,
        }
    }
}

impl HistoryQuery {
    pub fn matches(&self, record: &TelemetryRecord) -> bool {
        self.start.map_or(true, |s| record.timestamp >= s)
            && self.end.map_or(true, |e| record.timestamp <= e)
    }
}

/// Page de résultats avec le total avant pagination
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<TelemetryRecord>,
    pub total: usize,
}

/// Stockage de la télémétrie
pub trait TelemetryStore: Send + Sync {
    /// Insertion en lot, tout ou rien
    fn insert_many(&self, records: &[TelemetryRecord]) -> Result<(), StoreError>;

    /// Historique trié du plus récent au plus ancien
    fn find(&self, query: &HistoryQuery) -> Result<Page, StoreError>;

    /// Enregistrements depuis `since` (entrée des agrégations)
    fn records_since(&self, since: OffsetDateTime) -> Result<Vec<TelemetryRecord>, StoreError>;

    /// Derniers enregistrements portant au moins une alerte
    fn recent_alerts(&self, limit: usize) -> Result<Vec<TelemetryRecord>, StoreError>;
}

/// Stockage des règles
pub trait RuleStore: Send + Sync {
    /// Toutes les règles, ordre de création
    fn list_rules(&self) -> Result<Vec<Rule>, StoreError>;

    fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, StoreError>;

    /// Insère ou remplace par id
    fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError>;

    /// Retourne false si l'id n'existait pas
    fn delete_rule(&self, id: Uuid) -> Result<bool, StoreError>;

    fn count_rules(&self) -> Result<usize, StoreError>;
}
