/**
 * RULE ENGINE - Règles seuil → alerte + action
 *
 * RÔLE :
 * Évalue chaque échantillon de télémétrie contre les règles actives et
 * produit les alertes (texte) et les actions (identifiants) déclenchées.
 *
 * FONCTIONNEMENT :
 * - Règles lues depuis le RuleStore, gardées en cache jusqu'à la prochaine
 *   mutation (create/update/delete invalident le cache)
 * - Compteur de génération : un chargement commencé avant une mutation
 *   n'installe jamais son résultat dans le cache
 * - Ordre d'évaluation = ordre de création ; pas de dédoublonnage des
 *   actions, deux règles sur "buzzer_on" envoient deux fois la commande
 * - Seed des 4 règles par défaut au premier démarrage (store vide)
 */

use crate::error::{EdgeError, EdgeResult};
use crate::models::{NewRule, Operator, Rule, RulePatch, TelemetrySample};
use crate::ports::{RuleStore, StoreError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Résultat d'une évaluation : alertes et actions, dans l'ordre des règles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub alerts: Vec<String>,
    pub actions: Vec<String>,
}

pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    cache: RwLock<Option<Arc<Vec<Rule>>>>,
    generation: AtomicU64,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Une erreur de lecture des règles donne une évaluation vide
    pub fn evaluate(&self, sample: &TelemetrySample) -> Evaluation {
        let rules = match self.active_rules() {
            Ok(rules) => rules,
            Err(e) => {
                warn!("rules unavailable, skipping evaluation: {e}");
                return Evaluation::default();
            }
        };

        let mut evaluation = Evaluation::default();
        for rule in rules.iter().filter(|r| r.enabled) {
            let Some(value) = sample.channel(&rule.sensor) else {
                debug!("rule '{}' targets unknown channel '{}'", rule.name, rule.sensor);
                continue;
            };
            if rule.operator.apply(value, rule.threshold) {
                evaluation.alerts.push(format_alert(rule, value));
                evaluation.actions.push(rule.action.clone());
            }
        }
        evaluation
    }

    fn active_rules(&self) -> Result<Arc<Vec<Rule>>, StoreError> {
        if let Some(rules) = self.cache.read().as_ref() {
            return Ok(Arc::clone(rules));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let rules = Arc::new(self.store.list_rules()?);

        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *cache = Some(Arc::clone(&rules));
        }
        Ok(rules)
    }

    fn invalidate(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
    }

    pub fn list(&self) -> EdgeResult<Vec<Rule>> {
        Ok(self.store.list_rules()?)
    }

    pub fn create(&self, new_rule: NewRule) -> EdgeResult<Rule> {
        let now = OffsetDateTime::now_utc();
        let rule = Rule {
            id: Uuid::new_v4(),
            name: new_rule.name,
            sensor: new_rule.sensor,
            operator: new_rule.operator,
            threshold: new_rule.threshold,
            action: new_rule.action,
            enabled: new_rule.enabled,
            description: new_rule.description,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_rule(&rule)?;
        self.invalidate();
        info!("rule created: {} ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub fn update(&self, id: &str, patch: RulePatch) -> EdgeResult<Rule> {
        let id = parse_id(id)?;
        let mut rule = self
            .store
            .get_rule(id)?
            .ok_or_else(|| EdgeError::NotFound(id.to_string()))?;

        patch.apply_to(&mut rule);
        rule.updated_at = OffsetDateTime::now_utc();
        self.store.upsert_rule(&rule)?;
        self.invalidate();
        info!("rule updated: {} ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub fn delete(&self, id: &str) -> EdgeResult<()> {
        let id = parse_id(id)?;
        if !self.store.delete_rule(id)? {
            return Err(EdgeError::NotFound(id.to_string()));
        }
        self.invalidate();
        info!("rule deleted: {id}");
        Ok(())
    }

    /// Premier démarrage : seed uniquement si aucune règle n'existe.
    /// Vérification puis écriture non atomiques, course tolérée.
    pub fn seed_default_rules(&self) -> EdgeResult<usize> {
        if self.store.count_rules()? > 0 {
            return Ok(0);
        }
        let defaults = default_rules();
        let count = defaults.len();
        for rule in defaults {
            self.create(rule)?;
        }
        info!("seeded {count} default rules");
        Ok(count)
    }
}

fn parse_id(id: &str) -> EdgeResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| EdgeError::InvalidIdentifier(id.to_string()))
}

fn format_alert(rule: &Rule, value: i32) -> String {
    format!(
        "{}: {} {} {} (current: {})",
        rule.name, rule.sensor, rule.operator, rule.threshold, value
    )
}

pub fn default_rules() -> Vec<NewRule> {
    let rule = |name: &str, sensor: &str, operator, threshold, action: &str, description: &str| NewRule {
        name: name.into(),
        sensor: sensor.into(),
        operator,
        threshold,
        action: action.into(),
        enabled: true,
        description: description.into(),
    };

    vec![
        rule(
            "Gas Danger Alert",
            "gas",
            Operator::Gt,
            700,
            "buzzer_on",
            "Sound the buzzer when gas concentration is dangerous",
        ),
        rule(
            "Rain Detection - Close Window",
            "water",
            Operator::Gt,
            800,
            "window_close",
            "Close the window when rain is detected",
        ),
        rule(
            "Low Soil Moisture Alert",
            "soil",
            Operator::Gt,
            50,
            "buzzer_on",
            "Sound the buzzer when the soil is too dry",
        ),
        rule(
            "Auto Light - Low Light Detection",
            "light",
            Operator::Lt,
            300,
            "white_light_on",
            "Turn on the white light when ambient light is low",
        ),
    ]
}
