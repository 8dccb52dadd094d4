use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Canaux capteurs adressables depuis les règles et l'API analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorChannel {
    Light,
    Gas,
    Soil,
    Water,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 4] = [
        SensorChannel::Light,
        SensorChannel::Gas,
        SensorChannel::Soil,
        SensorChannel::Water,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorChannel::Light => "light",
            SensorChannel::Gas => "gas",
            SensorChannel::Soil => "soil",
            SensorChannel::Water => "water",
        }
    }
}

impl FromStr for SensorChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(SensorChannel::Light),
            "gas" => Ok(SensorChannel::Gas),
            "soil" => Ok(SensorChannel::Soil),
            "water" => Ok(SensorChannel::Water),
            other => Err(format!("invalid sensor type: {other}")),
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lecture temps réel décodée depuis une ligne de télémétrie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub gas: i32,
    pub light: i32,
    pub soil: i32,
    pub water: i32,
    pub infrared: i32,
    pub btn1: i32,
    pub btn2: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl TelemetrySample {
    pub fn empty(timestamp: OffsetDateTime) -> Self {
        Self {
            gas: 0,
            light: 0,
            soil: 0,
            water: 0,
            infrared: 0,
            btn1: 0,
            btn2: 0,
            timestamp,
        }
    }

    /// Tous les canaux principaux à zéro : bruit de la carte, jamais stocké
    pub fn is_noise(&self) -> bool {
        self.gas == 0 && self.light == 0 && self.soil == 0 && self.water == 0
    }

    pub fn value(&self, channel: SensorChannel) -> i32 {
        match channel {
            SensorChannel::Light => self.light,
            SensorChannel::Gas => self.gas,
            SensorChannel::Soil => self.soil,
            SensorChannel::Water => self.water,
        }
    }

    /// Valeur d'un canal par son nom de règle (None si canal inconnu)
    pub fn channel(&self, name: &str) -> Option<i32> {
        name.parse::<SensorChannel>().ok().map(|c| self.value(c))
    }
}

/// Enregistrement persisté : échantillon + alertes déclenchées
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub light: i32,
    pub gas: i32,
    pub soil: i32,
    pub water: i32,
    pub infrared: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<String>,
}

impl TelemetryRecord {
    pub fn from_sample(sample: &TelemetrySample, alerts: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            light: sample.light,
            gas: sample.gas,
            soil: sample.soil,
            water: sample.water,
            infrared: sample.infrared,
            timestamp: sample.timestamp,
            alerts,
        }
    }

    pub fn value(&self, channel: SensorChannel) -> i32 {
        match channel {
            SensorChannel::Light => self.light,
            SensorChannel::Gas => self.gas,
            SensorChannel::Soil => self.soil,
            SensorChannel::Water => self.water,
        }
    }
}

/// Dernier état connu des actionneurs (une seule instance par lien)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub white_light: bool,
    pub yellow_light: bool,
    pub relay: bool,
    pub door_angle: i32,
    pub window_angle: i32,
    pub fan: bool,
    pub fan_speed: i32,
    pub buzzer: bool,
}

/// Opérateur de comparaison d'une règle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl Operator {
    pub fn apply(&self, value: i32, threshold: i32) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Ge => value >= threshold,
            Operator::Le => value <= threshold,
            Operator::Eq => value == threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Eq => "==",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Règle d'automatisation persistée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub sensor: String,
    pub operator: Operator,
    pub threshold: i32,
    pub action: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "createdAt", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(rename = "updatedAt", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Données de création d'une règle (id et horodatages générés)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub sensor: String,
    pub operator: Operator,
    pub threshold: i32,
    pub action: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn enabled_by_default() -> bool {
    true
}

/// Patch partiel : seuls les champs présents sont modifiés
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub sensor: Option<String>,
    pub operator: Option<Operator>,
    pub threshold: Option<i32>,
    pub action: Option<String>,
    pub enabled: Option<bool>,
    pub description: Option<String>,
}

impl RulePatch {
    pub fn apply_to(self, rule: &mut Rule) {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(sensor) = self.sensor {
            rule.sensor = sensor;
        }
        if let Some(operator) = self.operator {
            rule.operator = operator;
        }
        if let Some(threshold) = self.threshold {
            rule.threshold = threshold;
        }
        if let Some(action) = self.action {
            rule.action = action;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
    }
}

/// Statistiques agrégées sur une fenêtre glissante
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_max: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_max: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_max: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_max: Option<i32>,
    pub count: usize,
}

/// Moyennes horaires (clé "YYYY-MM-DD HH:00")
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub hour: String,
    pub light: f64,
    pub gas: f64,
    pub soil: f64,
    pub water: f64,
    pub count: usize,
}
