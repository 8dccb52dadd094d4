/**
 * ACTUATOR SHADOW - Dernier état connu des actionneurs
 *
 * Deux sources de mutation :
 * - les échos texte de la carte (mise à jour partielle, best effort)
 * - la synchro explicite depuis le frontend (champ + valeur JSON)
 *
 * Les échos passent par deux tables ordonnées plutôt qu'une cascade de if :
 * - SWITCH_TABLE : première entrée dont tous les fragments matchent gagne
 * - ANGLE_TABLE : chaque mot-clé est suivi du premier nombre trouvé après lui
 */

use crate::models::ActuatorState;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    WhiteLight,
    YellowLight,
    Relay,
    Fan,
    Buzzer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Angle {
    Door,
    Window,
}

/// Effet appliqué par une entrée de table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoEffect {
    Set(Switch, bool),
    Angle(Angle, i32),
}

const SWITCH_TABLE: &[(&[&str], Switch, bool)] = &[
    (&["white", "light on"], Switch::WhiteLight, true),
    (&["yellow", "light on"], Switch::YellowLight, true),
    (&["white", "light off"], Switch::WhiteLight, false),
    (&["yellow", "light off"], Switch::YellowLight, false),
    (&["fan on"], Switch::Fan, true),
    (&["fan off"], Switch::Fan, false),
    (&["relay on"], Switch::Relay, true),
    (&["relay off"], Switch::Relay, false),
    (&["buzzer on"], Switch::Buzzer, true),
    (&["buzzer off"], Switch::Buzzer, false),
];

const ANGLE_TABLE: &[(&str, Angle)] = &[("door", Angle::Door), ("window", Angle::Window)];

/// Effets portés par un écho, dans l'ordre des tables
pub fn match_echo(text: &str) -> Vec<EchoEffect> {
    let lower = text.to_ascii_lowercase();
    let mut effects = Vec::new();

    if let Some((_, switch, on)) = SWITCH_TABLE
        .iter()
        .find(|(needles, _, _)| needles.iter().all(|n| lower.contains(n)))
    {
        effects.push(EchoEffect::Set(*switch, *on));
    }

    for (keyword, angle) in ANGLE_TABLE {
        if let Some(value) = digits_after(&lower, keyword) {
            effects.push(EchoEffect::Angle(*angle, value));
        }
    }

    effects
}

/// Premier groupe de chiffres situé après `keyword`
fn digits_after(text: &str, keyword: &str) -> Option<i32> {
    let start = text.find(keyword)? + keyword.len();
    let rest = &text[start..];
    let begin = rest.find(|c: char| c.is_ascii_digit())?;
    let digits: String = rest[begin..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl ActuatorState {
    /// Applique un écho ; retourne les effets retenus (vide si rien ne matche)
    pub fn apply_echo(&mut self, text: &str) -> Vec<EchoEffect> {
        let effects = match_echo(text);
        for effect in &effects {
            match *effect {
                EchoEffect::Set(switch, on) => *self.switch_mut(switch) = on,
                EchoEffect::Angle(Angle::Door, v) => self.door_angle = v,
                EchoEffect::Angle(Angle::Window, v) => self.window_angle = v,
            }
        }
        effects
    }

    /// Synchro explicite d'un champ. Champ inconnu ou type incompatible : ignoré.
    pub fn apply_sync(&mut self, field: &str, value: &Value) -> bool {
        match field {
            "white_light" => set_bool(&mut self.white_light, value),
            "yellow_light" => set_bool(&mut self.yellow_light, value),
            "relay" => set_bool(&mut self.relay, value),
            "fan" => set_bool(&mut self.fan, value),
            "buzzer" => set_bool(&mut self.buzzer, value),
            "door_angle" => set_int(&mut self.door_angle, value),
            "window_angle" => set_int(&mut self.window_angle, value),
            "fan_speed" => set_int(&mut self.fan_speed, value),
            _ => false,
        }
    }

    fn switch_mut(&mut self, switch: Switch) -> &mut bool {
        match switch {
            Switch::WhiteLight => &mut self.white_light,
            Switch::YellowLight => &mut self.yellow_light,
            Switch::Relay => &mut self.relay,
            Switch::Fan => &mut self.fan,
            Switch::Buzzer => &mut self.buzzer,
        }
    }
}

fn set_bool(slot: &mut bool, value: &Value) -> bool {
    match value.as_bool() {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

fn set_int(slot: &mut i32, value: &Value) -> bool {
    match value.as_f64() {
        Some(v) => {
            *slot = v as i32;
            true
        }
        None => false,
    }
}
