/**
 * LINE CODEC - Grammaire ligne du lien série
 *
 * Entrant (carte → edge), une ligne = un évènement :
 * - "ACK"                                   → carte prête pour la commande suivante
 * - "GAS:123,LIGHT:456,SOIL:789,WATER:101,INFRAR:1,BTN1:0,BTN2:1" → télémétrie
 * - texte libre ("White light ON", "Door opened to 90") → écho actionneur
 *
 * Sortant (edge → carte) : identifiant de commande + '\n'. Le vocabulaire de
 * commandes est fermé et sans saut de ligne, aucun échappement.
 */

use crate::models::TelemetrySample;
use time::OffsetDateTime;

pub const ACK: &str = "ACK";

/// Clé qui identifie une ligne de télémétrie
const TELEMETRY_KEY: &str = "gas";

/// Mots-clés qu'un écho actionneur contient forcément
const ECHO_KEYWORDS: [&str; 6] = ["light", "fan", "relay", "buzzer", "door", "window"];

/// Classification d'une ligne entrante
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLine {
    Ack,
    Telemetry(TelemetrySample),
    /// Télémétrie dont les canaux principaux sont tous à zéro
    Noise,
    Echo(String),
    Unrecognized(String),
}

/// Décode une ligne déjà débarrassée de ses blancs
pub fn decode_line(line: &str, received_at: OffsetDateTime) -> DeviceLine {
    if line == ACK {
        return DeviceLine::Ack;
    }

    if has_telemetry_key(line) {
        let sample = decode_telemetry(line, received_at);
        return if sample.is_noise() {
            DeviceLine::Noise
        } else {
            DeviceLine::Telemetry(sample)
        };
    }

    let lower = line.to_ascii_lowercase();
    if ECHO_KEYWORDS.iter().any(|k| lower.contains(k)) {
        DeviceLine::Echo(line.to_string())
    } else {
        DeviceLine::Unrecognized(line.to_string())
    }
}

/// Même découpage que `decode_telemetry` : clé avant ':', blancs ignorés
fn has_telemetry_key(line: &str) -> bool {
    line.split(',')
        .filter_map(|part| part.split_once(':'))
        .any(|(key, _)| key.trim().eq_ignore_ascii_case(TELEMETRY_KEY))
}

/// Paires KEY:VALUE séparées par des virgules. Clé inconnue ignorée,
/// valeur non entière : seule la paire est sautée.
pub fn decode_telemetry(line: &str, received_at: OffsetDateTime) -> TelemetrySample {
    let mut sample = TelemetrySample::empty(received_at);

    for part in line.split(',') {
        let mut kv = part.split(':');
        let (Some(key), Some(value), None) = (kv.next(), kv.next(), kv.next()) else {
            continue;
        };
        let Ok(value) = value.trim().parse::<i32>() else {
            continue;
        };

        match key.trim().to_ascii_lowercase().as_str() {
            "gas" => sample.gas = value,
            "light" => sample.light = value,
            "soil" => sample.soil = value,
            "water" => sample.water = value,
            "infrar" => sample.infrared = value,
            "btn1" => sample.btn1 = value,
            "btn2" => sample.btn2 = value,
            _ => {}
        }
    }

    sample
}

/// Forme canonique d'une ligne de télémétrie (ordre fixe, clés majuscules)
pub fn encode_telemetry(sample: &TelemetrySample) -> String {
    format!(
        "GAS:{},LIGHT:{},SOIL:{},WATER:{},INFRAR:{},BTN1:{},BTN2:{}",
        sample.gas, sample.light, sample.soil, sample.water, sample.infrared, sample.btn1, sample.btn2
    )
}

pub fn encode_command(command: &str) -> String {
    format!("{command}\n")
}

/// Action de règle → jeton de commande ("buzzer_on" → "BUZZER_ON")
pub fn action_command(action: &str) -> String {
    action.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const AT: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

    #[test]
    fn test_ack_is_exact_match() {
        assert_eq!(decode_line("ACK", AT), DeviceLine::Ack);
        assert_eq!(decode_line("ACKNOWLEDGED", AT), DeviceLine::Unrecognized("ACKNOWLEDGED".into()));
    }

    #[test]
    fn test_full_telemetry_line() {
        let line = "GAS:123,LIGHT:456,SOIL:789,WATER:101,INFRAR:1,BTN1:0,BTN2:1";
        let DeviceLine::Telemetry(s) = decode_line(line, AT) else {
            panic!("expected telemetry");
        };
        assert_eq!((s.gas, s.light, s.soil, s.water), (123, 456, 789, 101));
        assert_eq!((s.infrared, s.btn1, s.btn2), (1, 0, 1));
        assert_eq!(s.timestamp, AT);
    }

    #[test]
    fn test_keys_are_case_insensitive_and_unknown_ignored() {
        let s = decode_telemetry("gas:5, Light : 7 ,HUMIDITY:99", AT);
        assert_eq!(s.gas, 5);
        assert_eq!(s.light, 7);
    }

    #[test]
    fn test_padded_gas_key_is_still_telemetry() {
        let DeviceLine::Telemetry(s) = decode_line("GAS : 5,LIGHT:1", AT) else {
            panic!("expected telemetry");
        };
        assert_eq!((s.gas, s.light), (5, 1));
        assert_eq!(decode_line("Gas leak detected", AT), DeviceLine::Unrecognized("Gas leak detected".into()));
    }

    #[test]
    fn test_malformed_pair_skips_only_that_pair() {
        let s = decode_telemetry("GAS:12,LIGHT:abc,SOIL:3:4,WATER:9", AT);
        assert_eq!(s.gas, 12);
        assert_eq!(s.light, 0);
        assert_eq!(s.soil, 0);
        assert_eq!(s.water, 9);
    }

    #[test]
    fn test_all_zero_primary_channels_is_noise() {
        assert_eq!(decode_line("GAS:0,LIGHT:0,SOIL:0,WATER:0,INFRAR:1,BTN1:1,BTN2:1", AT), DeviceLine::Noise);
        assert_eq!(decode_line("GAS:garbage", AT), DeviceLine::Noise);
    }

    #[test]
    fn test_canonical_reencoding_is_stable() {
        let lines = [
            "GAS:750,LIGHT:120,SOIL:33,WATER:0,INFRAR:1,BTN1:0,BTN2:0",
            "water:900,gas:1",
            "LIGHT:-4,GAS:0,SOIL:1",
            "GAS:10,LIGHT:x,BTN2:1,EXTRA:5",
        ];
        for line in lines {
            let first = decode_telemetry(line, AT);
            assert!(!first.is_noise());
            let second = decode_telemetry(&encode_telemetry(&first), AT);
            assert_eq!(first, second, "line {line}");
        }
    }

    #[test]
    fn test_echo_vs_unrecognized() {
        assert_eq!(decode_line("White light ON", AT), DeviceLine::Echo("White light ON".into()));
        assert_eq!(decode_line("Door opened 90", AT), DeviceLine::Echo("Door opened 90".into()));
        assert_eq!(decode_line("System ready", AT), DeviceLine::Unrecognized("System ready".into()));
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(encode_command("BUZZER_ON"), "BUZZER_ON\n");
        assert_eq!(action_command("white_light_on"), "WHITE_LIGHT_ON");
    }
}
