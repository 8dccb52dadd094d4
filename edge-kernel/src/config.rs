use crate::ports::json_store::DEFAULT_RETENTION;
use crate::serial::LinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EdgeConfig {
    pub http: HttpConf,
    pub data_dir: PathBuf,
    /// Enregistrements de télémétrie gardés (mémoire et fichier)
    pub telemetry_retention: usize,
    pub api_key: Option<String>,
    pub serial: SerialConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConf {
    /// Port ouvert automatiquement au démarrage (ex: "/dev/ttyUSB0")
    pub port: Option<String>,
    pub baud_rate: u32,
    pub settle_delay_ms: u64,
    pub ack_resend_delay_ms: u64,
    pub flush_interval_ms: u64,
    pub buffer_high_water: usize,
    pub buffer_low_water: usize,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 3000 }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            data_dir: PathBuf::from("./data"),
            telemetry_retention: DEFAULT_RETENTION,
            api_key: None,
            serial: SerialConf::default(),
        }
    }
}

impl Default for SerialConf {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            settle_delay_ms: 2000,
            ack_resend_delay_ms: 100,
            flush_interval_ms: 2000,
            buffer_high_water: 100,
            buffer_low_water: 50,
        }
    }
}

impl SerialConf {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            ack_resend_delay: Duration::from_millis(self.ack_resend_delay_ms),
            flush_interval: Duration::from_millis(self.flush_interval_ms.max(1)),
            buffer_high_water: self.buffer_high_water,
            buffer_low_water: self.buffer_low_water,
        }
    }
}

impl EdgeConfig {
    /// Parse YAML ; texte vide = config par défaut
    pub fn from_yaml(txt: &str) -> Result<Self, serde_yaml::Error> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt)
    }

    /// Surcharges PORT, EDGE_DATA_DIR, EDGE_API_KEY, EDGE_SERIAL_PORT
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(p) => self.http.port = p,
                Err(_) => warn!("ignoring invalid PORT={port}"),
            }
        }
        if let Some(dir) = var("EDGE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = var("EDGE_API_KEY").filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(port) = var("EDGE_SERIAL_PORT").filter(|p| !p.is_empty()) {
            self.serial.port = Some(port);
        }
    }
}

pub async fn load_config() -> EdgeConfig {
    let path = std::env::var("EDGE_CONFIG").unwrap_or_else(|_| "edge.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        EdgeConfig::from_yaml(&txt).unwrap_or_else(|e| {
            warn!("config invalide ({path}): {e}");
            EdgeConfig::default()
        })
    } else {
        warn!("pas de {path}, usage config par défaut");
        EdgeConfig::default()
    };
    cfg.apply_env(|k| std::env::var(k).ok());
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = EdgeConfig::from_yaml("serial:\n  port: /dev/ttyACM0\n  baud_rate: 115200\n").unwrap();
        assert_eq!(cfg.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cfg.serial.baud_rate, 115200);
        assert_eq!(cfg.serial.buffer_high_water, 100);
        assert_eq!(cfg.http.port, 3000);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.telemetry_retention, DEFAULT_RETENTION);

        let capped = EdgeConfig::from_yaml("telemetry_retention: 5000\n").unwrap();
        assert_eq!(capped.telemetry_retention, 5000);
    }

    #[test]
    fn test_empty_and_invalid_yaml() {
        assert_eq!(EdgeConfig::from_yaml("  \n").unwrap().http.port, 3000);
        assert!(EdgeConfig::from_yaml("http: [nope").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "8081"),
            ("EDGE_DATA_DIR", "/var/lib/edge"),
            ("EDGE_API_KEY", "secret"),
            ("EDGE_SERIAL_PORT", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = EdgeConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.http.port, 8081);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/edge"));
        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.serial.port, None);
    }

    #[test]
    fn test_link_config_conversion() {
        let link = SerialConf::default().link_config();
        assert_eq!(link.settle_delay, Duration::from_secs(2));
        assert_eq!(link.ack_resend_delay, Duration::from_millis(100));
        assert_eq!(link.buffer_low_water, 50);
    }
}
