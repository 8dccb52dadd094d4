/*!
Test Harness pour le lien edge

Assemble un noyau complet autour d'une carte simulée :
- MockDevice à la place du port série
- FlakyStore pour la télémétrie et les règles
- Délais courts (stabilisation, ré-émission après ACK)
- Attentes avec timeout sur l'état du lien ou de la carte
*/

use crate::device_stub::MockDevice;
use crate::store_stub::FlakyStore;
use anyhow::{bail, Result};
use edge_kernel::rules::RuleEngine;
use edge_kernel::serial::{DeviceLink, LinkConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const MOCK_PORT: &str = "/dev/ttyMOCK0";

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Délais réduits, flush périodique désactivé en pratique (1h)
pub fn fast_link_config() -> LinkConfig {
    LinkConfig {
        settle_delay: Duration::from_millis(10),
        ack_resend_delay: Duration::from_millis(5),
        flush_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

pub struct TestHarness {
    pub device: MockDevice,
    pub store: Arc<FlakyStore>,
    pub rules: Arc<RuleEngine>,
    pub link: Arc<DeviceLink>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_device(MockDevice::new(), fast_link_config())
    }

    pub fn with_device(device: MockDevice, config: LinkConfig) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let store = Arc::new(FlakyStore::new());
        let rules = Arc::new(RuleEngine::new(store.clone()));
        let link = DeviceLink::new(rules.clone(), store.clone(), Arc::new(device.clone()), config);
        Self { device, store, rules, link }
    }

    /// Seed des règles par défaut, comme au premier démarrage
    pub fn with_default_rules(self) -> Result<Self> {
        let created = self.rules.seed_default_rules()?;
        log::info!("📚 seeded {created} default rules");
        Ok(self)
    }

    pub async fn connect(&self) -> Result<()> {
        self.link.connect(MOCK_PORT, 9600).await?;
        Ok(())
    }

    /// Attend qu'une condition devienne vraie (timeout 2s)
    pub async fn wait_until<F>(&self, what: &str, mut condition: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if condition() {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
        bail!("timed out waiting for {what}")
    }

    /// Attend que la carte ait reçu au moins `count` commandes
    pub async fn wait_for_commands(&self, count: usize) -> Result<Vec<String>> {
        let device = self.device.clone();
        self.wait_until(&format!("{count} device commands"), || device.received_commands().len() >= count)
            .await?;
        Ok(self.device.received_commands())
    }

    pub async fn wait_for_buffered(&self, count: usize) -> Result<()> {
        let link = self.link.clone();
        self.wait_until(&format!("{count} buffered samples"), || link.status().buffered >= count)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
