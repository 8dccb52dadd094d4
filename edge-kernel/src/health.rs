use crate::serial::command::ChannelState;
use crate::serial::DeviceLink;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct EdgeHealth {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub device_connected: bool,
    pub device_port: Option<String>,
    pub channel: ChannelState,
    pub queued_commands: usize,
    pub buffered_samples: usize,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, link: &DeviceLink) -> EdgeHealth {
        let status = link.status();
        EdgeHealth {
            status: "ok",
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            device_connected: status.connected,
            device_port: status.port,
            channel: status.channel,
            queued_commands: status.queued,
            buffered_samples: status.buffered,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::JsonStore;
    use crate::rules::RuleEngine;
    use crate::serial::transport::SerialOpener;
    use crate::serial::LinkConfig;
    use std::sync::Arc;

    #[test]
    fn test_health_reflects_idle_link() {
        let store = Arc::new(JsonStore::in_memory());
        let link = DeviceLink::new(
            Arc::new(RuleEngine::new(store.clone())),
            store,
            Arc::new(SerialOpener),
            LinkConfig::default(),
        );
        let health = HealthTracker::new().get_health(&link);
        assert_eq!(health.status, "ok");
        assert!(!health.device_connected);
        assert_eq!(health.channel, ChannelState::Ready);
        assert_eq!(health.buffered_samples, 0);
    }
}
