/*!
Carte simulée pour développement sans matériel

Parle le protocole ligne du lien série sur un flux duplex en mémoire :
- enregistre chaque commande reçue
- répond "ACK" automatiquement (désactivable pour tester la file)
- renvoie un écho texte pour les commandes *_ON / *_OFF
- permet d'injecter télémétrie et lignes arbitraires, ou de débrancher
*/

use anyhow::{anyhow, Result};
use edge_kernel::models::TelemetrySample;
use edge_kernel::serial::codec::encode_telemetry;
use edge_kernel::serial::transport::{BoxedStream, LinkOpener};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

#[derive(Debug)]
enum DeviceInput {
    Line(String),
    Unplug,
}

#[derive(Default)]
struct DeviceInner {
    received: Mutex<Vec<String>>,
    input: Mutex<Option<mpsc::UnboundedSender<DeviceInput>>>,
    manual_ack: AtomicBool,
    silent: AtomicBool,
    fail_open: AtomicBool,
    opens: AtomicUsize,
}

/// Carte simulée, clonable ; implémente `LinkOpener`
#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<DeviceInner>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plus d'ACK automatique : le test appelle `ack()` lui-même
    pub fn with_manual_ack(self) -> Self {
        self.inner.manual_ack.store(true, Ordering::SeqCst);
        self
    }

    /// Pas d'écho texte après les commandes
    pub fn without_echo(self) -> Self {
        self.inner.silent.store(true, Ordering::SeqCst);
        self
    }

    /// Le prochain `open` échoue comme un port absent
    pub fn fail_next_open(&self) {
        self.inner.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn received_commands(&self) -> Vec<String> {
        self.inner.received.lock().clone()
    }

    /// Écrit une ligne brute vers le noyau
    pub fn send_line(&self, line: &str) -> Result<()> {
        self.push(DeviceInput::Line(line.to_string()))
    }

    pub fn ack(&self) -> Result<()> {
        self.send_line("ACK")
    }

    /// Télémétrie canonique sur les quatre canaux principaux
    pub fn send_telemetry(&self, gas: i32, light: i32, soil: i32, water: i32) -> Result<()> {
        let mut sample = TelemetrySample::empty(OffsetDateTime::now_utc());
        sample.gas = gas;
        sample.light = light;
        sample.soil = soil;
        sample.water = water;
        self.send_line(&encode_telemetry(&sample))
    }

    /// Ferme le flux côté carte (câble débranché)
    pub fn unplug(&self) -> Result<()> {
        self.push(DeviceInput::Unplug)
    }

    fn push(&self, input: DeviceInput) -> Result<()> {
        let guard = self.inner.input.lock();
        let sender = guard.as_ref().ok_or_else(|| anyhow!("mock device not opened"))?;
        sender.send(input).map_err(|_| anyhow!("mock device stopped"))
    }
}

impl LinkOpener for MockDevice {
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<BoxedStream> {
        if self.inner.fail_open.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{port}: no such device")));
        }

        let (edge, device) = tokio::io::duplex(8192);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.input.lock() = Some(tx);
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        log::info!("🔌 mock device opened on {port} @ {baud_rate}");

        tokio::spawn(run_device(Arc::clone(&self.inner), device, rx));
        Ok(Box::new(edge))
    }
}

async fn run_device(inner: Arc<DeviceInner>, stream: DuplexStream, mut input: mpsc::UnboundedReceiver<DeviceInput>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(command)) = line else { break };
                let command = command.trim().to_string();
                log::debug!("mock device ← {command}");
                inner.received.lock().push(command.clone());

                let mut reply = String::new();
                if !inner.silent.load(Ordering::SeqCst) {
                    if let Some(echo) = echo_for(&command) {
                        reply.push_str(&echo);
                        reply.push('\n');
                    }
                }
                if !inner.manual_ack.load(Ordering::SeqCst) {
                    reply.push_str("ACK\n");
                }
                if !reply.is_empty() && writer.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
            next = input.recv() => match next {
                Some(DeviceInput::Line(line)) => {
                    if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(DeviceInput::Unplug) | None => break,
            }
        }
    }
    log::info!("🔌 mock device closed");
}

/// "WHITE_LIGHT_ON" → "White light ON" ; None hors *_ON / *_OFF
pub fn echo_for(command: &str) -> Option<String> {
    let (device, state) = command.rsplit_once('_')?;
    if state != "ON" && state != "OFF" {
        return None;
    }
    let device = device.replace('_', " ").to_lowercase();
    let mut chars = device.chars();
    let first = chars.next()?.to_uppercase().collect::<String>();
    Some(format!("{first}{} {state}", chars.as_str()))
}
