/**
 * DEVICE LINK - Superviseur du lien série avec la carte capteurs/actionneurs
 *
 * RÔLE :
 * Possède le cycle de vie de la connexion et câble les évènements décodés
 * vers le moteur de règles, le shadow actionneurs, le canal de commandes et
 * le buffer télémétrie.
 *
 * FONCTIONNEMENT :
 * - connect() : ouverture du flux, délai de stabilisation (reset de la carte),
 *   puis publication de la session et démarrage de la boucle de lecture et
 *   du flusher périodique, sans point d'attente entre les deux
 * - Boucle de lecture : une ligne = un évènement, une ligne invalide est
 *   loggée et sautée, jamais fatale
 * - Télémétrie → règles → buffer ; actions déclenchées → canal de commandes
 * - ACK → commande suivante de la file, après un court délai
 * - disconnect() : signal d'arrêt, attente des tâches, vidage final du
 *   buffer, fermeture du flux
 *
 * VERROUS :
 * - session (parking_lot::RwLock) : état partagé, jamais tenu pendant un await
 * - writer (tokio Mutex) : les écritures se font hors du verrou de session,
 *   la commande à transmettre est capturée avant relâchement
 * - lifecycle (tokio Mutex) : sérialise connect/disconnect
 *
 * Chaque session porte un epoch : une transmission programmée pour une
 * session précédente est abandonnée.
 */

pub mod buffer;
pub mod codec;
pub mod command;
pub mod shadow;
pub mod transport;

use crate::error::{EdgeError, EdgeResult};
use crate::models::{ActuatorState, TelemetryRecord, TelemetrySample};
use crate::ports::TelemetryStore;
use crate::rules::RuleEngine;
use buffer::TelemetryBuffer;
use codec::DeviceLine;
use command::{ChannelState, CommandChannel};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use transport::{BoxedStream, LinkOpener};

/// Réglages temporels et capacité du buffer
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub settle_delay: Duration,
    pub ack_resend_delay: Duration,
    pub flush_interval: Duration,
    pub buffer_high_water: usize,
    pub buffer_low_water: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(2000),
            ack_resend_delay: Duration::from_millis(100),
            flush_interval: Duration::from_millis(2000),
            buffer_high_water: 100,
            buffer_low_water: 50,
        }
    }
}

/// Vue publique de l'état du lien
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub channel: ChannelState,
    pub queued: usize,
    pub buffered: usize,
}

struct LinkSession {
    connected: bool,
    port: Option<String>,
    epoch: u64,
    channel: CommandChannel,
    actuators: ActuatorState,
    current: Option<TelemetrySample>,
    buffer: TelemetryBuffer,
}

struct LinkTasks {
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

pub struct DeviceLink {
    session: RwLock<LinkSession>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    lifecycle: Mutex<Option<LinkTasks>>,
    rules: Arc<RuleEngine>,
    store: Arc<dyn TelemetryStore>,
    opener: Arc<dyn LinkOpener>,
    config: LinkConfig,
}

impl DeviceLink {
    pub fn new(
        rules: Arc<RuleEngine>,
        store: Arc<dyn TelemetryStore>,
        opener: Arc<dyn LinkOpener>,
        config: LinkConfig,
    ) -> Arc<Self> {
        let buffer = TelemetryBuffer::new(config.buffer_high_water, config.buffer_low_water);
        Arc::new(Self {
            session: RwLock::new(LinkSession {
                connected: false,
                port: None,
                epoch: 0,
                channel: CommandChannel::new(),
                actuators: ActuatorState::default(),
                current: None,
                buffer,
            }),
            writer: Mutex::new(None),
            lifecycle: Mutex::new(None),
            rules,
            store,
            opener,
            config,
        })
    }

    pub async fn connect(self: &Arc<Self>, port: &str, baud_rate: u32) -> EdgeResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            let current = self.session.read().port.clone().unwrap_or_default();
            return Err(EdgeError::AlreadyConnected(current));
        }

        let stream = self
            .opener
            .open(port, baud_rate)
            .map_err(|e| EdgeError::transport(format!("open {port}"), e))?;
        let (reader, writer) = tokio::io::split(stream);
        info!("opened {port} @ {baud_rate} baud, waiting for device reset");

        // Rien n'est publié avant la fin de la stabilisation : si le futur est
        // abandonné ici, le flux est simplement fermé et le lien reste libre.
        tokio::time::sleep(self.config.settle_delay).await;

        // dernier point d'attente : ensuite tout est publié d'un bloc
        *self.writer.lock().await = Some(writer);
        let epoch = {
            let mut session = self.session.write();
            session.connected = true;
            session.port = Some(port.to_string());
            session.epoch += 1;
            session.channel = CommandChannel::new();
            session.current = None;
            session.epoch
        };

        let (stop, stop_rx) = watch::channel(false);
        let reader = tokio::spawn(Arc::clone(self).read_loop(reader, stop_rx.clone(), epoch));
        let flusher = tokio::spawn(Arc::clone(self).flush_loop(stop_rx));
        *lifecycle = Some(LinkTasks { stop, reader, flusher });

        info!("device link ready on {port}");
        Ok(())
    }

    /// Sans connexion active : no-op réussi
    pub async fn disconnect(&self) -> EdgeResult<()> {
        self.teardown(None).await
    }

    async fn teardown(&self, expected_epoch: Option<u64>) -> EdgeResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let epoch = self.session.read().epoch;
        if expected_epoch.is_some_and(|e| e != epoch) {
            return Ok(());
        }
        let Some(tasks) = lifecycle.take() else {
            return Ok(());
        };

        let _ = tasks.stop.send(true);
        for handle in [tasks.reader, tasks.flusher] {
            if let Err(e) = handle.await {
                error!("link task ended abnormally: {e}");
            }
        }

        if let Err(e) = self.flush_buffer() {
            warn!("final drain failed, data kept in buffer: {e}");
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("stream shutdown: {e}");
            }
        }

        let port = {
            let mut session = self.session.write();
            session.connected = false;
            session.channel = CommandChannel::new();
            session.port.take()
        };
        info!("disconnected from {}", port.unwrap_or_default());
        Ok(())
    }

    /// Envoi d'une commande brute : transmise tout de suite si le canal est
    /// prêt, sinon mise en file jusqu'au prochain ACK
    pub async fn send_command(&self, command: &str) -> EdgeResult<()> {
        let command = command.trim();
        let (epoch, now) = {
            let mut session = self.session.write();
            if !session.connected {
                return Err(EdgeError::NotConnected);
            }
            (session.epoch, session.channel.submit(command.to_string()))
        };

        match now {
            Some(cmd) => self.transmit(cmd, epoch).await,
            None => {
                debug!("queued {command}");
                Ok(())
            }
        }
    }

    /// Écrit `command` ; sur échec d'écriture le canal est libéré et la tête
    /// de file éventuelle est tentée à son tour. La première erreur remonte.
    async fn transmit(&self, command: String, epoch: u64) -> EdgeResult<()> {
        let mut command = command;
        let mut first_error = None;

        loop {
            match self.write_line(&command, epoch).await {
                Ok(()) => break,
                Err(EdgeError::TransportFailure { context, source }) => {
                    warn!("write of {command} failed: {source}");
                    first_error.get_or_insert(EdgeError::TransportFailure { context, source });
                    let next = {
                        let mut session = self.session.write();
                        if session.epoch != epoch {
                            None
                        } else {
                            session.channel.transmit_failed()
                        }
                    };
                    match next {
                        Some(next) => command = next,
                        None => break,
                    }
                }
                Err(e) => return Err(e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn write_line(&self, command: &str, epoch: u64) -> EdgeResult<()> {
        let mut writer = self.writer.lock().await;
        let current = self.session.read().epoch;
        if current != epoch {
            debug!("dropping {command} scheduled for a previous session");
            return Err(EdgeError::NotConnected);
        }
        let Some(stream) = writer.as_mut() else {
            return Err(EdgeError::NotConnected);
        };

        let frame = codec::encode_command(command);
        stream
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| EdgeError::transport(format!("write {command}"), e))?;
        stream
            .flush()
            .await
            .map_err(|e| EdgeError::transport(format!("flush {command}"), e))?;
        debug!("→ {command}");
        Ok(())
    }

    async fn read_loop(
        self: Arc<Self>,
        reader: ReadHalf<BoxedStream>,
        mut stop: watch::Receiver<bool>,
        epoch: u64,
    ) {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            tokio::select! {
                biased;
                _ = stop.changed() => {
                    debug!("read loop stopped");
                    return;
                }
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => {
                        warn!("device stream closed");
                        break;
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        self.handle_line(line.trim(), epoch).await;
                    }
                    Err(e) => {
                        error!("device read failed: {e}");
                        break;
                    }
                }
            }
        }

        // flux perdu : libère la session sans attendre un disconnect explicite
        let link = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = link.teardown(Some(epoch)).await {
                warn!("teardown after stream loss failed: {e}");
            }
        });
    }

    async fn handle_line(self: &Arc<Self>, line: &str, epoch: u64) {
        if line.is_empty() {
            return;
        }
        debug!("← {line}");

        match codec::decode_line(line, OffsetDateTime::now_utc()) {
            DeviceLine::Ack => self.on_ack(epoch),
            DeviceLine::Telemetry(sample) => self.on_telemetry(sample).await,
            DeviceLine::Noise => debug!("dropping all-zero telemetry"),
            DeviceLine::Echo(text) => {
                let effects = self.session.write().actuators.apply_echo(&text);
                if effects.is_empty() {
                    debug!("echo without known actuator pattern: {text}");
                }
            }
            DeviceLine::Unrecognized(text) => debug!("unrecognized line: {text}"),
        }
    }

    fn on_ack(self: &Arc<Self>, epoch: u64) {
        let next = self.session.write().channel.acknowledge();
        let Some(command) = next else {
            return;
        };

        let link = Arc::clone(self);
        let delay = self.config.ack_resend_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = link.transmit(command, epoch).await {
                warn!("queued command not sent: {e}");
            }
        });
    }

    async fn on_telemetry(&self, sample: TelemetrySample) {
        let evaluation = self.rules.evaluate(&sample);
        for alert in &evaluation.alerts {
            info!("alert: {alert}");
        }

        let record = TelemetryRecord::from_sample(&sample, evaluation.alerts);
        let evicted = {
            let mut session = self.session.write();
            session.current = Some(sample);
            session.buffer.push(record)
        };
        if evicted > 0 {
            warn!("telemetry buffer over capacity, dropped {evicted} oldest samples");
        }

        for action in evaluation.actions {
            let command = codec::action_command(&action);
            if let Err(e) = self.send_command(&command).await {
                warn!("rule action {command} not sent: {e}");
            }
        }
    }

    async fn flush_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_buffer() {
                        warn!("telemetry flush failed, batch restored: {e}");
                    }
                }
            }
        }
    }

    /// Vide le buffer vers le stockage en un seul appel. En cas d'échec le
    /// lot est remis en tête du buffer.
    pub fn flush_buffer(&self) -> EdgeResult<usize> {
        let batch = self.session.write().buffer.take();
        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.insert_many(&batch) {
            Ok(()) => {
                debug!("flushed {} telemetry records", batch.len());
                Ok(batch.len())
            }
            Err(e) => {
                let evicted = self.session.write().buffer.restore(batch);
                if evicted > 0 {
                    warn!("telemetry buffer over capacity after restore, dropped {evicted} oldest samples");
                }
                Err(e.into())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().connected
    }

    pub fn status(&self) -> LinkStatus {
        let session = self.session.read();
        LinkStatus {
            connected: session.connected,
            port: session.port.clone(),
            channel: session.channel.state(),
            queued: session.channel.queued(),
            buffered: session.buffer.len(),
        }
    }

    /// Dernière lecture reçue sur la session en cours
    pub fn current_telemetry(&self) -> EdgeResult<Option<TelemetrySample>> {
        let session = self.session.read();
        if !session.connected {
            return Err(EdgeError::NotConnected);
        }
        Ok(session.current.clone())
    }

    pub fn actuator_state(&self) -> EdgeResult<ActuatorState> {
        let session = self.session.read();
        if !session.connected {
            return Err(EdgeError::NotConnected);
        }
        Ok(session.actuators.clone())
    }

    pub fn sync_actuator(&self, field: &str, value: &serde_json::Value) -> EdgeResult<ActuatorState> {
        let mut session = self.session.write();
        if !session.connected {
            return Err(EdgeError::NotConnected);
        }
        if !session.actuators.apply_sync(field, value) {
            debug!("sync ignored for {field}={value}");
        }
        Ok(session.actuators.clone())
    }
}
