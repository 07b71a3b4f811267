//! Central role: the companion/gateway side of the Meshtastic BLE protocol
//!
//! [`CentralTransport`] owns a [`BleLink`] and drives it through
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Configuring -> Ready --(link lost)--> Idle
//!                        \__________(failure)__________> Error
//! ```
//!
//! Failed attempts and unsolicited disconnects reschedule a connection with
//! exponential backoff while auto-reconnect is on. Callers talk to the task
//! through a cloneable [`CentralHandle`].

use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{MeshtasticConfig, ReconnectConfig};
use crate::error::{MeshtasticError, Result};
use crate::gatt::{Characteristic, PREFERRED_MTU};
use crate::interface::{select_strongest, BleLink, ConnectionState, LinkEvent};
use crate::packet::{
    encode_disconnect, encode_to_radio_packet, encode_want_config, parse_from_radio, DataPacket,
    FromRadioVariant, MeshPacket, PortNum,
};

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create with bounds
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Create from reconnect settings
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay, config.max_delay)
    }

    /// Delay before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;
        delay
    }

    /// Attempts scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

/// Events broadcast by the central transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// Chat text from the radio
    Text {
        /// Sending node
        from: u32,
        /// Message text
        text: String,
    },
    /// Private-port payload from the radio
    Payload {
        /// Sending node
        from: u32,
        /// Payload bytes
        payload: Bytes,
    },
}

/// Central transport counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralStats {
    /// Successful link connects
    pub connects: u64,
    /// Handshakes that echoed our nonce
    pub handshakes_confirmed: u64,
    /// Handshakes that timed out and proceeded anyway
    pub handshakes_unconfirmed: u64,
    /// Data packets received
    pub packets_received: u64,
    /// Data packets written
    pub packets_sent: u64,
    /// FromRadio records that did not decode
    pub decode_failures: u64,
    /// Reconnects scheduled
    pub reconnect_attempts: u64,
}

/// Commands sent to the central transport
#[derive(Debug)]
pub enum CentralCommand {
    /// Send chat text
    SendText {
        to: u32,
        text: String,
        response: oneshot::Sender<Result<u32>>,
    },
    /// Send a private-port payload
    SendPayload {
        to: u32,
        payload: Bytes,
        response: oneshot::Sender<Result<u32>>,
    },
    /// Start connecting if idle
    Connect,
    /// Drop the link and stay idle
    Disconnect { response: oneshot::Sender<()> },
    /// Toggle auto-reconnect
    SetAutoReconnect(bool),
    /// Get counters
    GetStats { response: oneshot::Sender<CentralStats> },
    /// Stop the transport
    Shutdown,
}

/// Handle for interacting with the central transport
#[derive(Clone)]
pub struct CentralHandle {
    command_tx: mpsc::Sender<CentralCommand>,
    event_tx: broadcast::Sender<CentralEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl CentralHandle {
    /// Send chat text; resolves to the packet id
    pub async fn send_text(&self, to: u32, text: impl Into<String>) -> Result<u32> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(CentralCommand::SendText {
                to,
                text: text.into(),
                response: tx,
            })
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)?;
        rx.await.map_err(|_| MeshtasticError::ChannelClosed)?
    }

    /// Send a private-port payload; resolves to the packet id
    pub async fn send_payload(&self, to: u32, payload: Bytes) -> Result<u32> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(CentralCommand::SendPayload {
                to,
                payload,
                response: tx,
            })
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)?;
        rx.await.map_err(|_| MeshtasticError::ChannelClosed)?
    }

    /// Start connecting if idle or failed
    pub async fn connect(&self) -> Result<()> {
        self.command_tx
            .send(CentralCommand::Connect)
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)
    }

    /// Drop the link; no reconnect follows
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(CentralCommand::Disconnect { response: tx })
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)?;
        rx.await.map_err(|_| MeshtasticError::ChannelClosed)
    }

    /// Enable or disable auto-reconnect
    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<()> {
        self.command_tx
            .send(CentralCommand::SetAutoReconnect(enabled))
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the transport reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| MeshtasticError::ChannelClosed)
    }

    /// Get transport counters
    pub async fn stats(&self) -> Result<CentralStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(CentralCommand::GetStats { response: tx })
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)?;
        rx.await.map_err(|_| MeshtasticError::ChannelClosed)
    }

    /// Subscribe to transport events
    pub fn subscribe(&self) -> broadcast::Receiver<CentralEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the transport
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(CentralCommand::Shutdown)
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)
    }
}

/// Central-role connection manager over a [`BleLink`]
pub struct CentralTransport<L: BleLink> {
    link: L,
    config: MeshtasticConfig,
    command_rx: mpsc::Receiver<CentralCommand>,
    event_tx: broadcast::Sender<CentralEvent>,
    state_tx: watch::Sender<ConnectionState>,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    backoff: Backoff,
    auto_reconnect: bool,
    next_attempt: Option<Instant>,
    my_node_num: u32,
    next_packet_id: u32,
    stats: CentralStats,
}

impl<L: BleLink> CentralTransport<L> {
    /// Create a transport; the first connection attempt starts with `run`
    pub fn new(link: L, config: MeshtasticConfig) -> (Self, CentralHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(config.central.event_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let handle = CentralHandle {
            command_tx,
            event_tx: event_tx.clone(),
            state_rx,
        };

        let transport = Self {
            link,
            backoff: Backoff::from_config(&config.reconnect),
            auto_reconnect: config.reconnect.enabled,
            config,
            command_rx,
            event_tx,
            state_tx,
            link_events: None,
            next_attempt: Some(Instant::now()),
            my_node_num: 0,
            next_packet_id: 0,
            stats: CentralStats::default(),
        };

        (transport, handle)
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(link = self.link.name(), "Starting central transport");

        loop {
            let ready = self.state() == ConnectionState::Ready;
            let wake = self.next_attempt;

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                event = next_link_event(&mut self.link_events), if ready => {
                    match event {
                        Some(LinkEvent::CounterNotified(counter)) => {
                            trace!(counter, "FromNum notified");
                            self.drain().await;
                        }
                        Some(LinkEvent::Disconnected) | None => {
                            self.handle_link_lost().await;
                        }
                    }
                }

                _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() && !ready => {
                    self.next_attempt = None;
                    self.attempt().await;
                }
            }
        }

        if self.state() != ConnectionState::Idle {
            self.close_link().await;
            self.set_state(ConnectionState::Idle);
        }
        info!("Central transport stopped");
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state() == state {
            return;
        }
        debug!(from = %self.state(), to = %state, "Connection state");
        self.state_tx.send_replace(state);
        let _ = self.event_tx.send(CentralEvent::StateChanged(state));
    }

    /// Returns false when the transport should stop
    async fn handle_command(&mut self, cmd: CentralCommand) -> bool {
        match cmd {
            CentralCommand::SendText { to, text, response } => {
                let result = self.send_data(to, DataPacket::text(&text)).await;
                let _ = response.send(result);
            }
            CentralCommand::SendPayload {
                to,
                payload,
                response,
            } => {
                let result = self.send_data(to, DataPacket::private(payload)).await;
                let _ = response.send(result);
            }
            CentralCommand::Connect => {
                if matches!(self.state(), ConnectionState::Idle | ConnectionState::Error) {
                    self.backoff.reset();
                    self.next_attempt = Some(Instant::now());
                }
            }
            CentralCommand::Disconnect { response } => {
                info!("Disconnect requested");
                self.next_attempt = None;
                if self.state() == ConnectionState::Ready {
                    if let Ok(bytes) = encode_disconnect() {
                        let _ = self.link.write_to_radio(&bytes).await;
                    }
                }
                self.close_link().await;
                self.set_state(ConnectionState::Idle);
                let _ = response.send(());
            }
            CentralCommand::SetAutoReconnect(enabled) => {
                debug!(enabled, "Auto-reconnect toggled");
                self.auto_reconnect = enabled;
                if !enabled {
                    self.next_attempt = None;
                } else if self.state() == ConnectionState::Error && self.next_attempt.is_none() {
                    self.schedule_reconnect();
                }
            }
            CentralCommand::GetStats { response } => {
                let _ = response.send(self.stats.clone());
            }
            CentralCommand::Shutdown => {
                info!("Central shutdown requested");
                return false;
            }
        }
        true
    }

    // ===== Connection =====

    async fn attempt(&mut self) {
        match self.establish().await {
            Ok(confirmed) => {
                if confirmed {
                    self.stats.handshakes_confirmed += 1;
                    self.backoff.reset();
                    info!("Radio ready (node 0x{:08x})", self.my_node_num);
                } else {
                    self.stats.handshakes_unconfirmed += 1;
                    warn!(
                        "No config_complete within {}, proceeding unconfirmed",
                        humantime::format_duration(self.config.central.handshake_timeout)
                    );
                }
                self.set_state(ConnectionState::Ready);
                self.drain().await;
            }
            Err(e) => {
                warn!(code = e.error_code(), "Connection attempt failed: {}", e);
                self.close_link().await;
                self.set_state(ConnectionState::Error);
                self.schedule_reconnect();
            }
        }
    }

    /// Scan, connect, discover, subscribe and run the config handshake.
    /// Resolves to whether the radio echoed our nonce.
    async fn establish(&mut self) -> Result<bool> {
        self.set_state(ConnectionState::Scanning);
        let window = self.config.central.scan_window;
        let candidates = self.link.scan(window).await?;
        let device = select_strongest(&candidates)
            .cloned()
            .ok_or(MeshtasticError::DeviceNotFound {
                window_ms: window.as_millis() as u64,
            })?;
        info!(
            device = %device.id,
            name = device.name.as_deref().unwrap_or(""),
            rssi = ?device.rssi,
            "Selected radio"
        );

        self.set_state(ConnectionState::Connecting);
        self.link.connect(&device).await?;
        self.stats.connects += 1;

        match self.link.request_mtu(PREFERRED_MTU).await {
            Ok(Some(mtu)) => debug!(mtu, "MTU negotiated"),
            Ok(None) => debug!("MTU not reported by link"),
            Err(e) => warn!("MTU request failed: {}", e),
        }

        let found = self.link.discover().await?;
        if found < Characteristic::ALL.len() {
            return Err(MeshtasticError::CharacteristicsMissing { found });
        }
        self.link_events = Some(self.link.subscribe().await?);

        self.set_state(ConnectionState::Configuring);
        self.my_node_num = 0;
        self.next_packet_id = rand::random();
        let nonce = rand::thread_rng().gen_range(1..=u32::MAX);
        self.link.write_to_radio(&encode_want_config(nonce)?).await?;
        debug!(nonce, "Config requested");

        self.await_config(nonce).await
    }

    async fn await_config(&mut self, nonce: u32) -> Result<bool> {
        let deadline = Instant::now() + self.config.central.handshake_timeout;
        let mut ticker = tokio::time::interval(self.config.central.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            loop {
                let record = self.link.read_from_radio().await?;
                if record.is_empty() {
                    break;
                }
                match self.dispatch(&record) {
                    Some(echoed) if echoed == nonce => return Ok(true),
                    Some(echoed) => debug!(echoed, nonce, "Ignoring stale config_complete"),
                    None => {}
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    async fn close_link(&mut self) {
        self.link_events = None;
        if let Err(e) = self.link.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }
    }

    async fn handle_link_lost(&mut self) {
        warn!(link = self.link.name(), "Link lost");
        self.close_link().await;
        self.set_state(ConnectionState::Idle);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.auto_reconnect {
            debug!("Auto-reconnect disabled, staying {}", self.state());
            return;
        }
        let max_attempts = self.config.reconnect.max_attempts;
        if max_attempts > 0 && self.backoff.attempts() >= max_attempts {
            error!(attempts = max_attempts, "Giving up reconnecting");
            return;
        }
        let delay = self.backoff.next_delay();
        self.stats.reconnect_attempts += 1;
        info!(
            attempt = self.backoff.attempts(),
            "Reconnecting in {}",
            humantime::format_duration(delay)
        );
        self.next_attempt = Some(Instant::now() + delay);
    }

    // ===== FromRadio =====

    /// Read until the radio has nothing more
    async fn drain(&mut self) {
        loop {
            match self.link.read_from_radio().await {
                Ok(record) if record.is_empty() => break,
                Ok(record) => {
                    self.dispatch(&record);
                }
                Err(e) => {
                    warn!("FromRadio read failed: {}", e);
                    self.handle_link_lost().await;
                    break;
                }
            }
        }
    }

    /// Handle one FromRadio record; returns the echoed nonce of a
    /// config_complete record
    fn dispatch(&mut self, record: &[u8]) -> Option<u32> {
        let Some(message) = parse_from_radio(record) else {
            debug!("Undecodable FromRadio ({} bytes)", record.len());
            self.stats.decode_failures += 1;
            return None;
        };

        match message.variant {
            FromRadioVariant::MyInfo(info) => {
                debug!("my_info: node 0x{:08x}", info.my_node_num);
                self.my_node_num = info.my_node_num;
            }
            FromRadioVariant::NodeInfo(info) => {
                let name = info.user.as_ref().map(|u| u.long_name.as_str()).unwrap_or("");
                debug!(num = info.num, name, "node_info");
            }
            FromRadioVariant::ConfigCompleteId(id) => return Some(id),
            FromRadioVariant::Packet(packet) => self.dispatch_packet(packet),
        }
        None
    }

    fn dispatch_packet(&mut self, packet: MeshPacket) {
        let Some(data) = packet.decoded else {
            debug!(from = packet.from, "Packet without decoded data");
            self.stats.decode_failures += 1;
            return;
        };
        self.stats.packets_received += 1;

        match data.portnum {
            PortNum::TextMessage => {
                let text = String::from_utf8_lossy(&data.payload).into_owned();
                trace!(from = packet.from, len = text.len(), "Text received");
                let _ = self.event_tx.send(CentralEvent::Text {
                    from: packet.from,
                    text,
                });
            }
            PortNum::Private => {
                trace!(from = packet.from, len = data.payload.len(), "Payload received");
                let _ = self.event_tx.send(CentralEvent::Payload {
                    from: packet.from,
                    payload: data.payload,
                });
            }
            other => debug!(port = %other, "Ignoring packet on unhandled port"),
        }
    }

    // ===== ToRadio =====

    async fn send_data(&mut self, to: u32, data: DataPacket) -> Result<u32> {
        if self.state() != ConnectionState::Ready {
            return Err(MeshtasticError::Disconnected);
        }
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        let id = self.next_packet_id;
        let packet = MeshPacket::with_data(self.my_node_num, to, id, data);
        let bytes = encode_to_radio_packet(&packet)?;
        self.link.write_to_radio(&bytes).await?;
        self.stats.packets_sent += 1;
        trace!(id, to, len = bytes.len(), "Packet written");
        Ok(id)
    }
}

async fn next_link_event(events: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshtasticConfigBuilder;
    use crate::peripheral::PeripheralConnection;
    use crate::test_utils::MockLink;
    use fieldmesh_core::{DeviceIdentity, BROADCAST_ADDR};

    fn peripheral() -> crate::peripheral::SharedPeripheral {
        let identity = DeviceIdentity {
            node_id: 0x0A0B_0C0D,
            mac: [0x02, 0x00, 0x0A, 0x0B, 0x0C, 0x0D],
        };
        PeripheralConnection::new(identity, 16).shared()
    }

    fn spawn(link: MockLink, config: MeshtasticConfig) -> CentralHandle {
        let (transport, handle) = CentralTransport::new(link, config);
        tokio::spawn(transport.run());
        handle
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(backoff.attempts(), 6);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_confirmed() {
        let radio = peripheral();
        let handle = spawn(MockLink::new(radio.clone()), MeshtasticConfig::default());

        handle.wait_for_state(ConnectionState::Ready).await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.handshakes_confirmed, 1);
        assert_eq!(stats.handshakes_unconfirmed, 0);
        assert!(radio.lock().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_reaches_radio() {
        let radio = peripheral();
        let handle = spawn(MockLink::new(radio.clone()), MeshtasticConfig::default());
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();

        let first = handle.send_text(BROADCAST_ADDR, "hello").await.unwrap();
        let second = handle
            .send_payload(BROADCAST_ADDR, Bytes::from_static(b"\x01\x02"))
            .await
            .unwrap();
        assert_eq!(second, first.wrapping_add(1));

        let text = radio.lock().take_text().unwrap();
        assert_eq!(text.text, "hello");
        assert_eq!(text.from, 0x0A0B_0C0D);
        assert_eq!(&radio.lock().take_payload().unwrap().payload[..], b"\x01\x02");
        assert_eq!(handle.stats().await.unwrap().packets_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_dispatches_payload() {
        let radio = peripheral();
        let handle = spawn(MockLink::new(radio.clone()), MeshtasticConfig::default());
        let mut events = handle.subscribe();
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();

        radio.lock().queue_payload(0x1001, Bytes::from_static(b"incident"));
        radio.lock().queue_text(0x1002, "status ok");

        let mut payload = None;
        let mut text = None;
        while payload.is_none() || text.is_none() {
            match events.recv().await.unwrap() {
                CentralEvent::Payload { from, payload: p } => payload = Some((from, p)),
                CentralEvent::Text { from, text: t } => text = Some((from, t)),
                CentralEvent::StateChanged(_) => {}
            }
        }
        assert_eq!(payload.unwrap(), (0x1001, Bytes::from_static(b"incident")));
        assert_eq!(text.unwrap(), (0x1002, "status ok".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_packets_queued_before_connect_are_drained() {
        let radio = peripheral();
        radio.lock().queue_text(0x2002, "early");
        let handle = spawn(MockLink::new(radio.clone()), MeshtasticConfig::default());
        let mut events = handle.subscribe();

        loop {
            if let CentralEvent::Text { text, .. } = events.recv().await.unwrap() {
                assert_eq!(text, "early");
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_handshake_proceeds_unconfirmed() {
        let radio = peripheral();
        let link = MockLink::new(radio);
        link.set_silent_handshake(true);
        let handle = spawn(link, MeshtasticConfig::default());

        let started = Instant::now();
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.handshakes_unconfirmed, 1);
        assert_eq!(stats.handshakes_confirmed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristics_retries_with_backoff() {
        let radio = peripheral();
        let link = MockLink::new(radio);
        link.set_characteristics(2);
        let handle = spawn(link.clone(), MeshtasticConfig::default());

        handle.wait_for_state(ConnectionState::Error).await.unwrap();
        let started = Instant::now();
        link.set_characteristics(3);

        handle.wait_for_state(ConnectionState::Ready).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(link.connect_count(), 2);
        assert_eq!(handle.stats().await.unwrap().reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_device_found() {
        let radio = peripheral();
        let link = MockLink::new(radio).with_candidates(Vec::new());
        let config = MeshtasticConfigBuilder::new().auto_reconnect(false).build();
        let handle = spawn(link.clone(), config);

        handle.wait_for_state(ConnectionState::Error).await.unwrap();
        assert_eq!(link.connect_count(), 0);
        assert!(matches!(
            handle.send_text(BROADCAST_ADDR, "x").await,
            Err(MeshtasticError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_disconnect_reconnects() {
        let radio = peripheral();
        let link = MockLink::new(radio.clone());
        let handle = spawn(link.clone(), MeshtasticConfig::default());
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();

        link.drop_link();
        let mut state = handle.watch_state();
        state
            .wait_for(|s| *s != ConnectionState::Ready)
            .await
            .unwrap();

        handle.wait_for_state(ConnectionState::Ready).await.unwrap();
        assert_eq!(link.connect_count(), 2);
        assert_eq!(handle.stats().await.unwrap().handshakes_confirmed, 2);
        assert!(radio.lock().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_disabled_stays_idle() {
        let radio = peripheral();
        let link = MockLink::new(radio);
        let handle = spawn(link.clone(), MeshtasticConfig::default());
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();

        handle.set_auto_reconnect(false).await.unwrap();
        link.drop_link();
        handle.wait_for_state(ConnectionState::Idle).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(handle.state(), ConnectionState::Idle);
        assert_eq!(link.connect_count(), 1);

        handle.connect().await.unwrap();
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();
        assert_eq!(link.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_disconnect() {
        let radio = peripheral();
        let link = MockLink::new(radio.clone());
        let handle = spawn(link.clone(), MeshtasticConfig::default());
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();

        handle.disconnect().await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Idle);
        assert!(!radio.lock().is_ready());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(link.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_link() {
        let radio = peripheral();
        let link = MockLink::new(radio.clone());
        let (transport, handle) = CentralTransport::new(link.clone(), MeshtasticConfig::default());
        let task = tokio::spawn(transport.run());
        handle.wait_for_state(ConnectionState::Ready).await.unwrap();

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(!link.is_connected());
        assert!(handle.stats().await.is_err());
    }
}
