//! # LoRaWAN Session & Transmission Controller
//!
//! This module provides the LoraController struct, the synchronous,
//! deep-sleep-safe face of the asynchronous MAC engine. A dedicated
//! background task owns the engine handle and services its event loop;
//! public operations hand it requests over a channel and await completion
//! signals with a bounded timeout.
//!
//! The controller also owns the RadioSession and its persistence: it
//! restores (with duty-cycle correction) at start, and snapshots on
//! `prepare_for_sleep` just before the application powers down.

pub mod join;
pub(crate) mod task;

use crate::constants::{
    DEFAULT_JOIN_BUDGET, DEFAULT_JOIN_TIER_BASE, DEFAULT_JOIN_TIER_MAX, DEFAULT_POLL_INTERVAL,
    DEFAULT_SEND_TIMEOUT, DEFAULT_TX_POWER_DBM, MAX_PAYLOAD_LEN, MAX_PORT,
};
use crate::error::LoraError;
use crate::mac::{ChannelPlan, DataRate, MacEngine, RadioIdentity};
use crate::session::{correct_for_elapsed, RadioSession, SessionManager};
use join::JoinBackoff;
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use task::{Request, TaskParams};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// A single uplink handed to the controller by value. Validated at
/// construction so a misconfigured message never reaches the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub port: u8,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Build a message for an application port (1-223) with a payload of
    /// 1 to 64 bytes.
    pub fn new(port: u8, payload: Vec<u8>) -> Result<Self, LoraError> {
        if port == 0 || port > MAX_PORT {
            return Err(LoraError::InvalidPort(port));
        }
        if payload.is_empty() {
            return Err(LoraError::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(LoraError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self { port, payload })
    }
}

/// Tunable controller parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Spreading factor the first join tier starts from.
    pub initial_data_rate: DataRate,

    /// Conducted transmit power in dBm.
    pub tx_power_dbm: i8,

    /// Overall ceiling for one join campaign.
    pub join_budget: Duration,

    /// Wait budget of the first join tier; doubles per escalation.
    pub join_tier_base: Duration,

    /// Clamp for the per-tier wait budget.
    pub join_tier_max: Duration,

    /// Random delay range between join escalations.
    pub join_jitter: (Duration, Duration),

    /// Default bounded wait used by `drain`.
    pub send_timeout: Duration,

    /// Cadence at which the background task services the engine.
    pub poll_interval: Duration,

    /// Bounded wait for internal counter synchronization.
    pub sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_data_rate: DataRate::SF7,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            join_budget: DEFAULT_JOIN_BUDGET,
            join_tier_base: DEFAULT_JOIN_TIER_BASE,
            join_tier_max: DEFAULT_JOIN_TIER_MAX,
            join_jitter: (Duration::from_millis(200), Duration::from_millis(800)),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sync_timeout: Duration::from_secs(2),
        }
    }
}

/// Handler invoked from the background task when a downlink arrives.
pub type DownlinkHandler = Box<dyn FnMut(u8, &[u8]) + Send>;

/// Handler invoked with the corrected wall-clock epoch after a successful
/// network time sync.
pub type TimeCorrectedHandler = Box<dyn FnMut(u64) + Send>;

/// Handler invoked when the network answers a time request without a usable
/// reference. The application keeps its prior clock source.
pub type TimeFailedHandler = Box<dyn FnMut(LoraError) + Send>;

/// Application callbacks, registered once at controller construction.
#[derive(Default)]
pub struct Callbacks {
    pub on_downlink: Option<DownlinkHandler>,
    pub on_time_corrected: Option<TimeCorrectedHandler>,
    pub on_time_failed: Option<TimeFailedHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_downlink(mut self, handler: impl FnMut(u8, &[u8]) + Send + 'static) -> Self {
        self.on_downlink = Some(Box::new(handler));
        self
    }

    pub fn with_time_corrected(mut self, handler: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_time_corrected = Some(Box::new(handler));
        self
    }

    pub fn with_time_failed(mut self, handler: impl FnMut(LoraError) + Send + 'static) -> Self {
        self.on_time_failed = Some(Box::new(handler));
        self
    }
}

/// Completion flags written by the background task. A flag left set by a
/// caller that timed out is stale; the next caller of the matching
/// operation clears it before issuing a new request.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    pub join_result: Option<bool>,
    pub tx_result: Option<bool>,
    pub tx_in_flight: bool,
    pub time_pending: bool,
    pub counters_synced: bool,
}

/// State shared between the public operations and the background task.
pub(crate) struct Shared {
    pub signals: Mutex<Signals>,
    pub session: Mutex<RadioSession>,
    pub radio_pending: AtomicBool,
    pub notify: Notify,
}

/// The LoRaWAN session and transmission controller.
///
/// All methods take `&self`; the controller can be wrapped in an `Arc` and
/// used from several execution contexts. Serialization onto the single
/// radio channel is enforced internally.
pub struct LoraController {
    request_tx: mpsc::Sender<Request>,
    shared: Arc<Shared>,
    sessions: SessionManager,
    config: ControllerConfig,
    queue_slot: Mutex<Option<OutboundMessage>>,
    task: JoinHandle<()>,
}

impl LoraController {
    /// Initialize the radio and spawn the background task.
    ///
    /// Restores the prior session from `sessions` (corrected for
    /// `slept_secs` of power-off time) when one exists; otherwise the
    /// engine starts with a clean slate and [`join`](Self::join) must run a
    /// full handshake.
    pub async fn start(
        identity: RadioIdentity,
        plan: ChannelPlan,
        mut engine: Box<dyn MacEngine>,
        sessions: SessionManager,
        config: ControllerConfig,
        callbacks: Callbacks,
        slept_secs: u32,
    ) -> Result<Self, LoraError> {
        info!(
            "initializing radio for device EUI {}",
            hex::encode(identity.device_eui)
        );
        engine
            .initialize(&identity, &plan)
            .map_err(|e| LoraError::Engine(e.to_string()))?;

        let session = match sessions.restore(slept_secs) {
            Some(restored) => {
                engine.apply_session(&restored);
                restored
            }
            None => {
                info!("no usable prior session, full join required");
                engine.reset_session();
                RadioSession::default()
            }
        };
        engine.set_data_rate(config.initial_data_rate, config.tx_power_dbm);
        engine.set_link_check_mode(session.link_check_enabled);

        let shared = Arc::new(Shared {
            signals: Mutex::new(Signals::default()),
            session: Mutex::new(session),
            radio_pending: AtomicBool::new(false),
            notify: Notify::new(),
        });
        let (request_tx, request_rx) = mpsc::channel(16);
        let params = TaskParams {
            poll_interval: config.poll_interval,
            tx_power_dbm: config.tx_power_dbm,
        };
        let task = tokio::spawn(task::run(
            engine,
            Arc::clone(&shared),
            request_rx,
            callbacks,
            params,
        ));

        Ok(Self {
            request_tx,
            shared,
            sessions,
            config,
            queue_slot: Mutex::new(None),
            task,
        })
    }

    /// Whether the current session has been accepted by the network.
    pub fn has_joined(&self) -> bool {
        self.shared.session.lock().unwrap().joined
    }

    /// Override hook for the join status, for tests and recovery tooling.
    /// Does not touch the engine.
    pub fn set_joined(&self, joined: bool) {
        let mut session = self.shared.session.lock().unwrap();
        session.joined = joined;
        if !joined {
            session.device_address = 0;
        }
    }

    /// Network-assigned device address of the active session.
    pub fn device_address(&self) -> Result<u32, LoraError> {
        let session = self.shared.session.lock().unwrap();
        if session.joined {
            Ok(session.device_address)
        } else {
            Err(LoraError::NoSession)
        }
    }

    /// Clone of the current in-memory session.
    pub fn session(&self) -> RadioSession {
        self.shared.session.lock().unwrap().clone()
    }

    /// Establish a session with the network.
    ///
    /// When a restored session is already joined this is a no-op that only
    /// re-enables link-check mode, the common case on every wake from deep
    /// sleep. Otherwise a join campaign walks the spreading-factor ladder
    /// from the configured initial rate toward SF12, doubling the per-tier
    /// wait, until the network accepts or the overall budget runs out.
    pub async fn join(&self) -> Result<(), LoraError> {
        if self.has_joined() {
            debug!("session already joined, re-enabling link check");
            self.request(Request::SetLinkCheck(true)).await?;
            return Ok(());
        }

        let mut schedule = JoinBackoff::new(
            self.config.initial_data_rate,
            self.config.join_tier_base,
            self.config.join_tier_max,
        );
        let deadline = Instant::now() + self.config.join_budget;

        loop {
            let data_rate = schedule.data_rate();
            self.shared.signals.lock().unwrap().join_result = None;
            info!("join attempt at {data_rate}");
            self.request(Request::StartJoin(data_rate)).await?;

            let tier_deadline = (Instant::now() + schedule.tier_budget()).min(deadline);
            match self.wait_for(tier_deadline, |s| s.join_result.take()).await {
                Some(true) => {
                    self.request(Request::SetLinkCheck(true)).await?;
                    return Ok(());
                }
                // Failed cycle or tier budget spent: escalate.
                Some(false) | None => {}
            }

            if Instant::now() >= deadline {
                warn!("join budget exhausted at {data_rate}");
                return Err(LoraError::JoinTimeout);
            }

            let (jitter_min, jitter_max) = self.config.join_jitter;
            let jitter_ms =
                rand::thread_rng().gen_range(jitter_min.as_millis()..=jitter_max.as_millis());
            tokio::time::sleep(Duration::from_millis(jitter_ms as u64)).await;
            schedule.escalate();
        }
    }

    /// Transmit one message, waiting up to `timeout` for the engine to
    /// confirm it left the radio.
    ///
    /// Refuses immediately with [`LoraError::ChannelBusy`] while another
    /// transmission is outstanding. On timeout the message is abandoned and
    /// never retried internally; delivery is at-most-once.
    pub async fn send(&self, message: OutboundMessage, timeout: Duration) -> Result<(), LoraError> {
        {
            let mut signals = self.shared.signals.lock().unwrap();
            if signals.tx_in_flight || self.shared.radio_pending.load(Ordering::Acquire) {
                return Err(LoraError::ChannelBusy);
            }
            signals.tx_in_flight = true;
            // A previous caller may have timed out before the engine
            // confirmed; discard the stale completion first.
            signals.tx_result = None;
        }

        let request = Request::Transmit {
            port: message.port,
            payload: message.payload,
        };
        if let Err(e) = self.request(request).await {
            self.shared.signals.lock().unwrap().tx_in_flight = false;
            return Err(e);
        }

        let deadline = Instant::now() + timeout;
        let outcome = self.wait_for(deadline, |s| s.tx_result.take()).await;
        self.shared.signals.lock().unwrap().tx_in_flight = false;

        match outcome {
            Some(true) => Ok(()),
            Some(false) => Err(LoraError::Engine("transmit rejected by MAC engine".into())),
            None => Err(LoraError::SendTimeout(timeout)),
        }
    }

    /// Park one best-effort message for a later [`drain`](Self::drain).
    ///
    /// The queue holds a single slot: queueing again before draining
    /// replaces the previous message. Intended for low-priority status
    /// pushes just before deep sleep.
    pub fn queue(&self, port: u8, payload: Vec<u8>) -> Result<(), LoraError> {
        let message = OutboundMessage::new(port, payload)?;
        let mut slot = self.queue_slot.lock().unwrap();
        if slot.is_some() {
            debug!("replacing previously queued message");
        }
        *slot = Some(message);
        Ok(())
    }

    /// Attempt exactly one send of the queued message, then drop it
    /// unconditionally, delivered or not.
    pub async fn drain(&self) {
        let message = self.queue_slot.lock().unwrap().take();
        if let Some(message) = message {
            let port = message.port;
            match self.send(message, self.config.send_timeout).await {
                Ok(()) => debug!("queued message on port {port} sent"),
                Err(e) => warn!("queued message on port {port} dropped: {e}"),
            }
        }
    }

    /// Discard the queued message without sending it.
    pub fn empty_queue(&self) {
        if self.queue_slot.lock().unwrap().take().is_some() {
            debug!("queued message discarded");
        }
    }

    /// Issue a network time request. Ignored while one is already
    /// outstanding. The corrected epoch arrives through the
    /// `on_time_corrected` callback.
    pub async fn request_network_time(&self) -> Result<(), LoraError> {
        {
            let mut signals = self.shared.signals.lock().unwrap();
            if signals.time_pending {
                debug!("time request already outstanding, ignoring");
                return Ok(());
            }
            signals.time_pending = true;
        }
        self.request(Request::RequestTime).await
    }

    /// Snapshot the session for an upcoming deep sleep of roughly
    /// `sleep_estimate_secs`.
    ///
    /// No clock runs while the device is powered off, so the duty-cycle
    /// availability correction for the sleep interval is applied now,
    /// before the snapshot is written. Pass 0 here and give the measured
    /// interval to the session manager at the next boot instead, if the
    /// platform can measure it.
    pub async fn prepare_for_sleep(&self, sleep_estimate_secs: u32) -> Result<(), LoraError> {
        self.shared.signals.lock().unwrap().counters_synced = false;
        self.request(Request::SyncCounters).await?;
        let deadline = Instant::now() + self.config.sync_timeout;
        if self
            .wait_for(deadline, |s| s.counters_synced.then_some(()))
            .await
            .is_none()
        {
            return Err(LoraError::ControllerStopped);
        }

        let session = self.shared.session.lock().unwrap().clone();
        let corrected = correct_for_elapsed(&session, sleep_estimate_secs);
        self.sessions.snapshot(&corrected)
    }

    /// Destroy the session: erase the holding area and reset the engine.
    /// The only path by which a session is ever destroyed.
    pub async fn factory_reset(&self) -> Result<(), LoraError> {
        info!("factory reset, destroying radio session");
        *self.shared.session.lock().unwrap() = RadioSession::default();
        self.sessions.clear()?;
        self.request(Request::ResetSession).await
    }

    /// Stop the background task and wait for it to exit.
    pub async fn shutdown(self) {
        drop(self.request_tx);
        let _ = self.task.await;
    }

    async fn request(&self, request: Request) -> Result<(), LoraError> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| LoraError::ControllerStopped)
    }

    /// Wait until `check` yields a value or `deadline` passes. Wakes on
    /// task notifications but re-checks periodically so a lost wakeup can
    /// never stall a caller past its budget.
    async fn wait_for<T>(
        &self,
        deadline: Instant,
        mut check: impl FnMut(&mut Signals) -> Option<T>,
    ) -> Option<T> {
        loop {
            {
                let mut signals = self.shared.signals.lock().unwrap();
                if let Some(value) = check(&mut *signals) {
                    return Some(value);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let slice = (deadline - now).min(Duration::from_millis(20));
            let _ = tokio::time::timeout(slice, self.shared.notify.notified()).await;
        }
    }
}
