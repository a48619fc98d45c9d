//! Scriptable MAC engine for tests and simulation.
//!
//! Behaves like a network-in-a-box: join outcomes, transmit completion,
//! downlinks and time answers are driven by a [`MockScript`], and every
//! interaction is recorded on the shared [`MockState`] so tests can assert
//! on what reached the radio.

use crate::constants::TICKS_PER_SECOND;
use crate::mac::{
    ChannelPlan, DataRate, EngineError, MacEngine, MacEvent, OpMode, RadioIdentity,
};
use crate::session::{RadioSession, SessionCounters};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted network behavior.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Outcome of each successive `start_join` call. Attempts beyond the
    /// end of the list fail.
    pub join_outcomes: Vec<bool>,

    /// Device address assigned on a successful join.
    pub device_address: u32,

    /// Whether transmissions confirm on the next event-loop pass. When
    /// false, the uplink stays pending until [`MockState::complete_tx`].
    pub auto_complete_tx: bool,

    /// Downlink to deliver right after each transmit completion.
    pub downlink_after_tx: Option<(u8, Vec<u8>)>,

    /// Network time behavior: `None` never answers, `Some(None)` answers
    /// with no usable time reference, `Some(Some(epoch))` answers with a
    /// valid epoch.
    pub time_answer: Option<Option<u64>>,

    /// Ticks of duty-cycle debt each uplink adds to band 1 and the global
    /// budget.
    pub airtime_ticks: u32,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            join_outcomes: vec![true],
            device_address: 0x2601_14AF,
            auto_complete_tx: true,
            downlink_after_tx: None,
            time_answer: None,
            airtime_ticks: 2 * TICKS_PER_SECOND,
        }
    }
}

/// Observable engine state, shared with the test through an `Arc<Mutex<_>>`.
#[derive(Debug, Default)]
pub struct MockState {
    pub script: MockScript,
    pub initialized: bool,
    pub resets: u32,
    pub applied_sessions: Vec<RadioSession>,
    pub join_starts: Vec<DataRate>,
    pub link_check: bool,
    pub joined: bool,
    pub device_address: u32,
    pub current_data_rate: Option<DataRate>,
    pub tx_power_dbm: i8,
    pub tx_log: Vec<(u8, Vec<u8>)>,
    pub time_requests: u32,
    frame_counter_up: u32,
    per_band_availability: [u32; crate::constants::MAX_BANDS],
    global_duty_availability: u32,
    txrxpend: bool,
    joining: bool,
    pending: VecDeque<MacEvent>,
}

impl MockState {
    /// Complete a held transmission (used with `auto_complete_tx = false`).
    pub fn complete_tx(&mut self) {
        if self.txrxpend {
            self.pending.push_back(MacEvent::TransmitComplete);
        }
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter_up
    }
}

/// MAC engine double driven by a [`MockScript`].
pub struct MockMacEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockMacEngine {
    pub fn new(script: MockScript) -> Self {
        let state = MockState {
            script,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Handle for inspecting and steering the engine from a test.
    pub fn state_handle(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }
}

impl MacEngine for MockMacEngine {
    fn initialize(
        &mut self,
        _identity: &RadioIdentity,
        _plan: &ChannelPlan,
    ) -> Result<(), EngineError> {
        self.state.lock().unwrap().initialized = true;
        Ok(())
    }

    fn reset_session(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.resets += 1;
        state.joined = false;
        state.device_address = 0;
        state.frame_counter_up = 0;
        state.per_band_availability = Default::default();
        state.global_duty_availability = 0;
    }

    fn apply_session(&mut self, session: &RadioSession) {
        let mut state = self.state.lock().unwrap();
        state.joined = session.joined;
        state.device_address = session.device_address;
        state.frame_counter_up = session.frame_counter_up;
        state.per_band_availability = session.per_band_availability;
        state.global_duty_availability = session.global_duty_availability;
        state.link_check = session.link_check_enabled;
        state.applied_sessions.push(session.clone());
    }

    fn set_data_rate(&mut self, data_rate: DataRate, tx_power_dbm: i8) {
        let mut state = self.state.lock().unwrap();
        state.current_data_rate = Some(data_rate);
        state.tx_power_dbm = tx_power_dbm;
    }

    fn set_link_check_mode(&mut self, enabled: bool) {
        self.state.lock().unwrap().link_check = enabled;
    }

    fn start_join(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let data_rate = state
            .current_data_rate
            .ok_or_else(|| EngineError::Join("no data rate selected".into()))?;
        state.join_starts.push(data_rate);
        state.joining = true;

        let attempt = state.join_starts.len() - 1;
        let accepted = state.script.join_outcomes.get(attempt).copied().unwrap_or(false);
        if accepted {
            let device_address = state.script.device_address;
            state.joined = true;
            state.joining = false;
            state.device_address = device_address;
            state.pending.push_back(MacEvent::Joined { device_address });
        } else {
            state.joining = false;
            state.pending.push_back(MacEvent::JoinFailed);
        }
        Ok(())
    }

    fn transmit(&mut self, port: u8, payload: &[u8]) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        if state.txrxpend {
            return Err(EngineError::TxPending);
        }
        state.txrxpend = true;
        state.frame_counter_up += 1;
        let airtime = state.script.airtime_ticks;
        state.per_band_availability[1] = state.per_band_availability[1].saturating_add(airtime);
        state.global_duty_availability = state.global_duty_availability.saturating_add(airtime);
        state.tx_log.push((port, payload.to_vec()));
        if state.script.auto_complete_tx {
            state.pending.push_back(MacEvent::TransmitComplete);
            if let Some((port, payload)) = state.script.downlink_after_tx.clone() {
                state
                    .pending
                    .push_back(MacEvent::DownlinkReceived { port, payload });
            }
        }
        Ok(())
    }

    fn request_network_time(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.time_requests += 1;
        match state.script.time_answer {
            Some(Some(epoch_secs)) => state.pending.push_back(MacEvent::NetworkTimeReceived {
                epoch_secs,
                valid: true,
            }),
            Some(None) => state.pending.push_back(MacEvent::NetworkTimeReceived {
                epoch_secs: 0,
                valid: false,
            }),
            None => {}
        }
    }

    fn opmode(&self) -> OpMode {
        let state = self.state.lock().unwrap();
        let mut opmode = OpMode::empty();
        if state.txrxpend {
            opmode |= OpMode::TXRXPEND;
        }
        if state.joining {
            opmode |= OpMode::JOINING;
        }
        if state.link_check {
            opmode |= OpMode::LINKCHECK;
        }
        opmode
    }

    fn session_counters(&self) -> SessionCounters {
        let state = self.state.lock().unwrap();
        SessionCounters {
            frame_counter_up: state.frame_counter_up,
            per_band_availability: state.per_band_availability,
            global_duty_availability: state.global_duty_availability,
        }
    }

    fn run_pending_events(&mut self) -> Vec<MacEvent> {
        let mut state = self.state.lock().unwrap();
        let events: Vec<MacEvent> = state.pending.drain(..).collect();
        if events
            .iter()
            .any(|e| matches!(e, MacEvent::TransmitComplete))
        {
            state.txrxpend = false;
        }
        events
    }
}
