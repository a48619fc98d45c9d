//! Background radio task.
//!
//! The one and only owner of the MAC engine handle. It drains the request
//! channel, services the engine event loop on a fixed cadence and converts
//! the engine's asynchronous events into completion signals that the public
//! operations wait on. Nothing else in the process may call into the engine.

use crate::controller::{Callbacks, Shared};
use crate::error::LoraError;
use crate::mac::{DataRate, MacEngine, MacEvent, OpMode};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Radio activity requested by a public operation. The task discovers these
/// on its next loop pass; completion is reported back through the signal
/// flags on [`Shared`].
#[derive(Debug)]
pub(crate) enum Request {
    StartJoin(DataRate),
    Transmit { port: u8, payload: Vec<u8> },
    SetLinkCheck(bool),
    RequestTime,
    SyncCounters,
    ResetSession,
}

pub(crate) struct TaskParams {
    pub poll_interval: Duration,
    pub tx_power_dbm: i8,
}

pub(crate) async fn run(
    mut engine: Box<dyn MacEngine>,
    shared: Arc<Shared>,
    mut requests: mpsc::Receiver<Request>,
    mut callbacks: Callbacks,
    params: TaskParams,
) {
    debug!("radio task started");
    let mut time_issued_at: Option<Instant> = None;

    loop {
        tokio::select! {
            request = requests.recv() => {
                match request {
                    // All controller handles dropped; stop servicing the radio.
                    None => break,
                    Some(request) => {
                        dispatch(engine.as_mut(), &shared, &params, request, &mut time_issued_at);
                    }
                }
            }

            _ = tokio::time::sleep(params.poll_interval) => {}
        }

        for event in engine.run_pending_events() {
            handle_event(engine.as_mut(), &shared, &mut callbacks, event, &mut time_issued_at);
        }

        shared.radio_pending.store(
            engine.opmode().contains(OpMode::TXRXPEND),
            Ordering::Release,
        );
        shared.notify.notify_waiters();
    }

    debug!("radio task stopped");
}

fn dispatch(
    engine: &mut dyn MacEngine,
    shared: &Shared,
    params: &TaskParams,
    request: Request,
    time_issued_at: &mut Option<Instant>,
) {
    match request {
        Request::StartJoin(data_rate) => {
            engine.set_data_rate(data_rate, params.tx_power_dbm);
            if let Err(e) = engine.start_join() {
                warn!("join start rejected: {e}");
                shared.signals.lock().unwrap().join_result = Some(false);
            }
        }

        Request::Transmit { port, payload } => {
            if log::log_enabled!(log::Level::Debug) {
                debug!(
                    "queuing {} byte packet on port {port} [{}]",
                    payload.len(),
                    hex::encode(&payload)
                );
            }
            if let Err(e) = engine.transmit(port, &payload) {
                warn!("transmit rejected: {e}");
                shared.signals.lock().unwrap().tx_result = Some(false);
            }
        }

        Request::SetLinkCheck(enabled) => {
            engine.set_link_check_mode(enabled);
            shared.session.lock().unwrap().link_check_enabled = enabled;
        }

        Request::RequestTime => {
            *time_issued_at = Some(Instant::now());
            engine.request_network_time();
        }

        Request::SyncCounters => {
            let counters = engine.session_counters();
            shared.session.lock().unwrap().apply_counters(&counters);
            shared.signals.lock().unwrap().counters_synced = true;
        }

        Request::ResetSession => {
            engine.reset_session();
        }
    }
}

fn handle_event(
    engine: &mut dyn MacEngine,
    shared: &Shared,
    callbacks: &mut Callbacks,
    event: MacEvent,
    time_issued_at: &mut Option<Instant>,
) {
    match event {
        MacEvent::Joined { device_address } => {
            info!("network accepted join, device address 0x{device_address:08X}");
            {
                let mut session = shared.session.lock().unwrap();
                session.joined = true;
                session.device_address = device_address;
            }
            shared.signals.lock().unwrap().join_result = Some(true);
        }

        MacEvent::JoinFailed => {
            debug!("join cycle completed without acceptance");
            shared.signals.lock().unwrap().join_result = Some(false);
        }

        MacEvent::TransmitComplete => {
            let counters = engine.session_counters();
            debug!("packet sent, frame counter now {}", counters.frame_counter_up);
            shared.session.lock().unwrap().apply_counters(&counters);
            shared.signals.lock().unwrap().tx_result = Some(true);
        }

        MacEvent::DownlinkReceived { port, payload } => {
            debug!(
                "downlink of {} bytes on port {port} [{}]",
                payload.len(),
                hex::encode(&payload)
            );
            if let Some(handler) = callbacks.on_downlink.as_mut() {
                handler(port, &payload);
            }
        }

        MacEvent::NetworkTimeReceived { epoch_secs, valid } => {
            let issued_at = time_issued_at.take();
            shared.signals.lock().unwrap().time_pending = false;
            if !valid {
                warn!("network time request answered without a usable reference");
                if let Some(handler) = callbacks.on_time_failed.as_mut() {
                    handler(LoraError::TimeSyncUnavailable);
                }
                return;
            }
            // Correct for the local ticks elapsed since the request left.
            let elapsed = issued_at.map(|t| t.elapsed().as_secs()).unwrap_or(0);
            let corrected = epoch_secs + elapsed;
            match chrono::DateTime::from_timestamp(corrected as i64, 0) {
                Some(utc) => info!("network time corrected to {utc}"),
                None => warn!("network reported an out-of-range epoch {corrected}"),
            }
            if let Some(handler) = callbacks.on_time_corrected.as_mut() {
                handler(corrected);
            }
        }
    }
}
