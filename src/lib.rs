//! # lorawan-node - LoRaWAN Session and Uplink Control
//!
//! The lorawan-node crate is the control layer of a battery/solar-powered
//! remote sensor station reporting telemetry over a LoRaWAN radio link. It
//! turns a low-level, event-driven LoRaWAN MAC engine into a synchronous,
//! deep-sleep-safe, queue-based uplink/downlink service for the rest of the
//! application.
//!
//! ## Features
//!
//! - Restore and persist the radio session (join status, frame counter,
//!   duty-cycle availability) across untimed deep-sleep power cycles
//! - Correct regulatory duty-cycle timestamps for the elapsed sleep interval
//! - Drive the OTAA join handshake with a spreading-factor back-off ladder
//! - Serialize uplinks onto the single radio channel with bounded waits
//! - Hold one best-effort message for a fire-and-forget push before sleep
//! - Correlate network time answers with the local clock
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lorawan_node::{
//!     Callbacks, ChannelPlan, ControllerConfig, FileSessionStore, LoraController,
//!     MockMacEngine, MockScript, OutboundMessage, RadioIdentity, SessionManager,
//! };
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), lorawan_node::LoraError> {
//! let identity = RadioIdentity::new([0x26; 8], [0x2B; 16]);
//! let engine = Box::new(MockMacEngine::new(MockScript::default()));
//! let sessions = SessionManager::new(Box::new(FileSessionStore::new("session.json")));
//!
//! let controller = LoraController::start(
//!     identity,
//!     ChannelPlan::eu868(),
//!     engine,
//!     sessions,
//!     ControllerConfig::default(),
//!     Callbacks::new(),
//!     0,
//! )
//! .await?;
//!
//! controller.join().await?;
//! let message = OutboundMessage::new(1, vec![0x01, 0x02])?;
//! controller.send(message, Duration::from_secs(10)).await?;
//! controller.prepare_for_sleep(3600).await?;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod controller;
pub mod error;
pub mod logging;
pub mod mac;
pub mod session;

pub use crate::error::LoraError;
pub use crate::logging::{init_logger, log_info};

// Controller surface
pub use controller::join::JoinBackoff;
pub use controller::{
    Callbacks, ControllerConfig, DownlinkHandler, LoraController, OutboundMessage,
    TimeCorrectedHandler, TimeFailedHandler,
};

// MAC engine boundary
pub use mac::mock::{MockMacEngine, MockScript, MockState};
pub use mac::{
    AppKey, Channel, ChannelPlan, DataRate, EngineError, MacEngine, MacEvent, OpMode,
    RadioIdentity,
};

// Session state and persistence
pub use session::{
    correct_for_elapsed, FileSessionStore, MemorySessionStore, RadioSession, SessionCounters,
    SessionManager, SessionStore,
};
