//! # Session Persistence
//!
//! The non-volatile holding area for the radio session is an advisory cache,
//! not a durable store: corruption or absence simply forces a fresh join on
//! the next boot, which is costly but always safe. The storage technology is
//! abstracted behind the [`SessionStore`] trait so the core never assumes a
//! particular platform (flash partition, RTC memory, plain file).

use crate::error::LoraError;
use crate::session::{correct_for_elapsed, RadioSession};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Raw byte-level access to the non-volatile session holding area.
pub trait SessionStore: Send + Sync {
    /// Read the stored snapshot, `None` if the area was never written.
    fn load(&self) -> Result<Option<Vec<u8>>, LoraError>;

    /// Overwrite the holding area with a new snapshot.
    fn save(&self, bytes: &[u8]) -> Result<(), LoraError>;

    /// Erase the holding area. Used only by an explicit factory reset.
    fn clear(&self) -> Result<(), LoraError>;
}

/// File-backed session store for hosted platforms.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Vec<u8>>, LoraError> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read(&self.path)
            .map(Some)
            .map_err(|e| LoraError::Store(format!("read {}: {e}", self.path.display())))
    }

    fn save(&self, bytes: &[u8]) -> Result<(), LoraError> {
        fs::write(&self.path, bytes)
            .map_err(|e| LoraError::Store(format!("write {}: {e}", self.path.display())))
    }

    fn clear(&self) -> Result<(), LoraError> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| LoraError::Store(format!("remove {}: {e}", self.path.display())))?;
        }
        Ok(())
    }
}

/// In-memory session store for tests and simulation.
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Vec<u8>>, LoraError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    fn save(&self, bytes: &[u8]) -> Result<(), LoraError> {
        *self.slot.lock().unwrap() = Some(bytes.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), LoraError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

/// Owns the serialize/deserialize boundary between the in-memory
/// [`RadioSession`] and whatever holding area backs the [`SessionStore`].
pub struct SessionManager {
    store: Box<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Restore the prior session, corrected for `elapsed_secs` of real time
    /// spent powered off since the snapshot was taken.
    ///
    /// Returns `None` on a cold boot, after a factory reset, or whenever the
    /// snapshot is unreadable or carries the zero-counter sentinel. No partial
    /// session is ever recognized as valid.
    pub fn restore(&self, elapsed_secs: u32) -> Option<RadioSession> {
        let bytes = match self.store.load() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("session holding area is empty");
                return None;
            }
            Err(e) => {
                warn!("session holding area unreadable, forcing fresh join: {e}");
                return None;
            }
        };

        let session: RadioSession = match serde_json::from_slice(&bytes) {
            Ok(session) => session,
            Err(e) => {
                warn!("session snapshot corrupt, forcing fresh join: {e}");
                return None;
            }
        };

        if !session.is_present() {
            debug!("session snapshot carries the no-session sentinel");
            return None;
        }

        info!(
            "restored session for device 0x{:08X} (fcnt {}, slept {elapsed_secs}s)",
            session.device_address, session.frame_counter_up
        );
        Some(correct_for_elapsed(&session, elapsed_secs))
    }

    /// Write the current in-memory session to the holding area. Must be
    /// called immediately before a deep-sleep transition; a missed call
    /// costs a full rejoin on the next boot but is never a correctness bug.
    pub fn snapshot(&self, session: &RadioSession) -> Result<(), LoraError> {
        let bytes = serde_json::to_vec(session)
            .map_err(|e| LoraError::Store(format!("encode session: {e}")))?;
        self.store.save(&bytes)?;
        debug!(
            "session snapshot written (fcnt {})",
            session.frame_counter_up
        );
        Ok(())
    }

    /// Erase the holding area. Only an explicit factory reset destroys
    /// a session.
    pub fn clear(&self) -> Result<(), LoraError> {
        self.store.clear()
    }
}
