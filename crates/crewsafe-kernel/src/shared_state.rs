//! [`SharedDetectorState`] – the latest published perception cycle.
//!
//! The perception thread builds a complete [`DetectorSnapshot`] and hands it
//! to [`SharedDetectorState::publish`], which swaps in a new `Arc` under one
//! write lock and stamps the next version.  Readers clone the `Arc` under a
//! read lock and then work lock-free, so a reader can never observe half of
//! one cycle and half of another.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use crewsafe_kernel::SharedDetectorState;
//! use crewsafe_types::DetectorSnapshot;
//!
//! let state = SharedDetectorState::new(Duration::from_millis(500));
//! assert_eq!(state.snapshot().version, 0);
//!
//! let v = state.publish(DetectorSnapshot::initial(Duration::from_millis(500)));
//! assert_eq!(v, 1);
//! assert_eq!(state.snapshot().version, 1);
//! ```

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crewsafe_types::{DetectorSnapshot, OperatingMode};
use tracing::{debug, info};

/// Cloneable handle; every clone refers to the same state.
#[derive(Clone, Debug)]
pub struct SharedDetectorState {
    snapshot: Arc<RwLock<Arc<DetectorSnapshot>>>,
    mode: Arc<RwLock<OperatingMode>>,
}

impl SharedDetectorState {
    /// State before the first perception cycle: version 0, no valid vision.
    pub fn new(decay_window: Duration) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(DetectorSnapshot::initial(decay_window)))),
            mode: Arc::new(RwLock::new(OperatingMode::default())),
        }
    }

    /// Atomically replace the current snapshot.  Returns the assigned version.
    ///
    /// Any version carried by `snapshot` is overwritten.
    pub fn publish(&self, mut snapshot: DetectorSnapshot) -> u64 {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.version = guard.version.wrapping_add(1).max(1);
        let version = snapshot.version;
        *guard = Arc::new(snapshot);
        debug!(version, "snapshot published");
        version
    }

    /// The latest complete snapshot.
    pub fn snapshot(&self) -> Arc<DetectorSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// The operating mode the perception thread should apply next cycle.
    pub fn mode(&self) -> OperatingMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the operating mode.  Returns the previous mode.
    pub fn set_mode(&self, mode: OperatingMode) -> OperatingMode {
        let mut guard = self.mode.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "operating mode changed");
        }
        previous
    }
}
