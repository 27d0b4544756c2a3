//! Connection admission control.
//!
//! Caps the number of concurrently accepted raw connections. The ledger is
//! consulted at accept time, before any HTTP or WebSocket handling, and is
//! independent of the room registry (the two locks are never nested).

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

// ============================================================================
// Admission
// ============================================================================

/// Bounded set of active connections, keyed by remote address.
#[derive(Debug)]
pub struct Admission {
    /// Addresses of admitted connections.
    active: Mutex<FxHashSet<SocketAddr>>,
    /// Maximum number of concurrent connections.
    capacity: usize,
}

impl Admission {
    /// Creates a ledger admitting at most `capacity` connections.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(FxHashSet::default()),
            capacity,
        })
    }

    /// Returns the configured capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of admitted connections.
    #[inline]
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.lock().len()
    }

    /// Admits `addr` if fewer than `capacity` connections are active.
    ///
    /// Check and insert happen under one lock acquisition.
    pub fn try_admit(&self, addr: SocketAddr) -> bool {
        let mut active = self.active.lock();
        if active.len() >= self.capacity {
            warn!(%addr, active = active.len(), capacity = self.capacity, "Admission rejected");
            return false;
        }

        active.insert(addr);
        debug!(%addr, active = active.len(), "Connection admitted");
        true
    }

    /// Releases the slot held by `addr`.
    pub fn release(&self, addr: SocketAddr) {
        let mut active = self.active.lock();
        if active.remove(&addr) {
            debug!(%addr, active = active.len(), "Connection released");
        }
    }

    /// Admits `addr` and returns a guard releasing the slot on drop.
    #[must_use]
    pub fn admit(self: &Arc<Self>, addr: SocketAddr) -> Option<AdmissionGuard> {
        self.try_admit(addr).then(|| AdmissionGuard {
            admission: Arc::clone(self),
            addr,
        })
    }
}

// ============================================================================
// AdmissionGuard
// ============================================================================

/// Holds one admission slot for the lifetime of a connection task.
#[derive(Debug)]
pub struct AdmissionGuard {
    admission: Arc<Admission>,
    addr: SocketAddr,
}

impl AdmissionGuard {
    /// Remote address holding the slot.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.admission.release(self.addr);
    }
}

// ============================================================================
// Tests
// ============================================================================
