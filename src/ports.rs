//! Port offset allocation.
//!
//! Every game server instance reserves a block of host ports. Rather than
//! tracking ports directly, the pool hands out small integer offsets which
//! are added to fixed base ports (see [`crate::container::ContainerSettings`]).
//!
//! Released offsets are reused most-recently-released first, so a worker that
//! churns through many short-lived instances keeps its port range compact.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Offset added to each base port to derive an instance's host ports.
pub type PortOffset = u16;

#[derive(Debug, Default)]
struct PoolState {
    /// Next never-used offset. Wider than `PortOffset` so exhaustion is visible.
    next_fresh: u32,
    free: Vec<PortOffset>,
}

/// Process-wide pool of port offsets.
///
/// The only operations are [`allocate`](Self::allocate) and
/// [`release`](Self::release); both run under a single lock that is held for
/// the bookkeeping only.
#[derive(Debug, Default)]
pub struct PortPool {
    state: Mutex<PoolState>,
}

impl PortPool {
    /// Create an empty pool. The first allocation returns offset 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A poisoned pool is still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a free offset, preferring the most recently released one.
    ///
    /// Returns `None` once every offset is in use.
    pub fn allocate(&self) -> Option<PortOffset> {
        let mut state = self.lock();
        if let Some(offset) = state.free.pop() {
            return Some(offset);
        }
        let offset = PortOffset::try_from(state.next_fresh).ok()?;
        state.next_fresh += 1;
        Some(offset)
    }

    /// Return an offset to the pool.
    ///
    /// Releasing the same offset twice would let two instances share a port
    /// block. Prefer [`PortPool::lease`], whose lease can only be released once.
    pub fn release(&self, offset: PortOffset) {
        self.lock().free.push(offset);
    }

    /// Allocate an offset wrapped in a [`PortLease`] bound to this pool.
    pub fn lease(self: &Arc<Self>) -> Option<PortLease> {
        Some(PortLease {
            offset: Some(self.allocate()?),
            pool: Arc::clone(self),
        })
    }

    /// Number of offsets currently sitting in the free list.
    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }
}

/// An allocated offset that must be handed back to its pool exactly once.
///
/// Dropping a lease without calling [`release`](Self::release) does not
/// return the offset: the instance that held it may still have a container
/// bound to those ports. The offset is leaked and a warning is logged; the
/// stale container is cleaned up by the label sweep on the next start.
pub struct PortLease {
    offset: Option<PortOffset>,
    pool: Arc<PortPool>,
}

impl PortLease {
    /// The reserved offset.
    pub fn offset(&self) -> PortOffset {
        // Only `release` takes the offset, and it consumes the lease.
        self.offset.unwrap_or_default()
    }

    /// Give the offset back to the pool.
    pub fn release(mut self) {
        if let Some(offset) = self.offset.take() {
            tracing::debug!(offset, "Released port offset");
            self.pool.release(offset);
        }
    }
}

impl fmt::Debug for PortLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortLease")
            .field("offset", &self.offset)
            .finish()
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        if let Some(offset) = self.offset {
            tracing::warn!(
                offset,
                "Port lease dropped without release, offset will not be reused"
            );
        }
    }
}
