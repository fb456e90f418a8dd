//! Process-wide recycling pool for tile pixel buffers.
//!
//! Freed tile buffers are parked here and handed back out on the next
//! allocation of the same length. The pool is a memory-pressure relief
//! mechanism, not a correctness requirement: [`PoolReleaseGuard`] lets a
//! host scope the pool's lifetime, and dropping the last guard empties it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

const MAX_POOLED_BUFFERS_PER_LEN: usize = 256;

static POOL: OnceLock<Mutex<HashMap<usize, Vec<Box<[u8]>>>>> = OnceLock::new();
static GUARD_COUNT: AtomicUsize = AtomicUsize::new(0);

fn pool() -> &'static Mutex<HashMap<usize, Vec<Box<[u8]>>>> {
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns a zero-filled buffer of exactly `len` bytes, reusing a pooled
/// buffer when one is available.
pub(crate) fn acquire_buffer(len: usize) -> Box<[u8]> {
    if let Some(mut buffer) = pool()
        .lock()
        .expect("tile pool mutex poisoned")
        .get_mut(&len)
        .and_then(Vec::pop)
    {
        buffer.fill(0);
        return buffer;
    }
    vec![0u8; len].into_boxed_slice()
}

/// Parks a buffer for reuse. Empty buffers and overflow beyond the
/// per-length cap are dropped on the floor.
pub(crate) fn recycle_buffer(buffer: Box<[u8]>) {
    if buffer.is_empty() {
        return;
    }
    let mut pooled = pool().lock().expect("tile pool mutex poisoned");
    let slot = pooled.entry(buffer.len()).or_default();
    if slot.len() < MAX_POOLED_BUFFERS_PER_LEN {
        slot.push(buffer);
    }
}

/// Drops every pooled buffer immediately.
pub fn release_internal_pools() {
    pool().lock().expect("tile pool mutex poisoned").clear();
}

/// Scope guard keeping the tile pool alive. When the last live guard is
/// dropped the pooled buffers are released back to the allocator.
#[derive(Debug)]
pub struct PoolReleaseGuard(());

impl PoolReleaseGuard {
    pub fn new() -> Self {
        GUARD_COUNT.fetch_add(1, Ordering::SeqCst);
        Self(())
    }
}

impl Default for PoolReleaseGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PoolReleaseGuard {
    fn drop(&mut self) {
        if GUARD_COUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            release_internal_pools();
        }
    }
}
