//! The default-bounds capability: the policy object a paint device asks
//! for the currently applicable canvas rect, animation time, level of
//! detail, wraparound mode, and external-frame state. The device
//! snapshots answers per batch operation and never caches them across
//! calls.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use model::Rect;

pub trait DefaultBounds: fmt::Debug + Send + Sync {
    fn bounds(&self) -> Rect;

    fn current_level_of_detail(&self) -> i32;

    fn current_time(&self) -> i32;

    fn wrap_around_mode(&self) -> bool;

    fn external_frame_active(&self) -> bool;
}

/// Effectively-infinite canvas rect used when no host policy applies.
/// Kept well inside `i32` so edge arithmetic cannot overflow.
const INFINITE_EXTENT: i32 = 0x2000_0000;

/// Policy for a free-standing device: infinite canvas, full resolution,
/// no wraparound, no animation, no external frame.
#[derive(Debug, Default)]
pub struct FlatDefaultBounds;

impl DefaultBounds for FlatDefaultBounds {
    fn bounds(&self) -> Rect {
        Rect::new(
            -INFINITE_EXTENT,
            -INFINITE_EXTENT,
            2 * INFINITE_EXTENT,
            2 * INFINITE_EXTENT,
        )
    }

    fn current_level_of_detail(&self) -> i32 {
        0
    }

    fn current_time(&self) -> i32 {
        0
    }

    fn wrap_around_mode(&self) -> bool {
        false
    }

    fn external_frame_active(&self) -> bool {
        false
    }
}

/// Host-controlled policy with interior mutability so one shared
/// instance can steer several devices between batches.
#[derive(Debug)]
pub struct SceneDefaultBounds {
    bounds: Mutex<Rect>,
    level_of_detail: AtomicI32,
    time: AtomicI32,
    wrap_around: AtomicBool,
    external_frame: AtomicBool,
}

impl SceneDefaultBounds {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds: Mutex::new(bounds),
            level_of_detail: AtomicI32::new(0),
            time: AtomicI32::new(0),
            wrap_around: AtomicBool::new(false),
            external_frame: AtomicBool::new(false),
        }
    }

    pub fn set_bounds(&self, bounds: Rect) {
        *self.bounds.lock().expect("default bounds mutex poisoned") = bounds;
    }

    pub fn set_level_of_detail(&self, level: i32) {
        assert!(level >= 0, "level of detail must be non-negative");
        self.level_of_detail.store(level, Ordering::SeqCst);
    }

    pub fn set_time(&self, time: i32) {
        self.time.store(time, Ordering::SeqCst);
    }

    pub fn set_wrap_around_mode(&self, enabled: bool) {
        self.wrap_around.store(enabled, Ordering::SeqCst);
    }

    pub fn set_external_frame_active(&self, active: bool) {
        self.external_frame.store(active, Ordering::SeqCst);
    }
}

impl DefaultBounds for SceneDefaultBounds {
    fn bounds(&self) -> Rect {
        *self.bounds.lock().expect("default bounds mutex poisoned")
    }

    fn current_level_of_detail(&self) -> i32 {
        self.level_of_detail.load(Ordering::SeqCst)
    }

    fn current_time(&self) -> i32 {
        self.time.load(Ordering::SeqCst)
    }

    fn wrap_around_mode(&self) -> bool {
        self.wrap_around.load(Ordering::SeqCst)
    }

    fn external_frame_active(&self) -> bool {
        self.external_frame.load(Ordering::SeqCst)
    }
}
