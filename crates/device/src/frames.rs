//! Animation frame storage for a paint device.
//!
//! A device starts in single-frame form: one primary data, no frame
//! machinery at all. Creating the first frame converts the primary data
//! into frame storage in place (no copy) and binds it at time 0; from
//! then on the keyframe channel (time → frame) decides which data is
//! current. Deleting down to one remaining frame collapses the storage
//! back to single-frame form, again moving the data rather than copying.

use std::collections::BTreeMap;

use model::{Point, Rect};
use slotmap::SlotMap;

use crate::data::Data;

slotmap::new_key_type! {
    /// Identity of one animation frame within its device.
    pub struct FrameKey;
}

#[derive(Debug)]
pub(crate) enum FrameStorage {
    Single(Data),
    Animated(AnimatedFrames),
}

#[derive(Debug)]
pub(crate) struct AnimatedFrames {
    frames: SlotMap<FrameKey, Data>,
    channel: BTreeMap<i32, FrameKey>,
    /// The frame that plays the primary-data role when the channel
    /// cannot resolve a time (no keyframes bound yet).
    primary: FrameKey,
}

impl FrameStorage {
    /// The data playing the primary role right now: the sole data in
    /// single-frame form, the channel-resolved frame otherwise.
    pub(crate) fn primary(&self, time: i32) -> &Data {
        match self {
            Self::Single(data) => data,
            Self::Animated(animated) => animated.frame_at(time),
        }
    }

    pub(crate) fn primary_mut(&mut self, time: i32) -> &mut Data {
        match self {
            Self::Single(data) => data,
            Self::Animated(animated) => {
                let key = animated.key_at(time);
                animated
                    .frames
                    .get_mut(key)
                    .expect("keyframe channel resolved to a missing frame")
            }
        }
    }

    /// Whether the channel has enough keyframes for animation to win the
    /// current-data selection.
    pub(crate) fn is_animated(&self) -> bool {
        match self {
            Self::Single(_) => false,
            Self::Animated(animated) => animated.channel.len() > 1,
        }
    }
}

impl AnimatedFrames {
    /// Placeholder used while moving a primary data into frame storage.
    pub(crate) fn empty() -> Self {
        Self {
            frames: SlotMap::with_key(),
            channel: BTreeMap::new(),
            primary: FrameKey::default(),
        }
    }

    /// Converts a primary data into frame storage in place.
    pub(crate) fn from_primary(data: Data) -> (Self, FrameKey) {
        let mut frames = SlotMap::with_key();
        let key = frames.insert(data);
        let mut channel = BTreeMap::new();
        channel.insert(0, key);
        (
            Self {
                frames,
                channel,
                primary: key,
            },
            key,
        )
    }

    pub(crate) fn insert(&mut self, data: Data) -> FrameKey {
        self.frames.insert(data)
    }

    pub(crate) fn get(&self, key: FrameKey) -> Option<&Data> {
        self.frames.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: FrameKey) -> Option<&mut Data> {
        self.frames.get_mut(key)
    }

    pub(crate) fn contains(&self, key: FrameKey) -> bool {
        self.frames.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn keys(&self) -> Vec<FrameKey> {
        self.frames.keys().collect()
    }

    pub(crate) fn key_at(&self, time: i32) -> FrameKey {
        self.channel
            .range(..=time)
            .next_back()
            .or_else(|| self.channel.iter().next())
            .map(|(_, &key)| key)
            .unwrap_or(self.primary)
    }

    pub(crate) fn frame_at(&self, time: i32) -> &Data {
        let key = self.key_at(time);
        self.frames
            .get(key)
            .expect("keyframe channel resolved to a missing frame")
    }

    pub(crate) fn keyframe_count(&self) -> usize {
        self.channel.len()
    }

    pub(crate) fn set_keyframe(&mut self, time: i32, key: FrameKey) {
        assert!(
            self.frames.contains_key(key),
            "keyframe must reference an existing frame"
        );
        self.channel.insert(time, key);
    }

    pub(crate) fn remove_keyframe(&mut self, time: i32) -> Option<FrameKey> {
        self.channel.remove(&time)
    }

    /// Removes a frame and every keyframe referencing it. Returns the
    /// sole remaining data when exactly one frame is left, collapsing
    /// the animation.
    pub(crate) fn remove(&mut self, key: FrameKey) -> Option<Data> {
        self.frames.remove(key)?;
        self.channel.retain(|_, bound| *bound != key);
        if self.primary == key {
            self.primary = self
                .channel
                .values()
                .next()
                .copied()
                .or_else(|| self.frames.keys().next())
                .unwrap_or_default();
        }
        if self.frames.len() == 1 {
            let last_key = self.frames.keys().next().expect("one frame remains");
            return self.frames.remove(last_key);
        }
        None
    }

    pub(crate) fn frame_bounds(&self, key: FrameKey) -> Option<Rect> {
        self.frames.get(key).map(Data::extent)
    }

    pub(crate) fn frame_offset(&self, key: FrameKey) -> Option<Point> {
        self.frames.get(key).map(|data| data.offset)
    }
}
