pub mod bake;
pub mod camera;
pub mod ean;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::math::{lerp4, slerp_xyzw};

pub use camera::{decode_camera_ean, encode_camera_ean, CameraClip, CameraKeyframe};
pub use ean::{decode_ean, encode_ean, encode_ean_with, EanFile};

/// Which transform channel a track drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    Position,
    Rotation,
    Scale,
    /// Component kind this crate does not interpret, kept for re-encoding.
    Unknown(u8),
}

impl Channel {
    pub fn from_raw(raw: u8) -> Channel {
        match raw {
            0 => Channel::Position,
            1 => Channel::Rotation,
            2 => Channel::Scale,
            other => Channel::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Channel::Position => 0,
            Channel::Rotation => 1,
            Channel::Scale => 2,
            Channel::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Interpolation {
    #[default]
    Linear,
    /// Hold each key until the next one.
    Step,
}

/// Storage width of keyframe values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FloatPrecision {
    #[default]
    Half,
    Single,
}

impl FloatPrecision {
    pub fn raw(self) -> u8 {
        match self {
            FloatPrecision::Half => 1,
            FloatPrecision::Single => 2,
        }
    }

    pub fn from_raw(raw: u8) -> Option<FloatPrecision> {
        match raw {
            1 => Some(FloatPrecision::Half),
            2 => Some(FloatPrecision::Single),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keyframe {
    pub frame: u32,
    pub value: [f32; 4],
}

impl Keyframe {
    pub fn new(frame: u32, value: [f32; 4]) -> Self {
        Self { frame, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyframeTrack {
    pub channel: Channel,
    pub interpolation: Interpolation,
    /// Second byte of the component record (7 on character clips, 3 on cameras).
    pub flags: u8,
    pub unknown_02: i16,
    pub keyframes: Vec<Keyframe>,
}

pub const CHARACTER_TRACK_FLAGS: u8 = 7;
pub const CAMERA_TRACK_FLAGS: u8 = 3;

impl KeyframeTrack {
    pub fn new(channel: Channel, keyframes: Vec<Keyframe>) -> Self {
        Self {
            channel,
            interpolation: Interpolation::Linear,
            flags: CHARACTER_TRACK_FLAGS,
            unknown_02: 0,
            keyframes,
        }
    }

    pub fn first_frame(&self) -> Option<u32> {
        self.keyframes.first().map(|k| k.frame)
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.keyframes.last().map(|k| k.frame)
    }

    pub fn is_sorted(&self) -> bool {
        self.keyframes.windows(2).all(|w| w[0].frame <= w[1].frame)
    }

    /// Stable sort by frame.
    pub fn sort(&mut self) {
        self.keyframes.sort_by_key(|k| k.frame);
    }

    /// Value at `frame`.
    ///
    /// An exact key wins. Otherwise the neighbouring keys are blended; a missing
    /// neighbour is replaced by `default` one frame away, so values ease towards
    /// `default` outside the keyed range. Rotations blend as quaternions.
    pub fn sample(&self, frame: f32, default: [f32; 4]) -> [f32; 4] {
        if self.keyframes.is_empty() {
            return default;
        }
        let mut prev: Option<&Keyframe> = None;
        let mut next: Option<&Keyframe> = None;
        for key in &self.keyframes {
            let at = key.frame as f32;
            if at == frame {
                return key.value;
            }
            if at < frame {
                prev = Some(key);
            } else {
                next = Some(key);
                break;
            }
        }

        let (prev_frame, prev_value) = match prev {
            Some(k) => (k.frame as f32, k.value),
            None => (frame - 1.0, default),
        };
        if self.interpolation == Interpolation::Step {
            return prev_value;
        }
        let (next_frame, next_value) = match next {
            Some(k) => (k.frame as f32, k.value),
            None => (frame + 1.0, default),
        };
        if next_frame == prev_frame {
            return prev_value;
        }
        let t = (frame - prev_frame) / (next_frame - prev_frame);
        match self.channel {
            Channel::Rotation => slerp_xyzw(prev_value, next_value, t),
            _ => lerp4(prev_value, next_value, t),
        }
    }
}

/// Tracks driving one skeleton bone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationNode {
    pub bone_index: usize,
    /// Filled on decode from the embedded skeleton; informational on encode.
    pub bone_name: String,
    pub tracks: Vec<KeyframeTrack>,
}

impl AnimationNode {
    pub fn new(bone_index: usize, tracks: Vec<KeyframeTrack>) -> Self {
        Self {
            bone_index,
            bone_name: String::new(),
            tracks,
        }
    }

    pub fn track(&self, channel: Channel) -> Option<&KeyframeTrack> {
        self.tracks.iter().find(|t| t.channel == channel)
    }

    pub fn track_mut(&mut self, channel: Channel) -> Option<&mut KeyframeTrack> {
        self.tracks.iter_mut().find(|t| t.channel == channel)
    }
}

pub type CurveFn = Arc<dyn Fn(f32) -> [f32; 4] + Send + Sync>;

/// A continuously defined channel that has to be sampled before it can be stored.
#[derive(Clone)]
pub struct ChannelCurve {
    pub bone_index: usize,
    pub channel: Channel,
    pub first_frame: u32,
    pub last_frame: u32,
    pub evaluate: CurveFn,
}

impl ChannelCurve {
    pub fn new(
        bone_index: usize,
        channel: Channel,
        frames: std::ops::RangeInclusive<u32>,
        evaluate: impl Fn(f32) -> [f32; 4] + Send + Sync + 'static,
    ) -> Self {
        Self {
            bone_index,
            channel,
            first_frame: *frames.start(),
            last_frame: *frames.end(),
            evaluate: Arc::new(evaluate),
        }
    }
}

impl fmt::Debug for ChannelCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCurve")
            .field("bone_index", &self.bone_index)
            .field("channel", &self.channel)
            .field("first_frame", &self.first_frame)
            .field("last_frame", &self.last_frame)
            .finish_non_exhaustive()
    }
}

/// One animation. `index` is the slot consumers look the clip up by and is kept
/// apart from the clip's position in any list.
#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub index: u32,
    pub frame_count: u32,
    pub float_precision: FloatPrecision,
    pub nodes: Vec<AnimationNode>,
    /// Continuous sources, turned into keyframes by auto-bake on export.
    pub curves: Vec<ChannelCurve>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
            frame_count: 0,
            float_precision: FloatPrecision::Half,
            nodes: Vec::new(),
            curves: Vec::new(),
        }
    }

    pub fn node(&self, bone_index: usize) -> Option<&AnimationNode> {
        self.nodes.iter().find(|n| n.bone_index == bone_index)
    }

    /// Node for `bone_index`, created empty when missing.
    pub fn node_mut(&mut self, bone_index: usize) -> &mut AnimationNode {
        let pos = match self.nodes.iter().position(|n| n.bone_index == bone_index) {
            Some(pos) => pos,
            None => {
                self.nodes.push(AnimationNode::new(bone_index, Vec::new()));
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[pos]
    }

    pub fn last_keyed_frame(&self) -> Option<u32> {
        self.nodes
            .iter()
            .flat_map(|n| n.tracks.iter())
            .filter_map(KeyframeTrack::last_frame)
            .max()
    }

    /// Frame count needed to hold every key: the stored count, grown to cover keys.
    pub fn effective_frame_count(&self) -> u32 {
        let keyed = self.last_keyed_frame().map_or(0, |f| f + 1);
        self.frame_count.max(keyed)
    }
}
