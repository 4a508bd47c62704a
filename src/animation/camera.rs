//! Camera animations.
//!
//! A camera EAN has a one-bone skeleton named `Node`. Its position channel holds
//! the eye, its rotation channel the look-at target and its scale channel
//! `(-roll, fov, 0, 0)` in radians. The roll is stored negated.

use serde::Serialize;

use super::bake::pad_edges;
use super::ean::{decode_ean, encode_ean_with, EanFile, CAMERA_EAN_VERSION, DEFAULT_UNKNOWN_17};
use super::{
    AnimationClip, AnimationNode, Channel, FloatPrecision, Keyframe, KeyframeTrack,
    CAMERA_TRACK_FLAGS,
};
use crate::config::ExportOptions;
use crate::error::{CodecError, Decoded, Result};
use crate::math::Transform;
use crate::skeleton::{Bone, Skeleton};

pub const CAMERA_NODE_NAME: &str = "Node";
pub const CAMERA_TARGET_NAME: &str = "CameraTarget";
pub const DEFAULT_FOV_DEGREES: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraKeyframe {
    pub frame: u32,
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub roll_degrees: f32,
    pub fov_degrees: f32,
}

impl CameraKeyframe {
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            eye: [0.0; 3],
            target: [0.0; 3],
            roll_degrees: 0.0,
            fov_degrees: DEFAULT_FOV_DEGREES,
        }
    }

    fn lens_value(&self) -> [f32; 4] {
        [
            -self.roll_degrees.to_radians(),
            self.fov_degrees.to_radians(),
            0.0,
            0.0,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraClip {
    pub name: String,
    pub index: u32,
    pub keyframes: Vec<CameraKeyframe>,
}

pub fn camera_skeleton() -> Skeleton {
    Skeleton::new(vec![Bone::new(CAMERA_NODE_NAME, None, Transform::IDENTITY)])
}

impl CameraClip {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
            keyframes: Vec::new(),
        }
    }

    /// Generic clip with one node and eye, lens and target tracks. Every track is
    /// padded to frame 0 and the final frame.
    pub fn to_clip(&self) -> AnimationClip {
        let mut keys = self.keyframes.clone();
        keys.sort_by_key(|k| k.frame);
        let frame_count = keys.last().map_or(1, |k| k.frame + 1);

        let track = |channel: Channel, value: &dyn Fn(&CameraKeyframe) -> [f32; 4]| {
            let mut track = KeyframeTrack::new(
                channel,
                keys.iter().map(|k| Keyframe::new(k.frame, value(k))).collect(),
            );
            track.flags = CAMERA_TRACK_FLAGS;
            pad_edges(&mut track, frame_count);
            track
        };
        let tracks = vec![
            track(Channel::Position, &|k| [k.eye[0], k.eye[1], k.eye[2], 1.0]),
            track(Channel::Scale, &|k| k.lens_value()),
            track(Channel::Rotation, &|k| [k.target[0], k.target[1], k.target[2], 1.0]),
        ];

        let mut node = AnimationNode::new(0, tracks);
        node.bone_name = CAMERA_NODE_NAME.to_string();
        AnimationClip {
            name: self.name.clone(),
            index: self.index,
            frame_count,
            float_precision: FloatPrecision::Half,
            nodes: vec![node],
            curves: Vec::new(),
        }
    }

    /// Merge a decoded clip's camera tracks into per-frame keyframes, sampling each
    /// track at the union of keyed frames.
    pub fn from_clip(clip: &AnimationClip) -> CameraClip {
        let camera = clip
            .nodes
            .iter()
            .find(|n| n.bone_name.eq_ignore_ascii_case(CAMERA_NODE_NAME))
            .or_else(|| clip.nodes.first());
        let target_node = clip
            .nodes
            .iter()
            .find(|n| n.bone_name.eq_ignore_ascii_case(CAMERA_TARGET_NAME))
            .or(camera);

        let eye = camera.and_then(|n| n.track(Channel::Position));
        let lens = camera.and_then(|n| n.track(Channel::Scale));
        let target = target_node.and_then(|n| {
            // a separate target node stores the point as its position
            let separate = camera.map_or(true, |c| !std::ptr::eq(n, c));
            match n.track(Channel::Rotation) {
                Some(track) => Some(track),
                None if separate => n.track(Channel::Position),
                None => None,
            }
        });

        let mut frames: Vec<u32> = [eye, lens, target]
            .iter()
            .flatten()
            .flat_map(|t| t.keyframes.iter().map(|k| k.frame))
            .collect();
        frames.sort_unstable();
        frames.dedup();

        let default_lens = CameraKeyframe::new(0).lens_value();
        let keyframes = frames
            .into_iter()
            .map(|frame| {
                let at = frame as f32;
                let e = eye.map_or([0.0, 0.0, 0.0, 1.0], |t| t.sample(at, [0.0, 0.0, 0.0, 1.0]));
                let g = target.map_or([0.0, 0.0, 0.0, 1.0], |t| t.sample(at, [0.0, 0.0, 0.0, 1.0]));
                let l = lens.map_or(default_lens, |t| t.sample(at, default_lens));
                CameraKeyframe {
                    frame,
                    eye: [e[0], e[1], e[2]],
                    target: [g[0], g[1], g[2]],
                    roll_degrees: -l[0].to_degrees(),
                    fov_degrees: l[1].to_degrees(),
                }
            })
            .collect();

        CameraClip {
            name: clip.name.clone(),
            index: clip.index,
            keyframes,
        }
    }
}

pub fn encode_camera_ean(clips: &[CameraClip], options: &ExportOptions) -> Result<Vec<u8>> {
    let mut file = EanFile::new(camera_skeleton());
    file.version = CAMERA_EAN_VERSION;
    file.is_camera = true;
    file.unknown_17 = DEFAULT_UNKNOWN_17;
    file.clips = clips.iter().map(CameraClip::to_clip).collect();
    encode_ean_with(&file, options)
}

pub fn decode_camera_ean(data: &[u8]) -> Result<Decoded<Vec<CameraClip>>> {
    let decoded = decode_ean(data)?;
    if !decoded.value.is_camera {
        return Err(CodecError::unrecognized("EAN", "not a camera animation"));
    }
    Ok(decoded.map(|file| file.clips.iter().map(CameraClip::from_clip).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot() -> CameraClip {
        let mut clip = CameraClip::new("Shot", 0);
        let mut a = CameraKeyframe::new(0);
        a.eye = [0.0, 1.5, -4.0];
        a.target = [0.0, 1.0, 0.0];
        a.roll_degrees = 30.0;
        let mut b = a;
        b.frame = 12;
        b.fov_degrees = 55.0;
        b.roll_degrees = -10.0;
        clip.keyframes = vec![a, b];
        clip
    }

    #[test]
    fn roll_is_stored_negated() {
        let clip = shot().to_clip();
        let lens = clip.nodes[0].track(Channel::Scale).unwrap();
        assert!((lens.keyframes[0].value[0] + 30f32.to_radians()).abs() < 1e-6);
        assert!((lens.keyframes[1].value[1] - 55f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn camera_file_round_trips() {
        let bytes = encode_camera_ean(&[shot()], &ExportOptions::default()).unwrap();
        assert_eq!(bytes[16], 1);
        let decoded = decode_camera_ean(&bytes).unwrap().value;
        assert_eq!(decoded.len(), 1);
        let keys = &decoded[0].keyframes;
        assert_eq!(keys.len(), 2);
        assert!((keys[0].roll_degrees - 30.0).abs() < 0.05);
        assert!((keys[1].roll_degrees + 10.0).abs() < 0.05);
        assert!((keys[1].fov_degrees - 55.0).abs() < 0.05);
        assert!((keys[0].eye[2] + 4.0).abs() < 1e-3);
        assert!((keys[1].target[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn character_file_is_not_a_camera() {
        let mut file = EanFile::new(camera_skeleton());
        file.clips.push(shot().to_clip());
        let bytes = crate::animation::encode_ean(&file).unwrap();
        assert!(matches!(
            decode_camera_ean(&bytes),
            Err(CodecError::UnrecognizedFormat { .. })
        ));
    }
}
