//! Export-time keyframe preparation: baking continuous curves, holding step keys and
//! padding tracks to the clip boundaries.

use super::{AnimationClip, Channel, ChannelCurve, Interpolation, Keyframe, KeyframeTrack};
use crate::skeleton::Skeleton;

/// Sample a curve once per frame over its range.
pub fn bake_curve(curve: &ChannelCurve) -> KeyframeTrack {
    let (first, last) = if curve.first_frame <= curve.last_frame {
        (curve.first_frame, curve.last_frame)
    } else {
        (curve.last_frame, curve.first_frame)
    };
    let keyframes = (first..=last)
        .map(|frame| Keyframe::new(frame, (curve.evaluate)(frame as f32)))
        .collect();
    KeyframeTrack::new(curve.channel, keyframes)
}

/// Replace every continuous source of the clip with baked keyframes. A baked curve
/// overrides an existing track on the same bone and channel.
pub fn apply_auto_bake(clip: &mut AnimationClip) {
    let curves = std::mem::take(&mut clip.curves);
    for curve in &curves {
        let baked = bake_curve(curve);
        tracing::debug!(
            clip = %clip.name,
            bone = curve.bone_index,
            channel = ?curve.channel,
            keys = baked.keyframes.len(),
            "baked curve"
        );
        let node = clip.node_mut(curve.bone_index);
        match node.track_mut(curve.channel) {
            Some(existing) => {
                existing.keyframes = baked.keyframes;
                existing.interpolation = Interpolation::Linear;
            }
            None => node.tracks.push(baked),
        }
    }
}

/// Rewrite a step track as a linear one that plays back the same: each change gets
/// a key one frame earlier holding the previous value.
pub fn step_to_linear(track: &mut KeyframeTrack) {
    if track.interpolation != Interpolation::Step {
        return;
    }
    let mut out: Vec<Keyframe> = Vec::with_capacity(track.keyframes.len() * 2);
    for key in &track.keyframes {
        if let Some(prev) = out.last().copied() {
            if key.frame > prev.frame + 1 && key.value != prev.value {
                out.push(Keyframe::new(key.frame - 1, prev.value));
            }
        }
        out.push(*key);
    }
    track.keyframes = out;
    track.interpolation = Interpolation::Linear;
}

/// Make sure the track has a key at frame 0 and at the clip's final frame,
/// copying the nearest existing value. Playback inside the keyed range is unchanged.
pub fn pad_edges(track: &mut KeyframeTrack, frame_count: u32) {
    let (Some(first), Some(last)) = (track.keyframes.first().copied(), track.keyframes.last().copied())
    else {
        return;
    };
    if first.frame != 0 {
        track.keyframes.insert(0, Keyframe::new(0, first.value));
    }
    let end = frame_count.saturating_sub(1).max(last.frame);
    if last.frame != end {
        track.keyframes.push(Keyframe::new(end, last.value));
    }
}

/// Pad every keyed track of the clip to frame 0 and the clip's final frame.
pub fn pad_clip_edges(clip: &mut AnimationClip) {
    let frame_count = clip.effective_frame_count();
    for node in clip.nodes.iter_mut() {
        for track in node.tracks.iter_mut() {
            pad_edges(track, frame_count);
        }
    }
}

/// Give each unanimated bone (other than the root at index 0) a single rest keyframe
/// at frame 0 on all three channels. Rest keys are not padded to the final frame.
pub fn insert_dummy_keyframes(clip: &mut AnimationClip, skeleton: &Skeleton) {
    for (index, bone) in skeleton.bones.iter().enumerate().skip(1) {
        let animated = clip
            .node(index)
            .is_some_and(|n| n.tracks.iter().any(|t| !t.keyframes.is_empty()));
        if animated {
            continue;
        }
        let t = &bone.transform;
        let [x, y, z] = t.translation;
        let [sx, sy, sz] = t.scale;
        let node = clip.node_mut(index);
        node.bone_name = bone.name.clone();
        node.tracks = vec![
            KeyframeTrack::new(Channel::Position, vec![Keyframe::new(0, [x, y, z, 1.0])]),
            KeyframeTrack::new(Channel::Rotation, vec![Keyframe::new(0, t.rotation)]),
            KeyframeTrack::new(Channel::Scale, vec![Keyframe::new(0, [sx, sy, sz, 1.0])]),
        ];
        tracing::trace!(bone = %bone.name, "rest keyframe added");
    }
    clip.nodes.sort_by_key(|n| n.bone_index);
}
