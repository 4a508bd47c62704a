// Animation codec tests: stable clip indices, export options and camera roll

use xv2_tools_lib::animation::camera::{decode_camera_ean, encode_camera_ean};
use xv2_tools_lib::animation::ean::{decode_ean, encode_ean, encode_ean_with, EanFile};
use xv2_tools_lib::animation::{
    AnimationClip, CameraClip, CameraKeyframe, Channel, ChannelCurve, Interpolation, Keyframe,
    KeyframeTrack,
};
use xv2_tools_lib::config::ExportOptions;
use xv2_tools_lib::CodecError;

#[path = "common/mod.rs"]
mod common;

fn clip(name: &str, index: u32, bone: usize, last_frame: u32) -> AnimationClip {
    let mut clip = AnimationClip::new(name, index);
    clip.node_mut(bone).tracks.push(KeyframeTrack::new(
        Channel::Position,
        vec![
            Keyframe::new(0, [0.0, 0.0, 0.0, 1.0]),
            Keyframe::new(last_frame, [0.0, 1.0, 0.0, 1.0]),
        ],
    ));
    clip
}

/// Clips given with indices {5, 2, 8} are written in ascending index order
#[test]
fn clips_are_emitted_by_stable_index() {
    println!("\nTesting: animation index stability");

    let mut file = EanFile::new(common::humanoid());
    file.clips = vec![
        clip("ATK_KICK", 5, 1, 10),
        clip("IDLE", 2, 2, 20),
        clip("GUARD", 8, 3, 5),
    ];
    let bytes = encode_ean(&file).expect("Failed to encode EAN");

    // slot table: nine entries, only 2, 5 and 8 filled, in ascending file order
    let count = u16::from_le_bytes([bytes[18], bytes[19]]) as usize;
    assert_eq!(count, 9);
    let table = common::read_u32(&bytes, 24) as usize;
    let offsets: Vec<u32> = (0..count).map(|i| common::read_u32(&bytes, table + i * 4)).collect();
    for (slot, offset) in offsets.iter().enumerate() {
        assert_eq!(*offset != 0, [2, 5, 8].contains(&slot), "slot {}", slot);
    }
    assert!(offsets[2] < offsets[5] && offsets[5] < offsets[8]);

    let decoded = decode_ean(&bytes).expect("Failed to decode EAN").value;
    let order: Vec<_> = decoded.clips.iter().map(|c| (c.index, c.name.as_str())).collect();
    println!("  decoded order: {:?}", order);
    assert_eq!(order, vec![(2, "IDLE"), (5, "ATK_KICK"), (8, "GUARD")]);
    assert_eq!(decoded.clip_by_index(5).unwrap().frame_count, 11);
}

/// Indices survive a decode then encode cycle, gaps included
#[test]
fn reencoding_keeps_indices() {
    let mut file = EanFile::new(common::humanoid());
    file.clips = vec![clip("B", 3, 1, 4), clip("A", 1, 1, 4)];
    let first = encode_ean(&file).unwrap();
    let decoded = decode_ean(&first).unwrap().value;
    let second = encode_ean(&decoded).unwrap();
    common::assert_same_bytes(&first, &second);
}

#[test]
fn duplicate_indices_are_rejected() {
    let mut file = EanFile::new(common::humanoid());
    file.clips = vec![clip("A", 4, 1, 2), clip("B", 4, 2, 2)];
    assert!(matches!(encode_ean(&file), Err(CodecError::CorruptOutput(_))));
}

#[test]
fn track_on_missing_bone_is_rejected() {
    let mut file = EanFile::new(common::humanoid());
    file.clips = vec![clip("A", 0, 40, 2)];
    assert!(matches!(
        encode_ean(&file),
        Err(CodecError::BoneIndexOutOfRange { index: 40, .. })
    ));
}

/// Continuous channels need auto-bake, which samples them once per frame
#[test]
fn auto_bake_samples_curves() {
    let mut file = EanFile::new(common::humanoid());
    let mut spin = AnimationClip::new("SPIN", 0);
    spin.curves.push(ChannelCurve::new(2, Channel::Position, 0..=6, |f| {
        [f * 0.5, 0.0, 0.0, 1.0]
    }));
    file.clips = vec![spin];

    assert!(matches!(
        encode_ean(&file),
        Err(CodecError::UnsupportedEncoding(_))
    ));

    let options = ExportOptions {
        auto_bake: true,
        insert_dummy_keyframes: false,
    };
    let bytes = encode_ean_with(&file, &options).expect("auto-bake export failed");
    let decoded = decode_ean(&bytes).unwrap().value;
    let track = decoded.clips[0]
        .node(2)
        .and_then(|n| n.track(Channel::Position))
        .expect("baked track missing");
    assert_eq!(track.keyframes.len(), 7);
    assert!((track.keyframes[4].value[0] - 2.0).abs() < 1e-3);
    assert_eq!(decoded.clips[0].frame_count, 7);
}

/// Dummy keyframes pad tracks to the clip edges without changing playback inside
#[test]
fn dummy_keyframes_pad_without_changing_playback() {
    let mut file = EanFile::new(common::humanoid());
    let mut walk = AnimationClip::new("WALK", 0);
    walk.frame_count = 12;
    walk.node_mut(3).tracks.push(KeyframeTrack::new(
        Channel::Position,
        vec![
            Keyframe::new(4, [0.0, 0.2, 0.0, 1.0]),
            Keyframe::new(8, [0.0, 0.6, 0.0, 1.0]),
        ],
    ));
    let source = walk.node(3).unwrap().tracks[0].clone();
    file.clips = vec![walk];

    let options = ExportOptions {
        auto_bake: false,
        insert_dummy_keyframes: true,
    };
    let decoded = decode_ean(&encode_ean_with(&file, &options).unwrap()).unwrap().value;
    let clip = &decoded.clips[0];

    let track = clip.node(3).unwrap().track(Channel::Position).unwrap();
    let frames: Vec<_> = track.keyframes.iter().map(|k| k.frame).collect();
    assert_eq!(frames, vec![0, 4, 8, 11]);
    for frame in 4..=8 {
        let want = source.sample(frame as f32, [0.0; 4]);
        let got = track.sample(frame as f32, [0.0; 4]);
        assert!((want[1] - got[1]).abs() < 1e-3, "frame {}", frame);
    }

    // every other non-root bone carries a single rest pose key
    for bone in 1..common::humanoid().len() {
        assert!(clip.node(bone).is_some(), "bone {} has no node", bone);
    }
    let rest = clip.node(5).unwrap().track(Channel::Rotation).unwrap();
    assert_eq!(rest.keyframes.len(), 1);
    assert!(clip.node(0).is_none(), "root got a rest key");
}

/// Tracks reach frame 0 and the final frame even with default options; rest keys
/// for unanimated bones stay opt-in
#[test]
fn default_export_pads_tracks_to_clip_edges() {
    let mut file = EanFile::new(common::humanoid());
    let mut walk = AnimationClip::new("WALK", 0);
    walk.frame_count = 12;
    walk.node_mut(3).tracks.push(KeyframeTrack::new(
        Channel::Position,
        vec![
            Keyframe::new(4, [0.0, 0.2, 0.0, 1.0]),
            Keyframe::new(8, [0.0, 0.6, 0.0, 1.0]),
        ],
    ));
    file.clips = vec![walk];

    let bytes = encode_ean_with(&file, &ExportOptions::default()).expect("Failed to encode EAN");
    let decoded = decode_ean(&bytes).expect("Failed to decode EAN").value;
    let clip = &decoded.clips[0];
    let track = clip.node(3).unwrap().track(Channel::Position).unwrap();
    let frames: Vec<_> = track.keyframes.iter().map(|k| k.frame).collect();
    assert_eq!(frames, vec![0, 4, 8, 11]);
    assert!((track.keyframes[0].value[1] - 0.2).abs() < 1e-3);
    assert!((track.keyframes[3].value[1] - 0.6).abs() < 1e-3);
    assert_eq!(clip.frame_count, 12);
    assert_eq!(clip.nodes.len(), 1);
}

/// Step keys are exported as linear keys that hold the same values
#[test]
fn step_tracks_keep_their_holds() {
    let mut file = EanFile::new(common::humanoid());
    let mut blink = AnimationClip::new("BLINK", 0);
    let mut track = KeyframeTrack::new(
        Channel::Scale,
        vec![Keyframe::new(0, [1.0; 4]), Keyframe::new(6, [0.5; 4])],
    );
    track.interpolation = Interpolation::Step;
    blink.node_mut(4).tracks.push(track);
    file.clips = vec![blink];

    let decoded = decode_ean(&encode_ean(&file).unwrap()).unwrap().value;
    let track = decoded.clips[0].node(4).unwrap().track(Channel::Scale).unwrap();
    assert_eq!(track.interpolation, Interpolation::Linear);
    assert!((track.sample(5.0, [0.0; 4])[0] - 1.0).abs() < 1e-3);
    assert!((track.sample(6.0, [0.0; 4])[0] - 0.5).abs() < 1e-3);
}

/// A camera rolled +30 degrees still reads +30 degrees after a round trip
#[test]
fn camera_roll_keeps_its_sign() {
    println!("\nTesting: camera roll sign");

    let mut shot = CameraClip::new("CAM_INTRO", 0);
    let mut key = CameraKeyframe::new(0);
    key.eye = [0.0, 1.6, -3.0];
    key.target = [0.0, 1.2, 0.0];
    key.roll_degrees = 30.0;
    key.fov_degrees = 45.0;
    let mut end = key;
    end.frame = 30;
    shot.keyframes = vec![key, end];

    let bytes = encode_camera_ean(&[shot], &ExportOptions::default()).unwrap();
    let clips = decode_camera_ean(&bytes).unwrap().value;
    let keys = &clips[0].keyframes;
    println!("  roll after round trip: {}", keys[0].roll_degrees);
    assert!((keys[0].roll_degrees - 30.0).abs() < 0.05);
    assert!((keys[1].roll_degrees - 30.0).abs() < 0.05);
    assert!((keys[0].fov_degrees - 45.0).abs() < 0.05);
}

#[test]
fn truncated_buffers_fail() {
    let mut file = EanFile::new(common::humanoid());
    file.clips = vec![clip("IDLE", 0, 1, 8)];
    let bytes = encode_ean(&file).unwrap();
    for cut in [1, 16, 31, bytes.len() / 2, bytes.len() - 1] {
        let result = decode_ean(&bytes[..cut]);
        assert!(
            matches!(result, Err(CodecError::TruncatedBuffer { .. })),
            "cut at {} gave {:?}",
            cut,
            result.map(|d| d.value.clips.len())
        );
    }
}

/// An unfamiliar version still decodes, with a warning
#[test]
fn unknown_version_is_a_warning() {
    let mut file = EanFile::new(common::humanoid());
    file.version = 40000;
    file.clips = vec![clip("IDLE", 0, 1, 3)];
    let decoded = decode_ean(&encode_ean(&file).unwrap()).expect("drifted version should decode");
    assert!(decoded.warnings.has(xv2_tools_lib::WarningKind::VersionDrift));
    assert_eq!(decoded.value.version, 40000);
}
