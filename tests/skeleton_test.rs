// Skeleton codec tests: round trips, parent validation and truncation

use xv2_tools_lib::math::Transform;
use xv2_tools_lib::skeleton::esk::{decode_esk, encode_esk, EskFile};
use xv2_tools_lib::skeleton::{HierarchyNode, Skeleton};
use xv2_tools_lib::{CodecError, WarningKind};

#[path = "common/mod.rs"]
mod common;

/// Decoding an encoded skeleton restores every bone's name, parent and transform
#[test]
fn round_trip_preserves_bones() {
    println!("\nTesting: ESK round trip");

    let original = common::humanoid();
    let bytes = encode_esk(&EskFile::new(original.clone())).expect("Failed to encode ESK");
    let decoded = decode_esk(&bytes).expect("Failed to decode ESK");
    assert!(decoded.warnings.is_empty(), "{:?}", decoded.warnings);

    let skeleton = &decoded.value.skeleton;
    assert_eq!(skeleton.len(), original.len());
    for (index, (got, want)) in skeleton.bones.iter().zip(&original.bones).enumerate() {
        assert_eq!(got.name, want.name, "bone {} name", index);
        assert_eq!(got.parent, want.parent, "bone {} parent", index);
        assert_eq!(got.transform, want.transform, "bone {} transform", index);
    }

    // a second pass is byte-stable
    let again = encode_esk(&decoded.value).expect("Failed to re-encode ESK");
    common::assert_same_bytes(&bytes, &again);
}

/// The thumb bone is an ordinary table entry
#[test]
fn thumb_bone_keeps_its_slot() {
    let bytes = encode_esk(&EskFile::new(common::humanoid())).unwrap();
    let skeleton = decode_esk(&bytes).unwrap().value.skeleton;
    let thumb = skeleton.find("b_R_Thumb1").expect("thumb bone missing");
    assert_eq!(thumb, 5);
    assert!(skeleton.bones[thumb].is_thumb());
    assert_eq!(skeleton.bones[thumb].parent, skeleton.find("b_R_Hand"));
}

/// Bone 2 and bone 5 naming each other as parents must fail cleanly
#[test]
fn cyclic_parents_are_rejected() {
    println!("\nTesting: cyclic skeleton rejection");

    let mut bytes = encode_esk(&EskFile::new(common::humanoid())).unwrap();
    common::set_esk_parents(&mut bytes, &[(2, 5), (5, 2)]);

    match decode_esk(&bytes) {
        Err(CodecError::MalformedSkeleton(reason)) => {
            println!("  rejected: {}", reason);
            assert!(reason.contains("cycle"));
        }
        other => panic!("expected MalformedSkeleton, got {:?}", other.map(|d| d.value)),
    }
}

#[test]
fn self_parent_is_a_cycle() {
    let mut bytes = encode_esk(&EskFile::new(common::humanoid())).unwrap();
    common::set_esk_parents(&mut bytes, &[(3, 3)]);
    assert!(matches!(
        decode_esk(&bytes),
        Err(CodecError::MalformedSkeleton(_))
    ));
}

#[test]
fn parent_past_bone_count_is_rejected() {
    let mut bytes = encode_esk(&EskFile::new(common::humanoid())).unwrap();
    common::set_esk_parents(&mut bytes, &[(1, 40)]);
    assert!(matches!(
        decode_esk(&bytes),
        Err(CodecError::MalformedSkeleton(_))
    ));
}

/// A later parent without a cycle decodes, with a warning
#[test]
fn forward_parent_is_a_warning() {
    let mut bytes = encode_esk(&EskFile::new(common::humanoid())).unwrap();
    // base hangs under the pelvis root
    common::set_esk_parents(&mut bytes, &[(1, -1), (0, 1)]);
    let decoded = decode_esk(&bytes).expect("forward parent should decode");
    assert!(decoded.warnings.has(WarningKind::ForwardParentReference));
    assert_eq!(decoded.value.skeleton.bones[0].parent, Some(1));
}

/// Every cut shorter than the declared file size fails with a truncation error
#[test]
fn truncated_buffers_fail() {
    let bytes = encode_esk(&EskFile::new(common::humanoid())).unwrap();
    for cut in [0, 3, 16, 31, 40, bytes.len() / 2, bytes.len() - 1] {
        let result = decode_esk(&bytes[..cut]);
        assert!(
            matches!(result, Err(CodecError::TruncatedBuffer { .. })),
            "cut at {} gave {:?}",
            cut,
            result.map(|d| d.value)
        );
    }
}

/// A hierarchy built elsewhere gets a parent-before-child table
#[test]
fn foreign_hierarchy_is_laid_out_parent_first() {
    let node = |name: &str, parent: Option<&str>| HierarchyNode {
        name: name.into(),
        parent: parent.map(str::to_string),
        transform: Transform::IDENTITY,
    };
    let nodes = [
        node("b_C_Head", Some("b_C_Neck")),
        node("b_C_Neck", Some("b_C_Base")),
        node("b_C_Base", None),
        node("b_L_Arm", Some("b_C_Base")),
    ];
    let skeleton = Skeleton::from_hierarchy(&nodes).unwrap();
    let names: Vec<_> = skeleton.bones.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["b_C_Base", "b_C_Neck", "b_C_Head", "b_L_Arm"]);
    for (index, bone) in skeleton.bones.iter().enumerate() {
        if let Some(parent) = bone.parent {
            assert!(parent < index);
        }
    }

    let bytes = encode_esk(&EskFile::new(skeleton.clone())).unwrap();
    assert_eq!(decode_esk(&bytes).unwrap().value.skeleton.bones, skeleton.bones);
}
