pub mod esk;

use std::collections::HashMap;

use cgmath::{Matrix4, SquareMatrix};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result, WarningKind, Warnings};
use crate::math::{invert_or_identity, Transform};

pub use esk::{decode_esk, encode_esk, EskFile};

/// On-disk sentinel for "no bone" in parent/child/sibling links.
pub const NO_BONE: i16 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    /// `None` marks a root.
    pub parent: Option<usize>,
    pub transform: Transform,
    /// Trailing u16 of the link record, carried through untouched.
    pub link_flags: u16,
    /// Inverse bind matrix, column-major, when the file carries one.
    pub absolute_matrix: Option<[f32; 16]>,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent: Option<usize>, transform: Transform) -> Self {
        Self {
            name: name.into(),
            parent,
            transform,
            link_flags: 0,
            absolute_matrix: None,
        }
    }

    /// Thumb bones orient from their absolute matrix rather than the local chain.
    pub fn is_thumb(&self) -> bool {
        self.name.to_ascii_lowercase().contains("thumb")
    }
}

/// Ordered bone table. A bone's position is the key meshes and animations use
/// to reference it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
    pub flag: u16,
    pub extra: u32,
    pub skeleton_id: u64,
}

/// One node of a hierarchy built outside this crate, parents referenced by name.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyNode {
    pub name: String,
    pub parent: Option<String>,
    pub transform: Transform,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Self {
        Self {
            bones,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn name_index(&self) -> HashMap<&str, usize> {
        self.bones
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.as_str(), i))
            .collect()
    }

    /// Look up a bone referenced from another table.
    pub fn resolve_bone_index(&self, index: usize, context: &str) -> Result<&Bone> {
        self.bones
            .get(index)
            .ok_or_else(|| CodecError::bone_out_of_range(index, self.bones.len(), context))
    }

    /// Check parent links: in range and free of cycles.
    ///
    /// Returns the indices of bones whose parent comes later in the table. Those are
    /// legal as long as no cycle exists, but callers surface them as warnings.
    pub fn validate(&self) -> Result<Vec<usize>> {
        let parents: Vec<Option<usize>> = self.bones.iter().map(|b| b.parent).collect();
        validate_parents(&parents)
    }

    pub(crate) fn validate_with_warnings(&self, warnings: &mut Warnings) -> Result<()> {
        for index in self.validate()? {
            let parent = self.bones[index].parent.unwrap_or_default();
            warnings.push(
                WarningKind::ForwardParentReference,
                format!(
                    "bone {} '{}' references later parent {}",
                    index, self.bones[index].name, parent
                ),
            );
        }
        Ok(())
    }

    /// First-child and next-sibling links derived from the parent table.
    pub fn child_sibling_links(&self) -> Vec<(i16, i16)> {
        let mut links = vec![(NO_BONE, NO_BONE); self.bones.len()];
        let mut last_child: Vec<Option<usize>> = vec![None; self.bones.len()];
        let mut last_root: Option<usize> = None;

        for (index, bone) in self.bones.iter().enumerate() {
            let previous = match bone.parent {
                Some(parent) if parent < self.bones.len() => {
                    if links[parent].0 == NO_BONE {
                        links[parent].0 = index as i16;
                    }
                    last_child[parent].replace(index)
                }
                _ => last_root.replace(index),
            };
            if let Some(prev) = previous {
                links[prev].1 = index as i16;
            }
        }
        links
    }

    /// Indices ordered so every parent precedes its children.
    pub fn parent_first_order(&self) -> Result<Vec<usize>> {
        self.validate()?;
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.bones.len()];
        let mut roots = Vec::new();
        for (index, bone) in self.bones.iter().enumerate() {
            match bone.parent {
                Some(p) => children[p].push(index),
                None => roots.push(index),
            }
        }

        let mut order = Vec::with_capacity(self.bones.len());
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(children[index].iter().rev());
        }
        Ok(order)
    }

    /// Rest pose world matrices, one per bone in table order.
    ///
    /// Thumb bones use their inverse absolute matrix when one was stored.
    pub fn world_matrices(&self) -> Result<Vec<Matrix4<f32>>> {
        let mut world = vec![Matrix4::identity(); self.bones.len()];
        for index in self.parent_first_order()? {
            let bone = &self.bones[index];
            if bone.is_thumb() {
                if let Some(abs) = &bone.absolute_matrix {
                    world[index] = invert_or_identity(&matrix_from_array(abs));
                    continue;
                }
            }
            let local = bone.transform.to_matrix();
            world[index] = match bone.parent {
                Some(parent) => world[parent] * local,
                None => local,
            };
        }
        Ok(world)
    }

    /// Build a skeleton from a foreign hierarchy.
    ///
    /// Bones are laid out depth-first: roots in input order, each followed by its
    /// subtree, siblings keeping their input order.
    pub fn from_hierarchy(nodes: &[HierarchyNode]) -> Result<Skeleton> {
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if by_name.insert(node.name.as_str(), i).is_some() {
                return Err(CodecError::MalformedSkeleton(format!(
                    "duplicate bone name '{}'",
                    node.name
                )));
            }
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut roots = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            match &node.parent {
                Some(parent) => {
                    let p = *by_name.get(parent.as_str()).ok_or_else(|| {
                        CodecError::MalformedSkeleton(format!(
                            "bone '{}' references unknown parent '{}'",
                            node.name, parent
                        ))
                    })?;
                    children[p].push(i);
                }
                None => roots.push(i),
            }
        }

        let mut order = Vec::with_capacity(nodes.len());
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(children[i].iter().rev());
        }
        if order.len() != nodes.len() {
            return Err(CodecError::MalformedSkeleton(format!(
                "{} bones are not reachable from a root (parent cycle)",
                nodes.len() - order.len()
            )));
        }

        let mut new_index = vec![0usize; nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }

        let bones = order
            .iter()
            .map(|&old| {
                let node = &nodes[old];
                let parent = node
                    .parent
                    .as_deref()
                    .and_then(|p| by_name.get(p))
                    .map(|&p| new_index[p]);
                Bone::new(node.name.clone(), parent, node.transform)
            })
            .collect();

        Ok(Skeleton::new(bones))
    }
}

pub fn matrix_from_array(a: &[f32; 16]) -> Matrix4<f32> {
    Matrix4::new(
        a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8], a[9], a[10], a[11], a[12], a[13],
        a[14], a[15],
    )
}

/// Validate a parent table without recursion.
///
/// Each walk climbs from a bone towards its root, stopping at bones already proven
/// acyclic. Meeting a bone on the current path means a cycle.
pub fn validate_parents(parents: &[Option<usize>]) -> Result<Vec<usize>> {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let count = parents.len();
    let mut forward = Vec::new();
    for (index, parent) in parents.iter().enumerate() {
        if let Some(p) = *parent {
            if p >= count {
                return Err(CodecError::MalformedSkeleton(format!(
                    "bone {} has parent {} but only {} bones exist",
                    index, p, count
                )));
            }
            if p >= index {
                forward.push(index);
            }
        }
    }

    let mut state = vec![UNSEEN; count];
    let mut path = Vec::new();
    for start in 0..count {
        let mut current = Some(start);
        while let Some(index) = current {
            match state[index] {
                DONE => break,
                ON_PATH => {
                    return Err(CodecError::MalformedSkeleton(format!(
                        "parent cycle through bone {}",
                        index
                    )))
                }
                _ => {
                    state[index] = ON_PATH;
                    path.push(index);
                    current = parents[index];
                }
            }
        }
        for index in path.drain(..) {
            state[index] = DONE;
        }
    }
    Ok(forward)
}
