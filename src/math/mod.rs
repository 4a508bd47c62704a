use binrw::binrw;
use cgmath::{InnerSpace, Matrix3, Matrix4, Quaternion, SquareMatrix, Vector3};
use serde::{Deserialize, Serialize};

use crate::cursor::FixedRecord;

/// Homogeneous position/scale as stored on disk: xyz multiplied by w on read,
/// written back with w = 1.
#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
pub struct XvScaledVector(
    #[br(map = |raw: [f32; 4]| Vector3::new(raw[0] * raw[3], raw[1] * raw[3], raw[2] * raw[3]))]
    #[bw(map = |v: &Vector3<f32>| [v.x, v.y, v.z, 1.0f32])]
    pub Vector3<f32>,
);

/// Rotation stored x, y, z, w.
#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
pub struct XvQuaternion(
    #[br(map = |raw: [f32; 4]| Quaternion::new(raw[3], raw[0], raw[1], raw[2]))]
    #[bw(map = |q: &Quaternion<f32>| [q.v.x, q.v.y, q.v.z, q.s])]
    pub Quaternion<f32>,
);

/// Column-major 4x4 matrix.
#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
pub struct XvMatrix44(
    #[br(map = |raw: [f32; 16]| Matrix4::new(
        raw[0], raw[1], raw[2], raw[3],
        raw[4], raw[5], raw[6], raw[7],
        raw[8], raw[9], raw[10], raw[11],
        raw[12], raw[13], raw[14], raw[15]
    ))]
    #[bw(map = |m: &Matrix4<f32>| matrix_to_array(m))]
    pub Matrix4<f32>,
);

impl FixedRecord for XvMatrix44 {
    const SIZE: usize = 64;
}

pub fn matrix_to_array(m: &Matrix4<f32>) -> [f32; 16] {
    [
        m.x.x, m.x.y, m.x.z, m.x.w, m.y.x, m.y.y, m.y.z, m.y.w, m.z.x, m.z.y, m.z.z, m.z.w,
        m.w.x, m.w.y, m.w.z, m.w.w,
    ]
}

/// Local bone transform: translation, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: [f32; 3],
    /// x, y, z, w
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0; 3],
    };

    pub fn quaternion(&self) -> Quaternion<f32> {
        let r = self.rotation;
        Quaternion::new(r[3], r[0], r[1], r[2])
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        let t = Vector3::from(self.translation);
        let q = self.quaternion();
        let q = if q.magnitude2() > 0.0 {
            q.normalize()
        } else {
            Quaternion::new(1.0, 0.0, 0.0, 0.0)
        };
        Matrix4::from_translation(t)
            * Matrix4::from(q)
            * Matrix4::from_nonuniform_scale(self.scale[0], self.scale[1], self.scale[2])
    }

    /// Split an affine matrix into translation, rotation and scale.
    pub fn from_matrix(m: &Matrix4<f32>) -> Transform {
        let translation = [m.w.x, m.w.y, m.w.z];

        let mut col0 = Vector3::new(m.x.x, m.x.y, m.x.z);
        let mut col1 = Vector3::new(m.y.x, m.y.y, m.y.z);
        let mut col2 = Vector3::new(m.z.x, m.z.y, m.z.z);

        let scale = [col0.magnitude(), col1.magnitude(), col2.magnitude()];
        if scale[0] != 0.0 {
            col0 /= scale[0];
        }
        if scale[1] != 0.0 {
            col1 /= scale[1];
        }
        if scale[2] != 0.0 {
            col2 /= scale[2];
        }

        let q = Quaternion::from(Matrix3::from_cols(col0, col1, col2)).normalize();
        Transform {
            translation,
            rotation: [q.v.x, q.v.y, q.v.z, q.s],
            scale,
        }
    }

    pub fn approx_eq(&self, other: &Transform, epsilon: f32) -> bool {
        let negated = other.rotation.map(|c| -c);
        all_close(&self.translation, &other.translation, epsilon)
            && all_close(&self.scale, &other.scale, epsilon)
            && (all_close(&self.rotation, &other.rotation, epsilon)
                || all_close(&self.rotation, &negated, epsilon))
    }
}

fn all_close(a: &[f32], b: &[f32], epsilon: f32) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= epsilon)
}

pub fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Spherical interpolation of x, y, z, w quaternions along the shorter arc.
pub fn slerp_xyzw(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let qa = Quaternion::new(a[3], a[0], a[1], a[2]);
    let mut qb = Quaternion::new(b[3], b[0], b[1], b[2]);
    if qa.dot(qb) < 0.0 {
        qb = -qb;
    }
    if qa.magnitude2() == 0.0 || qb.magnitude2() == 0.0 {
        return lerp4(a, b, t);
    }
    let q = qa.normalize().slerp(qb.normalize(), t).normalize();
    [q.v.x, q.v.y, q.v.z, q.s]
}

pub fn invert_or_identity(m: &Matrix4<f32>) -> Matrix4<f32> {
    m.invert().unwrap_or_else(Matrix4::identity)
}
