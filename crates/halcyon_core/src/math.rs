//! Column-major 4x4 matrices, laid out exactly as shaders read them.

use bytemuck::{Pod, Zeroable};

/// Column-major 4x4 matrix. `self.0[c][r]` is column `c`, row `r`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Mat4(pub [[f32; 4]; 4]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    /// Identity matrix.
    pub const IDENTITY: Self = Self([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// Translation matrix.
    #[must_use]
    pub const fn from_translation(t: [f32; 3]) -> Self {
        Self([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [t[0], t[1], t[2], 1.0],
        ])
    }

    /// Non-uniform scale matrix.
    #[must_use]
    pub const fn from_scale(s: [f32; 3]) -> Self {
        Self([
            [s[0], 0.0, 0.0, 0.0],
            [0.0, s[1], 0.0, 0.0],
            [0.0, 0.0, s[2], 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Rotation from a unit quaternion `[x, y, z, w]`.
    #[must_use]
    pub fn from_quat(q: [f32; 4]) -> Self {
        let [x, y, z, w] = q;
        let (x2, y2, z2) = (x + x, y + y, z + z);
        let (xx, yy, zz) = (x * x2, y * y2, z * z2);
        let (xy, xz, yz) = (x * y2, x * z2, y * z2);
        let (wx, wy, wz) = (w * x2, w * y2, w * z2);
        Self([
            [1.0 - (yy + zz), xy + wz, xz - wy, 0.0],
            [xy - wz, 1.0 - (xx + zz), yz + wx, 0.0],
            [xz + wy, yz - wx, 1.0 - (xx + yy), 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Translation * rotation * scale.
    #[must_use]
    pub fn from_trs(translation: [f32; 3], rotation: [f32; 4], scale: [f32; 3]) -> Self {
        Self::from_translation(translation)
            .mul(&Self::from_quat(rotation))
            .mul(&Self::from_scale(scale))
    }

    /// Right-handed perspective projection with a [0, 1] depth range.
    #[must_use]
    pub fn perspective_rh(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let f = 1.0 / (fov_y * 0.5).tan();
        let range = near / (near - far);
        Self([
            [f / aspect, 0.0, 0.0, 0.0],
            [0.0, f, 0.0, 0.0],
            [0.0, 0.0, range * far / near, -1.0],
            [0.0, 0.0, range * far, 0.0],
        ])
    }

    /// Right-handed view matrix looking from `eye` at `target`.
    #[must_use]
    pub fn look_at_rh(eye: [f32; 3], target: [f32; 3], up: [f32; 3]) -> Self {
        let f = normalize(sub(target, eye));
        let s = normalize(cross(f, up));
        let u = cross(s, f);
        Self([
            [s[0], u[0], -f[0], 0.0],
            [s[1], u[1], -f[1], 0.0],
            [s[2], u[2], -f[2], 0.0],
            [-dot(s, eye), -dot(u, eye), dot(f, eye), 1.0],
        ])
    }

    /// Matrix product `self * rhs`.
    #[must_use]
    pub fn mul(&self, rhs: &Self) -> Self {
        let mut out = [[0.0f32; 4]; 4];
        for (c, column) in out.iter_mut().enumerate() {
            for (r, value) in column.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.0[k][r] * rhs.0[c][k]).sum();
            }
        }
        Self(out)
    }

    /// Transforms a point (w = 1).
    #[must_use]
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0][0] * p[0] + m[1][0] * p[1] + m[2][0] * p[2] + m[3][0],
            m[0][1] * p[0] + m[1][1] * p[1] + m[2][1] * p[2] + m[3][1],
            m[0][2] * p[0] + m[1][2] * p[1] + m[2][2] * p[2] + m[3][2],
        ]
    }

    /// Translation column.
    #[must_use]
    pub const fn translation(&self) -> [f32; 3] {
        [self.0[3][0], self.0[3][1], self.0[3][2]]
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len > 0.0 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_composes() {
        let a = Mat4::from_translation([1.0, 2.0, 3.0]);
        let b = Mat4::from_translation([10.0, 0.0, 0.0]);
        assert_eq!(a.mul(&b).translation(), [11.0, 2.0, 3.0]);
        assert_eq!(Mat4::IDENTITY.mul(&a), a);
    }

    #[test]
    fn test_trs_applies_scale_then_translation() {
        let m = Mat4::from_trs([1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], [2.0, 2.0, 2.0]);
        assert_eq!(m.transform_point([1.0, 1.0, 1.0]), [3.0, 2.0, 2.0]);
    }

    #[test]
    fn test_look_at_moves_eye_to_origin() {
        let view = Mat4::look_at_rh([0.0, 0.0, 5.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let p = view.transform_point([0.0, 0.0, 5.0]);
        assert!(p.iter().all(|c| c.abs() < 1e-5));
    }

    #[test]
    fn test_size_is_64_bytes() {
        assert_eq!(std::mem::size_of::<Mat4>(), 64);
    }
}
