// SPDX-License-Identifier: CEPL-1.0
//! Camera math for the spinning cube.

pub use glam;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees of rotation about +Z per second of wall-clock time.
pub const SPIN_DEG_PER_SEC: f32 = 45.0;

pub const EYE: Vec3 = Vec3::new(3.0, 3.0, 3.0);
pub const FOV_Y_DEG: f32 = 45.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;

/// std140 layout of the `{ mat4 model; mat4 view; mat4 proj; }` uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Mvp {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl Mvp {
    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }

    /// Cube rotated by `elapsed` seconds, seen from [`EYE`] with +Z up.
    pub fn spinning(elapsed: f32, aspect: f32) -> Self {
        let angle = (elapsed * SPIN_DEG_PER_SEC).to_radians();
        let model = Mat4::from_rotation_z(angle);
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);
        Self::new(model, view, perspective_vk(FOV_Y_DEG.to_radians(), aspect))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Right-handed perspective with depth in [0, 1] and Y pointing down in clip space.
pub fn perspective_vk(fov_y: f32, aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(fov_y, aspect, Z_NEAR, Z_FAR);
    proj.y_axis.y *= -1.0;
    proj
}

/// Width over height; a degenerate height falls back to square.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn payload_is_three_mat4() {
        assert_eq!(std::mem::size_of::<Mvp>(), 3 * 64);
    }

    #[test]
    fn no_rotation_at_start() {
        let mvp = Mvp::spinning(0.0, 1.0);
        assert_eq!(mvp.model, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn quarter_turn_after_two_seconds() {
        let mvp = Mvp::spinning(2.0, 1.0);
        let model = Mat4::from_cols_array_2d(&mvp.model);
        let x = model * Vec4::X;
        assert!((x.x).abs() < 1e-5);
        assert!((x.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn projection_flips_y() {
        let gl = Mat4::perspective_rh(FOV_Y_DEG.to_radians(), 1.5, Z_NEAR, Z_FAR);
        let vk = perspective_vk(FOV_Y_DEG.to_radians(), 1.5);
        assert_eq!(vk.y_axis.y, -gl.y_axis.y);
        assert_eq!(vk.x_axis, gl.x_axis);
    }

    #[test]
    fn near_plane_maps_to_zero_depth() {
        let p = perspective_vk(FOV_Y_DEG.to_radians(), 1.0) * Vec4::new(0.0, 0.0, -Z_NEAR, 1.0);
        assert!((p.z / p.w).abs() < 1e-5);
    }

    #[test]
    fn aspect_guards_zero_height() {
        assert_eq!(aspect_ratio(800, 600), 800.0 / 600.0);
        assert_eq!(aspect_ratio(800, 0), 1.0);
    }
}
