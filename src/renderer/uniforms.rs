// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::renderer::backend::Extent2d;
use crate::settings::CameraSettings;

/// Per-frame view data read by the sprite vertex shader (group 0, binding 0).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ViewUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl ViewUniform {
    pub const SIZE: u64 = std::mem::size_of::<ViewUniform>() as u64;

    pub fn new(camera: &CameraSettings, extent: Extent2d) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let view = Mat4::look_at_rh(
            Vec3::from_array(camera.eye),
            Vec3::from_array(camera.target),
            Vec3::Y,
        );
        let proj = Mat4::perspective_rh(
            camera.fov_y_degrees.to_radians(),
            aspect.max(f32::EPSILON),
            camera.near,
            camera.far,
        );

        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

impl Default for ViewUniform {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            proj: Mat4::IDENTITY.to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_uniform_is_two_mat4() {
        assert_eq!(ViewUniform::SIZE, 128);
    }

    #[test]
    fn origin_projects_to_screen_centre() {
        let uniform = ViewUniform::new(&CameraSettings::default(), Extent2d::new(1280, 720));
        let view = Mat4::from_cols_array_2d(&uniform.view);
        let proj = Mat4::from_cols_array_2d(&uniform.proj);

        let clip = proj * view * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn zero_height_extent_does_not_produce_nan() {
        let uniform = ViewUniform::new(&CameraSettings::default(), Extent2d::new(640, 0));
        assert!(uniform.proj.iter().flatten().all(|v| v.is_finite()));
    }
}
