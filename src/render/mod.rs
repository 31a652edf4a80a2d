//! GPU presentation of video frames
//!
//! One textured quad per drawable video: the frame texture uploaded by the
//! frame buffer bridge is sampled onto a unit quad, placed by a transform
//! computed from the drawable's view state, and faded by its alpha.

mod quad;

pub use quad::QuadRenderer;

use glam::{Mat4, Vec2, Vec3};

/// Vertex format for the video quad
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            },
            wgpu::VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 2], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }
}

/// Per-draw uniforms for the video quad shader
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadUniforms {
    /// Unit-quad to clip-space transform
    pub transform: [[f32; 4]; 4],
    /// `[alpha, 0, 0, 0]`; alpha multiplies the sampled frame
    pub tint: [f32; 4],
}

impl QuadUniforms {
    pub fn new(transform: Mat4, alpha: f32) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            tint: [alpha.clamp(0.0, 1.0), 0.0, 0.0, 0.0],
        }
    }
}

/// Unit quad in `[0, 1]^2` with matching texture coordinates, y-down
pub fn unit_quad() -> [Vertex; 6] {
    [
        Vertex::new([0.0, 0.0], [0.0, 0.0]),
        Vertex::new([1.0, 0.0], [1.0, 0.0]),
        Vertex::new([1.0, 1.0], [1.0, 1.0]),
        Vertex::new([0.0, 0.0], [0.0, 0.0]),
        Vertex::new([1.0, 1.0], [1.0, 1.0]),
        Vertex::new([0.0, 1.0], [0.0, 1.0]),
    ]
}

/// Map a screen-space rectangle (pixels, origin top-left, y-down) onto the
/// unit quad's clip-space position.
pub fn quad_transform(origin: Vec2, size: Vec2, screen: Vec2) -> Mat4 {
    let scale = Vec3::new(2.0 * size.x / screen.x, -2.0 * size.y / screen.y, 1.0);
    let translate = Vec3::new(
        2.0 * origin.x / screen.x - 1.0,
        1.0 - 2.0 * origin.y / screen.y,
        0.0,
    );
    Mat4::from_translation(translate) * Mat4::from_scale(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn map(m: Mat4, x: f32, y: f32) -> (f32, f32) {
        let v = m * Vec4::new(x, y, 0.0, 1.0);
        (v.x, v.y)
    }

    #[test]
    fn test_fullscreen_rect_covers_clip_space() {
        let screen = Vec2::new(1920.0, 1080.0);
        let m = quad_transform(Vec2::ZERO, screen, screen);
        assert_eq!(map(m, 0.0, 0.0), (-1.0, 1.0));
        assert_eq!(map(m, 1.0, 1.0), (1.0, -1.0));
    }

    #[test]
    fn test_offset_rect_maps_top_left_corner() {
        let screen = Vec2::new(100.0, 100.0);
        let m = quad_transform(Vec2::new(50.0, 50.0), Vec2::new(50.0, 50.0), screen);
        // Quad origin lands at screen center, far corner at bottom-right.
        assert_eq!(map(m, 0.0, 0.0), (0.0, 0.0));
        assert_eq!(map(m, 1.0, 1.0), (1.0, -1.0));
    }

    #[test]
    fn test_uniforms_clamp_alpha() {
        let u = QuadUniforms::new(Mat4::IDENTITY, 1.7);
        assert_eq!(u.tint[0], 1.0);
    }
}
