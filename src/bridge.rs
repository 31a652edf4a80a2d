//! Frame buffer bridge
//!
//! Normalizes decoded I420 frames into packed RGBA and stages them for upload
//! into a GPU texture on the render thread. The producing pipeline publishes
//! into the shared [`FrameSlot`] from its own context; the bridge consumes on
//! the render tick, so a texture handed to the drawable adapter is never
//! partially written. The GPU texture is recreated only when frame dimensions
//! change; otherwise it is updated in place.

use crate::pipeline::{DecodedFrame, FrameSlot};
use std::sync::Arc;

/// GPU-resident representation of the most recently uploaded frame
pub struct RenderTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl RenderTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Video Frame Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    fn write(&self, queue: &wgpu::Queue, rgba: &[u8]) {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// Packed RGBA image staged between normalization and GPU upload
struct StagedImage {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    /// Set when the staging buffer holds pixels not yet uploaded
    fresh: bool,
}

/// Bridges the pipeline's frame slot to a [`RenderTexture`]
pub struct FrameBridge {
    slot: Arc<FrameSlot>,
    staged: Option<StagedImage>,
    texture: Option<RenderTexture>,
}

impl FrameBridge {
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self {
            slot,
            staged: None,
            texture: None,
        }
    }

    /// Consume the latest decoded frame, if any, normalizing it into the
    /// staging buffer. Returns whether a new frame was staged.
    pub fn stage_latest(&mut self) -> bool {
        let Some(frame) = self.slot.take() else {
            return false;
        };
        if frame.width == 0 || frame.height == 0 {
            log::warn!("Discarding decoded frame with zero dimension");
            return false;
        }
        if frame.data.len() < frame.expected_len() {
            log::warn!(
                "Discarding undersized decoded frame: {} bytes, layout needs {}",
                frame.data.len(),
                frame.expected_len()
            );
            return false;
        }
        let rgba = normalize_to_rgba(&frame);
        self.staged = Some(StagedImage {
            rgba,
            width: frame.width,
            height: frame.height,
            fresh: true,
        });
        true
    }

    /// Dimensions of the most recently staged frame, `(0, 0)` before the
    /// first frame arrives
    pub fn staged_size(&self) -> (u32, u32) {
        self.staged
            .as_ref()
            .map(|s| (s.width, s.height))
            .unwrap_or((0, 0))
    }

    /// Whether a staged frame is waiting for upload
    pub fn has_pending_upload(&self) -> bool {
        self.staged.as_ref().is_some_and(|s| s.fresh)
    }

    /// Upload the staged frame into the GPU texture. Recreates the texture
    /// only when the frame dimensions differ from the current one.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let Some(staged) = self.staged.as_mut() else {
            return;
        };
        if !staged.fresh {
            return;
        }

        let recreate = self
            .texture
            .as_ref()
            .map(|t| t.width != staged.width || t.height != staged.height)
            .unwrap_or(true);
        if recreate {
            log::debug!("Creating video texture {}x{}", staged.width, staged.height);
            self.texture = Some(RenderTexture::new(device, staged.width, staged.height));
        }
        if let Some(texture) = &self.texture {
            texture.write(queue, &staged.rgba);
        }
        staged.fresh = false;
    }

    /// The current presentable texture, if a frame has been uploaded
    pub fn texture(&self) -> Option<&RenderTexture> {
        self.texture.as_ref()
    }

    /// Release the GPU texture and staged pixels, keeping the slot alive
    pub fn release(&mut self) {
        self.texture = None;
        self.staged = None;
        self.slot.clear();
    }
}

/// Convert one I420 frame into tightly packed RGBA (BT.601).
///
/// The frame's layout supplies the plane strides: a contiguous frame walks
/// the planes linearly, a non-contiguous frame steps over per-row padding so
/// the output never skews or tears.
pub fn normalize_to_rgba(frame: &DecodedFrame) -> Vec<u8> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let (y_stride, uv_stride) = frame.strides();

    let y_plane = &frame.data[..];
    let u_offset = y_stride * height;
    let v_offset = u_offset + uv_stride * height.div_ceil(2);

    let mut rgba = vec![0u8; width * height * 4];
    for row in 0..height {
        let y_row = &y_plane[row * y_stride..];
        let u_row = &frame.data[u_offset + (row / 2) * uv_stride..];
        let v_row = &frame.data[v_offset + (row / 2) * uv_stride..];
        let out_row = &mut rgba[row * width * 4..(row + 1) * width * 4];

        for col in 0..width {
            let y = y_row[col] as i32;
            let u = u_row[col / 2] as i32;
            let v = v_row[col / 2] as i32;

            let c = 298 * (y - 16);
            let d = u - 128;
            let e = v - 128;

            let r = (c + 409 * e + 128) >> 8;
            let g = (c - 100 * d - 208 * e + 128) >> 8;
            let b = (c + 516 * d + 128) >> 8;

            let out = &mut out_row[col * 4..col * 4 + 4];
            out[0] = r.clamp(0, 255) as u8;
            out[1] = g.clamp(0, 255) as u8;
            out[2] = b.clamp(0, 255) as u8;
            out[3] = 255;
        }
    }
    rgba
}
