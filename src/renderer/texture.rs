// renderer/texture.rs

use crate::error::RenderError;
use crate::io::FileSystem;
use crate::renderer::backend::{
    BufferUsage, DescriptorSetId, GraphicsBackend, ImageDescriptor, ImageLayout, ImageUsage,
    ImageViewId, MemoryProperties, PixelFormat,
};
use crate::renderer::device::{Device, GpuImage};

pub const TEXTURE_FORMAT: PixelFormat = PixelFormat::Rgba8Unorm;

/// Decoded RGBA8 pixels, bottom row first.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// One image file resident on the GPU, with the descriptor set that samples it.
#[derive(Debug)]
pub struct Texture {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub image: GpuImage,
    pub view: ImageViewId,
    pub descriptor_set: DescriptorSetId,
}

impl Texture {
    /// Loads `path` through `fs`, uploads it and binds it for sampling.
    pub fn load<B: GraphicsBackend>(
        device: &mut Device<B>,
        fs: &dyn FileSystem,
        path: &str,
    ) -> Result<Self, RenderError> {
        if path.is_empty() {
            return Err(RenderError::EmptyTexturePath);
        }
        log::info!("Loading texture: {:?}", path);

        if !fs.exists(path) {
            return Err(RenderError::FileNotFound(path.to_string()));
        }
        let bytes = fs.load(path)?;
        let decoded = decode_rgba8(path, &bytes)?;

        Self::from_rgba8(device, path, &decoded)
    }

    pub fn from_rgba8<B: GraphicsBackend>(
        device: &mut Device<B>,
        path: &str,
        decoded: &DecodedImage,
    ) -> Result<Self, RenderError> {
        let DecodedImage {
            width,
            height,
            ref pixels,
        } = *decoded;

        let row_bytes = width * TEXTURE_FORMAT.bytes_per_pixel();
        let bytes_per_row = padded_row_bytes(row_bytes, device.image_copy_row_alignment());
        let staging_data = pad_rows(pixels, row_bytes, bytes_per_row);

        let staging = device.create_buffer(
            "texture staging",
            staging_data.len() as u64,
            BufferUsage::TRANSFER_SRC,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        )?;
        if let Err(err) = device.write_buffer(&staging, &staging_data) {
            device.clear_buffer(staging);
            return Err(err);
        }

        let image = match device.create_image(
            &ImageDescriptor {
                width,
                height,
                format: TEXTURE_FORMAT,
                usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
            },
            MemoryProperties::DEVICE_LOCAL,
        ) {
            Ok(image) => image,
            Err(err) => {
                device.clear_buffer(staging);
                return Err(err);
            }
        };

        let uploaded = device
            .transition_image_layout(image.image, ImageLayout::Undefined, ImageLayout::TransferDst)
            .and_then(|()| {
                device.copy_buffer_to_image(staging.buffer, image.image, width, height, bytes_per_row)
            })
            .and_then(|()| {
                device.transition_image_layout(
                    image.image,
                    ImageLayout::TransferDst,
                    ImageLayout::ShaderReadOnly,
                )
            });
        device.clear_buffer(staging);
        if let Err(err) = uploaded {
            device.destroy_image(image);
            return Err(err);
        }

        let view = match device.create_image_view(image.image, TEXTURE_FORMAT) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_image(image);
                return Err(err);
            }
        };
        // A full descriptor pool must not leak the uploaded image.
        let descriptor_set = match device.create_texture_descriptor_set(view) {
            Ok(set) => set,
            Err(err) => {
                device.destroy_image_view(view);
                device.destroy_image(image);
                return Err(err);
            }
        };

        Ok(Self {
            path: path.to_string(),
            width,
            height,
            image,
            view,
            descriptor_set,
        })
    }

    /// Releases the set, then the view, then the image and its memory.
    pub fn destroy<B: GraphicsBackend>(self, device: &mut Device<B>) {
        device.free_descriptor_set(self.descriptor_set);
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
    }
}

/// Decodes any format the `image` crate understands into RGBA8, flipped so row 0 is the bottom.
pub fn decode_rgba8(path: &str, bytes: &[u8]) -> Result<DecodedImage, RenderError> {
    let img = image::load_from_memory(bytes).map_err(|e| RenderError::TextureDecode {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let rgba = img.flipv().to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(RenderError::TextureDecode {
            path: path.to_string(),
            reason: "image has no pixels".into(),
        });
    }

    Ok(DecodedImage {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

fn padded_row_bytes(row_bytes: u32, alignment: u32) -> u32 {
    row_bytes.div_ceil(alignment) * alignment
}

fn pad_rows(pixels: &[u8], row_bytes: u32, bytes_per_row: u32) -> Vec<u8> {
    if row_bytes == bytes_per_row {
        return pixels.to_vec();
    }

    let mut padded = Vec::with_capacity(pixels.len() / row_bytes as usize * bytes_per_row as usize);
    for row in pixels.chunks_exact(row_bytes as usize) {
        padded.extend_from_slice(row);
        padded.resize(padded.len() + (bytes_per_row - row_bytes) as usize, 0);
    }
    padded
}
