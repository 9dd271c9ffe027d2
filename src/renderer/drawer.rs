// renderer/drawer.rs
use crate::error::RenderError;
use crate::renderer::backend::{GraphicsBackend, UiOverlay};
use crate::renderer::batch::TexturedBatch;
use crate::renderer::device::{Device, GeometryBatch, GpuBuffer, MAX_FRAMES_IN_FLIGHT};

/// Buffers uploaded for one frame slot. They stay alive until the slot comes round again.
#[derive(Debug, Default)]
struct SlotBuffers {
    geometry: Vec<GeometryBatch>,
    indices: Vec<GpuBuffer>,
}

impl SlotBuffers {
    fn is_empty(&self) -> bool {
        self.geometry.is_empty() && self.indices.is_empty()
    }

    fn release<B: GraphicsBackend>(&mut self, device: &mut Device<B>) {
        for batch in self.geometry.drain(..) {
            device.clear_buffer(batch.vertices);
        }
        for buffer in self.indices.drain(..) {
            device.clear_buffer(buffer);
        }
    }
}

/// Uploads batches into per-slot buffers and finishes the frame with them.
pub struct BatchDrawer {
    slots: [SlotBuffers; MAX_FRAMES_IN_FLIGHT],
}

impl BatchDrawer {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| SlotBuffers::default()),
        }
    }

    /// Draws `batches` into the frame opened by `Device::begin_frame`.
    ///
    /// The slot's buffers from its previous use are freed first. `begin_frame` has
    /// already waited on that slot's fence, so the GPU no longer reads them.
    pub fn draw<B: GraphicsBackend>(
        &mut self,
        device: &mut Device<B>,
        batches: &[TexturedBatch],
        overlay: Option<&mut dyn UiOverlay<B>>,
    ) -> Result<(), RenderError> {
        if !device.frame_in_progress() {
            return Err(RenderError::NoFrameInProgress);
        }

        let slot = device.current_frame();
        let buffers = &mut self.slots[slot];
        if !buffers.is_empty() {
            log::debug!(
                "Releasing {} batch buffers of frame slot {slot}",
                buffers.geometry.len() + buffers.indices.len()
            );
            buffers.release(device);
        }

        for batch in batches.iter().filter(|batch| batch.sprite_count > 0) {
            let vertices = device.create_combined_vertex_buffer(&batch.geometry)?;
            buffers.geometry.push(GeometryBatch {
                vertices,
                texture_set: batch.descriptor_set,
                sprite_count: batch.sprite_count,
            });
            buffers.indices.push(device.create_index_buffer(batch.sprite_count)?);
        }

        device.end_frame(&buffers.geometry, &buffers.indices, overlay)
    }

    /// Buffers currently held for `slot`.
    pub fn live_buffers(&self, slot: usize) -> usize {
        self.slots
            .get(slot)
            .map_or(0, |buffers| buffers.geometry.len() + buffers.indices.len())
    }

    /// Waits for the GPU to go idle, then frees the buffers of every slot.
    pub fn release_all<B: GraphicsBackend>(&mut self, device: &mut Device<B>) {
        if self.slots.iter().all(SlotBuffers::is_empty) {
            return;
        }
        if let Err(err) = device.wait_idle() {
            log::error!("wait_idle failed before releasing batch buffers: {err}");
        }
        for buffers in &mut self.slots {
            buffers.release(device);
        }
    }
}

impl Default for BatchDrawer {
    fn default() -> Self {
        Self::new()
    }
}
