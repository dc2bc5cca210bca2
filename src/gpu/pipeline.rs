// gpu/pipeline.rs: upload → dispatch → download.
//
// `MorphPipeline` pairs a `GpuContext` with a compiled `MorphKernel`. Each
// `apply` call:
//
//   1. allocates a fresh `ImageBufferPair` shaped like the input,
//   2. binds (input, selector, output) to the kernel,
//   3. enqueues the upload (non-blocking),
//   4. enqueues the dispatch, one invocation per pixel,
//   5. downloads into a new image (blocking, the only wait),
//   6. drops the per-call buffers.
//
// The context and kernel are read-only after construction, so one pipeline
// can serve calls from several threads; each call owns its buffers.
//
// PROCESS-WIDE PIPELINE
// ─────────────────────
// `apply_morph_op` uses a lazily created pipeline kept in a mutex-guarded
// slot. The first caller pays for adapter selection and shader compilation;
// concurrent first callers wait on the mutex instead of racing to create
// two devices. A failed creation leaves the slot empty, so the next call
// tries again. `release_shared_pipeline` drops the slot's reference; the
// device itself goes away once the last in-flight call releases its `Arc`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::gpu::buffers::ImageBufferPair;
use crate::gpu::device::{DeviceOptions, GpuContext};
use crate::gpu::kernel::MorphKernel;
use crate::image::GrayImage;
use crate::op::MorphOp;

/// A device context with the morphology program compiled on it.
pub struct MorphPipeline {
    ctx: Arc<GpuContext>,
    kernel: MorphKernel,
}

impl MorphPipeline {
    /// Acquire a device with `options` and compile the kernel on it.
    pub fn new(options: &DeviceOptions) -> Result<Self> {
        let ctx = GpuContext::acquire_with(options)?;
        Self::with_context(Arc::new(ctx))
    }

    /// Compile the kernel on an existing context.
    pub fn with_context(ctx: Arc<GpuContext>) -> Result<Self> {
        let kernel = MorphKernel::new(&ctx)?;
        log::info!("morphology pipeline ready on {}", ctx.adapter_info);
        Ok(MorphPipeline { ctx, kernel })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Apply `op` to `image` on the device.
    ///
    /// The result has the same dimensions as `image` and is tightly packed.
    /// Blocks until the device has finished. On error nothing is returned
    /// and all per-call device resources are released.
    pub fn apply(&self, image: &GrayImage, op: MorphOp) -> Result<GrayImage> {
        if image.is_empty() {
            return Ok(GrayImage::new(image.width(), image.height()));
        }
        log::debug!("{op} {}x{}", image.width(), image.height());

        let buffers = ImageBufferPair::allocate_for(&self.ctx, image)?;
        let binding = self.kernel.bind(&self.ctx, &buffers, op)?;
        buffers.upload_input(&self.ctx, image)?;
        self.kernel.dispatch(&self.ctx, &binding)?;

        let mut result = GrayImage::new(image.width(), image.height());
        buffers.download_output(&self.ctx, &mut result)?;
        Ok(result)
    }

    pub fn dilate(&self, image: &GrayImage) -> Result<GrayImage> {
        self.apply(image, MorphOp::Dilate)
    }

    pub fn erode(&self, image: &GrayImage) -> Result<GrayImage> {
        self.apply(image, MorphOp::Erode)
    }
}

// ---------------------------------------------------------------------------
// Process-wide pipeline
// ---------------------------------------------------------------------------

static SHARED: Mutex<Option<Arc<MorphPipeline>>> = parking_lot::const_mutex(None);

/// The process-wide pipeline, created with default options on first use.
pub fn shared_pipeline() -> Result<Arc<MorphPipeline>> {
    let mut slot = SHARED.lock();
    if let Some(pipeline) = slot.as_ref() {
        return Ok(Arc::clone(pipeline));
    }
    let pipeline = Arc::new(MorphPipeline::new(&DeviceOptions::default())?);
    *slot = Some(Arc::clone(&pipeline));
    Ok(pipeline)
}

/// Drop the process-wide pipeline. The next `apply_morph_op` acquires a
/// device again. Returns whether a pipeline was held.
pub fn release_shared_pipeline() -> bool {
    SHARED.lock().take().is_some()
}

/// Dilate or erode `image` with a 3×3 clamp-to-edge neighborhood on the GPU.
///
/// Uses the process-wide device, acquiring it on the first call.
///
/// # Errors
/// The originating [`MorphError`](crate::MorphError) of whichever phase
/// failed: device acquisition, allocation, compilation, transfer or
/// dispatch. No partial image is returned.
pub fn apply_morph_op(image: &GrayImage, op: MorphOp) -> Result<GrayImage> {
    if image.is_empty() {
        return Ok(GrayImage::new(image.width(), image.height()));
    }
    shared_pipeline()?.apply(image, op)
}
