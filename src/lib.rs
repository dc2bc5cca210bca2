// gpu-morph: 3×3 grayscale dilation and erosion on the GPU.
//
// The per-pixel neighborhood reduction runs as a wgpu compute kernel; the
// host side selects a device, stages the image into device textures,
// dispatches one invocation per pixel and reads the result back.
//
//   use gpu_morph::{apply_morph_op, GrayImage, MorphOp};
//
//   let img = GrayImage::from_rows(&[[10u8, 50, 10], [50, 200, 50], [10, 50, 10]]);
//   let dilated = apply_morph_op(&img, MorphOp::Dilate)?;
//
// Border pixels use clamp-to-edge sampling. `cpu::morph_op_reference`
// computes the same result on the CPU and serves as the test oracle.

pub mod cpu;
pub mod error;
pub mod gpu;
pub mod image;
pub mod op;

pub use error::{MorphError, Phase, Result};
pub use gpu::device::{DeviceOptions, DeviceProfile, GpuContext, WorkgroupSize};
pub use gpu::pipeline::{apply_morph_op, release_shared_pipeline, shared_pipeline, MorphPipeline};
pub use image::GrayImage;
pub use op::MorphOp;
