// gpu/buffers.rs: device-resident input/output images and host transfers.
//
// An `ImageBufferPair` is allocated per invocation and dropped with it:
//
//   input  : R8Unorm texture, TEXTURE_BINDING | COPY_DST   (kernel reads)
//   output : R8Unorm texture, STORAGE_BINDING | COPY_SRC   (kernel writes)
//
// Both have exactly the host image's width and height.
//
//
// ORDERING
// ────────
// `upload_input` submits its copy and returns immediately. The queue
// executes submissions in order, so a dispatch submitted afterwards sees the
// complete upload without any explicit wait.
//
// `download_output` submits a texture→buffer copy, maps the buffer and polls
// the device until the map completes. That wait covers the copy and every
// submission queued before it: it is the one synchronisation point of an
// invocation.
//
//
// ROW ALIGNMENT
// ─────────────
// Buffer↔texture copies need `bytes_per_row` to be a multiple of
// `wgpu::COPY_BYTES_PER_ROW_ALIGNMENT` (256). Host rows are packed into a
// staging buffer whose rows are padded up to that boundary, and the padding
// is stripped again on the way back. The host image's own stride padding is
// never copied.

use wgpu::util::DeviceExt;

use crate::error::{MorphError, Phase, Result};
use crate::gpu::device::{GpuContext, IMAGE_FORMAT};
use crate::image::GrayImage;

const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Input and output device images for one morphology invocation.
pub struct ImageBufferPair {
    pub input: wgpu::Texture,
    /// Bound as `texture_2d<f32>` (read-only).
    pub input_view: wgpu::TextureView,
    pub output: wgpu::Texture,
    /// Bound as `texture_storage_2d<r8unorm, write>` (write-only).
    pub output_view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl ImageBufferPair {
    /// Allocate both device images for a `width × height` grayscale image.
    ///
    /// # Errors
    /// `AllocationFailed` if either dimension is zero or above the device's
    /// 2D texture limit, or if the device runs out of memory.
    pub fn allocate(ctx: &GpuContext, width: u32, height: u32) -> Result<Self> {
        let alloc_err = |reason: String| MorphError::AllocationFailed { width, height, reason };

        if width == 0 || height == 0 {
            return Err(alloc_err("image has no pixels".to_string()));
        }
        let max = ctx.max_image_dimension();
        if width > max || height > max {
            return Err(alloc_err(format!("device limit is {max}x{max}")));
        }

        let ((input, output), err) = ctx.capture_errors(|device| {
            let input = device.create_texture(&image_descriptor(
                "ImageBufferPair::input",
                width,
                height,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ));
            let output = device.create_texture(&image_descriptor(
                "ImageBufferPair::output",
                width,
                height,
                wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            ));
            (input, output)
        });
        if let Some(e) = err {
            return Err(alloc_err(e.to_string()));
        }

        log::trace!("allocated {width}x{height} image pair");

        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(ImageBufferPair { input, input_view, output, output_view, width, height })
    }

    /// Allocate a pair shaped like `image`.
    ///
    /// # Errors
    /// `AllocationFailed` as for [`allocate`](Self::allocate), including
    /// when a side of `image` does not fit a `u32` extent.
    pub fn allocate_for(ctx: &GpuContext, image: &GrayImage) -> Result<Self> {
        let (w, h) = device_extent(image)?;
        Self::allocate(ctx, w, h)
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Enqueue a full-extent copy of `host` into the input image.
    ///
    /// Does not wait for the copy. Anything submitted to the same queue
    /// afterwards observes the uploaded data.
    ///
    /// # Errors
    /// `DimensionMismatch` if `host` is not `width × height`;
    /// `DeviceRuntime` if the device rejects the copy.
    pub fn upload_input(&self, ctx: &GpuContext, host: &GrayImage) -> Result<()> {
        self.check_dimensions(host)?;

        let aligned_bytes_per_row = align_to(self.width, COPY_ALIGNMENT);
        let staging = pack_rows(host, aligned_bytes_per_row);

        let ((), err) = ctx.capture_errors(|device| {
            let staging_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ImageBufferPair::staging"),
                contents: &staging,
                usage: wgpu::BufferUsages::COPY_SRC,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ImageBufferPair::upload"),
            });
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: &staging_buf,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(aligned_bytes_per_row),
                        rows_per_image: Some(self.height),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture: &self.input,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                self.extent(),
            );
            ctx.queue.submit(std::iter::once(encoder.finish()));
        });

        match err {
            Some(e) => Err(runtime_error(e)),
            None => Ok(()),
        }
    }

    /// Copy the output image into `host`, blocking until the copy and all
    /// previously submitted work have finished.
    ///
    /// `host` may have any stride; only its visible pixels are written.
    ///
    /// # Errors
    /// `DimensionMismatch` if `host` is not `width × height`;
    /// `DeviceRuntime` if the copy or the buffer map fails.
    pub fn download_output(&self, ctx: &GpuContext, host: &mut GrayImage) -> Result<()> {
        self.check_dimensions(host)?;

        let aligned_bytes_per_row = align_to(self.width, COPY_ALIGNMENT);
        let readback_size = aligned_bytes_per_row as u64 * self.height as u64;

        let (readback_buf, err) = ctx.capture_errors(|device| {
            let readback_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("ImageBufferPair::readback"),
                size: readback_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ImageBufferPair::download"),
            });
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &self.output,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &readback_buf,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(aligned_bytes_per_row),
                        rows_per_image: Some(self.height),
                    },
                },
                self.extent(),
            );
            ctx.queue.submit(std::iter::once(encoder.finish()));
            readback_buf
        });
        if let Some(e) = err {
            return Err(runtime_error(e));
        }

        let buf_slice = readback_buf.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buf_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        ctx.device.poll(wgpu::Maintain::Wait);
        let mapped_ok = receiver.recv().map_err(|_| MorphError::DeviceRuntime {
            phase: Phase::Transfer,
            message: "readback map callback never fired".to_string(),
        })?;
        mapped_ok.map_err(|e| MorphError::DeviceRuntime {
            phase: Phase::Transfer,
            message: format!("readback map failed: {e}"),
        })?;

        {
            let mapped = buf_slice.get_mapped_range();
            unpack_rows(&mapped, aligned_bytes_per_row, host);
        }
        readback_buf.unmap();
        Ok(())
    }

    fn check_dimensions(&self, host: &GrayImage) -> Result<()> {
        check_dimensions(self.dimensions(), host)
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 }
    }
}

fn image_descriptor(
    label: &'static str,
    width: u32,
    height: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureDescriptor<'static> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: IMAGE_FORMAT,
        usage,
        view_formats: &[],
    }
}

/// `image`'s size as a texture extent.
fn device_extent(image: &GrayImage) -> Result<(u32, u32)> {
    image.dimensions().ok_or_else(|| MorphError::AllocationFailed {
        width: saturate(image.width()),
        height: saturate(image.height()),
        reason: format!("{}x{} exceeds the u32 extent range", image.width(), image.height()),
    })
}

fn check_dimensions(expected: (u32, u32), host: &GrayImage) -> Result<()> {
    match host.dimensions() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(MorphError::DimensionMismatch {
            expected,
            actual: actual.unwrap_or((saturate(host.width()), saturate(host.height()))),
        }),
    }
}

fn saturate(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn runtime_error(e: wgpu::Error) -> MorphError {
    MorphError::DeviceRuntime { phase: Phase::Transfer, message: e.to_string() }
}

// ---------------------------------------------------------------------------
// Row packing
// ---------------------------------------------------------------------------

/// Round `value` up to the next multiple of `alignment`.
///
///   align_to(100, 256) = 256
///   align_to(256, 256) = 256
///   align_to(257, 256) = 512
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Copy the visible rows of `src` into a staging vector with rows
/// `aligned_bytes_per_row` apart. Row padding is left zeroed.
fn pack_rows(src: &GrayImage, aligned_bytes_per_row: u32) -> Vec<u8> {
    let row_len = aligned_bytes_per_row as usize;
    let mut staging = vec![0u8; row_len * src.height()];
    for (y, dst_row) in staging.chunks_exact_mut(row_len).enumerate() {
        dst_row[..src.width()].copy_from_slice(src.row(y));
    }
    staging
}

/// Inverse of [`pack_rows`]: write each aligned row of `mapped` into the
/// visible part of the corresponding row of `dst`.
fn unpack_rows(mapped: &[u8], aligned_bytes_per_row: u32, dst: &mut GrayImage) {
    let row_len = aligned_bytes_per_row as usize;
    let width = dst.width();
    for y in 0..dst.height() {
        let start = y * row_len;
        dst.row_mut(y).copy_from_slice(&mapped[start..start + width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(255, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(641, 256), 768);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn test_pack_rows_no_padding() {
        let img = GrayImage::from_vec(2, 3, vec![1, 2, 3, 4, 5, 6]);
        let aligned = align_to(2, 256) as usize;
        let staging = pack_rows(&img, aligned as u32);
        assert_eq!(staging.len(), aligned * 3);
        assert_eq!(&staging[0..2], &[1, 2]);
        assert_eq!(&staging[aligned..aligned + 2], &[3, 4]);
        assert_eq!(&staging[2 * aligned..2 * aligned + 2], &[5, 6]);
    }

    #[test]
    fn test_pack_rows_strips_host_stride() {
        // stride 4, width 3: the padding byte (99) must not reach the device.
        let img = GrayImage::from_vec_with_stride(3, 2, 4, vec![10, 20, 30, 99, 40, 50, 60, 99]);
        let aligned = align_to(3, 256) as usize;
        let staging = pack_rows(&img, aligned as u32);
        assert_eq!(&staging[0..3], &[10, 20, 30]);
        assert_eq!(&staging[aligned..aligned + 3], &[40, 50, 60]);
        assert!(staging[3..aligned].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpack_rows_into_strided_host() {
        let aligned = 256u32;
        let mut mapped = vec![0xEEu8; aligned as usize * 2];
        mapped[..3].copy_from_slice(&[1, 2, 3]);
        mapped[256..259].copy_from_slice(&[4, 5, 6]);

        let mut dst = GrayImage::new_with_stride(3, 2, 5);
        unpack_rows(&mapped, aligned, &mut dst);
        assert_eq!(dst, GrayImage::from_rows(&[[1u8, 2, 3], [4, 5, 6]]));
        // Host padding untouched.
        assert_eq!(dst.as_slice()[3], 0);
        assert_eq!(dst.as_slice()[4], 0);
    }

    #[test]
    fn test_pack_unpack_wide_image() {
        let pixels: Vec<u8> = (0..300 * 2).map(|i| (i % 251) as u8).collect();
        let src = GrayImage::from_vec(300, 2, pixels);
        let aligned = align_to(300, COPY_ALIGNMENT);
        assert_eq!(aligned, 512);
        let staging = pack_rows(&src, aligned);
        let mut back = GrayImage::new(300, 2);
        unpack_rows(&staging, aligned, &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions((3, 2), &GrayImage::new(3, 2)).is_ok());
        // Stride padding is not part of the extent.
        assert!(check_dimensions((3, 2), &GrayImage::new_with_stride(3, 2, 8)).is_ok());
        let err = check_dimensions((3, 2), &GrayImage::new(2, 3)).unwrap_err();
        assert!(matches!(err, MorphError::DimensionMismatch { expected: (3, 2), actual: (2, 3) }));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_host_width_is_not_truncated() {
        // 2^32 + 3 would wrap to 3 under an `as u32` cast.
        let wide = GrayImage::new((1usize << 32) + 3, 0);
        let err = check_dimensions((3, 0), &wide).unwrap_err();
        assert!(matches!(
            err,
            MorphError::DimensionMismatch { expected: (3, 0), actual: (u32::MAX, 0) }
        ));

        let err = device_extent(&wide).unwrap_err();
        assert!(matches!(err, MorphError::AllocationFailed { width: u32::MAX, height: 0, .. }));
        assert_eq!(err.phase(), Phase::Allocation);
    }

    // ---- GPU tests -----------------------------------------------------------

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_allocate_rejects_zero_and_oversized() {
        let ctx = GpuContext::acquire().expect("need a GPU");
        let err = ImageBufferPair::allocate(&ctx, 0, 4).err().expect("zero width");
        assert!(matches!(err, MorphError::AllocationFailed { .. }));
        let too_big = ctx.max_image_dimension() + 1;
        let err = ImageBufferPair::allocate(&ctx, too_big, 1).err().expect("oversized");
        assert!(matches!(err, MorphError::AllocationFailed { .. }));
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_allocate_beyond_default_texture_limit() {
        let ctx = GpuContext::acquire().expect("need a GPU");
        let default_max = wgpu::Limits::default().max_texture_dimension_2d;
        if ctx.max_image_dimension() <= default_max {
            eprintln!("adapter caps textures at {}, nothing to check", ctx.max_image_dimension());
            return;
        }
        let pair = ImageBufferPair::allocate_for(&ctx, &GrayImage::new(default_max as usize + 1, 10))
            .expect("adapter supports wider textures than the default limit");
        assert_eq!(pair.dimensions(), (default_max + 1, 10));
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_transfer_rejects_mismatched_host_image() {
        let ctx = GpuContext::acquire().expect("need a GPU");
        let pair = ImageBufferPair::allocate(&ctx, 4, 3).expect("allocate");

        let err = pair.upload_input(&ctx, &GrayImage::new(3, 4)).unwrap_err();
        assert!(matches!(
            err,
            MorphError::DimensionMismatch { expected: (4, 3), actual: (3, 4) }
        ));

        let mut host = GrayImage::new(4, 4);
        let err = pair.download_output(&ctx, &mut host).unwrap_err();
        assert!(matches!(err, MorphError::DimensionMismatch { .. }));
    }
}
