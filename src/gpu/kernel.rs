// gpu/kernel.rs: the compiled morphology program.
//
// `MorphKernel` owns the compute pipeline built from `morphology.wgsl` and
// the bind group layout matching its three parameters:
//
//   @binding(0)  input_image   texture_2d<f32>                  read-only
//   @binding(1)  params        uniform { op: u32, pad × 3 }      selector
//   @binding(2)  output_image  texture_storage_2d<r8unorm, write>
//
// Compile once per context and reuse: `bind` and `dispatch` are cheap and
// allocate only a 16-byte uniform and a bind group per invocation.
//
// The WGSL source is embedded with `include_str!`, so there is no shader
// file to ship next to the binary. naga does not accept `override`
// expressions inside `@workgroup_size`, so the workgroup dimensions are
// substituted into the source text ({{WG_X}}, {{WG_Y}}) before compilation.

use wgpu::util::DeviceExt;

use crate::error::{MorphError, Phase, Result};
use crate::gpu::buffers::ImageBufferPair;
use crate::gpu::device::{dispatch_size_for, GpuContext, WorkgroupSize, IMAGE_FORMAT};
use crate::op::MorphOp;

/// WGSL source of the morphology program.
pub const KERNEL_SOURCE: &str = include_str!("../shaders/morphology.wgsl");

/// Name of the compute entry point in [`KERNEL_SOURCE`].
pub const ENTRY_POINT: &str = "morph_op_kernel";

/// Selector uniform. Layout must match `MorphParams` in `morphology.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct MorphParams {
    op: u32,
    _pad: [u32; 3],
}

impl MorphParams {
    fn new(op: MorphOp) -> Self {
        MorphParams { op: op.selector(), _pad: [0; 3] }
    }
}

/// A compiled morphology program, bound to the context it was built on.
pub struct MorphKernel {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    workgroup_size: WorkgroupSize,
}

/// One invocation's parameters: the kernel bound to a buffer pair and an
/// operation. Consumed by [`MorphKernel::dispatch`].
pub struct KernelBinding {
    bind_group: wgpu::BindGroup,
    // Held so the uniform outlives the bind group that references it.
    _params_buf: wgpu::Buffer,
    width: u32,
    height: u32,
}

impl MorphKernel {
    /// Compile the embedded program for `ctx`.
    ///
    /// # Errors
    /// `CompilationFailed` with the compiler's messages if the module or the
    /// pipeline is rejected.
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        Self::from_source(ctx, KERNEL_SOURCE)
    }

    /// Compile a program from WGSL text. It must expose [`ENTRY_POINT`] with
    /// the binding layout described at the top of this file.
    pub fn from_source(ctx: &GpuContext, source: &str) -> Result<Self> {
        let workgroup_size = ctx.workgroup_size;
        let shader_src = specialize_source(source, workgroup_size);

        let ((shader, bgl, pipeline), err) = ctx.capture_errors(|device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("morphology.wgsl"),
                source: wgpu::ShaderSource::Wgsl(shader_src.into()),
            });

            let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("MorphKernel BGL"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: IMAGE_FORMAT,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("MorphKernel pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(ENTRY_POINT),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: ENTRY_POINT,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

            (shader, bgl, pipeline)
        });

        if let Some(e) = err {
            let messages = pollster::block_on(shader.get_compilation_info()).messages;
            let diagnostic = format_diagnostic(
                messages
                    .iter()
                    .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
                    .map(|m| m.message.as_str()),
                &e.to_string(),
            );
            return Err(MorphError::CompilationFailed { diagnostic });
        }

        log::debug!("compiled {ENTRY_POINT} with workgroup {workgroup_size}");
        Ok(MorphKernel { pipeline, bgl, workgroup_size })
    }

    /// Workgroup size baked into this program.
    pub fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup_size
    }

    /// Bind input image, operation selector and output image, in that order.
    pub fn bind(&self, ctx: &GpuContext, buffers: &ImageBufferPair, op: MorphOp) -> Result<KernelBinding> {
        let params = MorphParams::new(op);

        let ((bind_group, params_buf), err) = ctx.capture_errors(|device| {
            let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("MorphParams"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("MorphKernel bind group"),
                layout: &self.bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&buffers.input_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: params_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&buffers.output_view),
                    },
                ],
            });
            (bind_group, params_buf)
        });

        if let Some(e) = err {
            return Err(MorphError::DeviceRuntime { phase: Phase::Dispatch, message: e.to_string() });
        }

        Ok(KernelBinding {
            bind_group,
            _params_buf: params_buf,
            width: buffers.width,
            height: buffers.height,
        })
    }

    /// Enqueue one invocation per pixel over the bound image's full extent.
    ///
    /// Returns as soon as the work is submitted.
    pub fn dispatch(&self, ctx: &GpuContext, binding: &KernelBinding) -> Result<()> {
        let (dx, dy) = dispatch_size_for(self.workgroup_size, binding.width, binding.height);

        let ((), err) = ctx.capture_errors(|device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("MorphKernel::dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(ENTRY_POINT),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &binding.bind_group, &[]);
                pass.dispatch_workgroups(dx, dy, 1);
            }
            ctx.queue.submit(std::iter::once(encoder.finish()));
        });

        log::trace!("dispatched {dx}x{dy} workgroups for {}x{}", binding.width, binding.height);

        match err {
            Some(e) => Err(MorphError::DeviceRuntime { phase: Phase::Dispatch, message: e.to_string() }),
            None => Ok(()),
        }
    }
}

fn specialize_source(template: &str, ws: WorkgroupSize) -> String {
    template
        .replace("{{WG_X}}", &ws.x.to_string())
        .replace("{{WG_Y}}", &ws.y.to_string())
}

/// Join compiler error messages; fall back to the device error text when
/// the compiler produced none (e.g. the module parsed but the pipeline
/// failed validation).
fn format_diagnostic<'a>(messages: impl Iterator<Item = &'a str>, device_error: &str) -> String {
    let joined: Vec<&str> = messages.collect();
    if joined.is_empty() {
        device_error.to_string()
    } else {
        joined.join("\n")
    }
}
