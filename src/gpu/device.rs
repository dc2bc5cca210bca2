// gpu/device.rs: device context: one adapter, one device, one queue.
//
// Responsibilities:
//   - Walk the configured backends in order and bind to the first GPU that
//     can run the morphology kernel.
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (e.g., cap invocations to match Raspberry Pi).
//   - Provide `WorkgroupSize`, validated against the active profile and
//     baked into the kernel when it is compiled.
//   - Capture device errors (validation, out-of-memory) in error scopes so
//     they come back as `MorphError`s instead of hitting wgpu's default
//     panicking handler.
//
// ADAPTER SELECTION:
// A "platform" here is a wgpu backend. For each backend in
// `DeviceOptions::backends` we enumerate its adapters and take the first
// one that qualifies; the first backend with a qualifying adapter wins.
// An adapter qualifies when
//   1. it is a real GPU (discrete, integrated or virtual; `Other` only when
//      explicitly allowed, for translation layers like dzn on WSL2), and
//   2. it can bind R8Unorm as a write-only storage texture, which the
//      kernel's output image needs.
// CPU/software adapters (llvmpipe, WARP) never qualify.
//
// DEVICE LIMITS:
// Native requests exactly what the adapter reports, so the largest image
// the device accepts is the hardware's own `max_texture_dimension_2d`.
// Under a non-Native profile we request *lower* limits, clamped to the
// adapter's. wgpu validates every dispatch against the requested limits,
// so violations that would fail on the target board are caught at dev time.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{MorphError, Result};

/// Pixel format of both device images. Single channel, 8 bit, unsigned
/// normalised: the wgpu counterpart of LUMINANCE / UNORM_INT8.
pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Hardware profile controlling device limits and default workgroup sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Use the adapter's actual hardware limits. No artificial caps.
    Native,
    /// Simulate Raspberry Pi 4/5 (VideoCore VI/VII, V3DV Vulkan).
    /// Caps `max_compute_invocations_per_workgroup` to 256.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// A workgroup size configuration for 2D compute dispatches.
///
/// The product `x * y` must not exceed the profile's
/// `max_compute_invocations_per_workgroup` limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Default workgroup size for the given profile.
    ///
    /// - `Native`: 16×8 = 128 invocations, four 32-wide warps or two
    ///   64-wide wavefronts. The 16-wide x dimension follows row-major
    ///   image rows.
    /// - `RaspberryPi`: 8×8 = 64 invocations, comfortably inside V3DV's 256.
    pub fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::RaspberryPi => WorkgroupSize { x: 8, y: 8 },
        }
    }

    /// Check this size against a profile's invocation limit.
    ///
    /// `Native` has no cap of its own; the device limit is checked once an
    /// adapter is bound.
    pub fn validate(&self, profile: DeviceProfile) -> Result<()> {
        self.check(max_invocations_for_profile(profile))
    }

    fn check(&self, max: u32) -> Result<()> {
        let total = self.x.saturating_mul(self.y);
        if total == 0 || total > max {
            return Err(MorphError::InvalidWorkgroupSize { total, max });
        }
        Ok(())
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

// ============================================================
// Configuration
// ============================================================

/// How to pick and configure the compute device.
///
/// `DeviceOptions::default()` tries Vulkan, Metal, DX12 and GL in that
/// order with native limits.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Backends to enumerate, in priority order.
    pub backends: Vec<wgpu::Backends>,
    pub profile: DeviceProfile,
    /// Overrides the profile's default workgroup size when set.
    pub workgroup_size: Option<WorkgroupSize>,
    /// Accept adapters reporting `DeviceType::Other`.
    pub allow_other_device_types: bool,
    /// Debug label attached to the wgpu device.
    pub label: String,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            backends: vec![
                wgpu::Backends::VULKAN,
                wgpu::Backends::METAL,
                wgpu::Backends::DX12,
                wgpu::Backends::GL,
            ],
            profile: DeviceProfile::Native,
            workgroup_size: None,
            allow_other_device_types: false,
            label: "gpu-morph".to_string(),
        }
    }
}

impl DeviceOptions {
    pub fn with_backends(mut self, backends: impl IntoIterator<Item = wgpu::Backends>) -> Self {
        self.backends = backends.into_iter().collect();
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_workgroup_size(mut self, x: u32, y: u32) -> Self {
        self.workgroup_size = Some(WorkgroupSize { x, y });
        self
    }

    pub fn allow_other_device_types(mut self, allow: bool) -> Self {
        self.allow_other_device_types = allow;
        self
    }

    fn all_backends(&self) -> wgpu::Backends {
        self.backends
            .iter()
            .fold(wgpu::Backends::empty(), |acc, b| acc | *b)
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

// ============================================================
// GpuContext
// ============================================================

/// The bound compute device: adapter info, device, in-order queue and
/// active profile.
///
/// Expensive to create; hold one for as long as you run operations.
/// Dropping it releases the device.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue`; some Vulkan
/// layers (dzn on WSL2) crash when the instance goes first.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Error scopes are device-wide; this keeps two threads from
    /// interleaving push/pop on the same device.
    scope_lock: Mutex<()>,
    _instance: wgpu::Instance,
}

impl GpuContext {
    /// Bind to the first qualifying GPU with default options.
    pub fn acquire() -> Result<Self> {
        Self::acquire_with(&DeviceOptions::default())
    }

    /// Bind to the first qualifying GPU, configured by `options`.
    ///
    /// # Errors
    /// - `DeviceUnavailable` if no backend exposes a qualifying adapter.
    /// - `ContextCreationFailed` if the driver rejects device creation.
    /// - `InvalidWorkgroupSize` if the workgroup override is out of range.
    pub fn acquire_with(options: &DeviceOptions) -> Result<Self> {
        pollster::block_on(Self::acquire_async(options))
    }

    async fn acquire_async(options: &DeviceOptions) -> Result<Self> {
        if options.backends.is_empty() {
            return Err(MorphError::DeviceUnavailable { backends: "none".to_string() });
        }
        // Reject a bad override before touching any backend.
        if let Some(ws) = options.workgroup_size {
            ws.validate(options.profile)?;
        }

        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: options.all_backends(),
            flags,
            ..Default::default()
        });

        let adapter = select_adapter(&instance, options)?;
        let adapter_info = AdapterInfo::from(adapter.get_info());
        log::info!("selected adapter: {adapter_info}");

        // Auto-detect RPi when the caller asked for Native but the adapter is V3D.
        let profile = match options.profile {
            DeviceProfile::Native if adapter_info.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let required_limits = limits_for_profile(profile, &adapter.limits());
        let workgroup_size = options
            .workgroup_size
            .unwrap_or_else(|| WorkgroupSize::for_profile(profile));
        workgroup_size.validate(profile)?;
        workgroup_size.check(required_limits.max_compute_invocations_per_workgroup)?;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(options.label.as_str()),
                    // R8Unorm storage textures are outside the WebGPU core
                    // format table.
                    required_features: wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                    required_limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|source| MorphError::ContextCreationFailed {
                adapter: adapter_info.to_string(),
                source,
            })?;

        device.on_uncaptured_error(Box::new(|e: wgpu::Error| {
            log::error!("uncaptured device error: {e}");
        }));

        Ok(GpuContext {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size,
            scope_lock: Mutex::new(()),
            _instance: instance,
        })
    }

    /// Override the workgroup size, validating against the active profile
    /// and the device's invocation limit.
    ///
    /// Kernels compiled before the change keep their old size.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<()> {
        let ws = WorkgroupSize { x, y };
        ws.validate(self.profile)?;
        ws.check(self.device.limits().max_compute_invocations_per_workgroup)?;
        self.workgroup_size = ws;
        Ok(())
    }

    /// Number of workgroups needed to cover a `img_w × img_h` image.
    ///
    /// Ceiling division, so the last row/column of workgroups may reach
    /// past the image edge; the kernel discards those invocations.
    pub fn dispatch_size(&self, img_w: u32, img_h: u32) -> (u32, u32) {
        dispatch_size_for(self.workgroup_size, img_w, img_h)
    }

    /// Largest width/height the device accepts for a 2D texture.
    pub fn max_image_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    ///
    /// Returns `f`'s value together with the first error the device
    /// reported while it ran. Out-of-memory takes precedence.
    pub(crate) fn capture_errors<T>(
        &self,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> (T, Option<wgpu::Error>) {
        let _guard = self.scope_lock.lock();
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        let error = oom.or(validation);
        if let Some(e) = &error {
            log::warn!("device reported: {e}");
        }
        (value, error)
    }
}

impl fmt::Display for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuContext {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

// ============================================================
// Adapter selection
// ============================================================

fn select_adapter(instance: &wgpu::Instance, options: &DeviceOptions) -> Result<wgpu::Adapter> {
    for &backend in &options.backends {
        let adapters = instance.enumerate_adapters(backend);
        for a in &adapters {
            let info = a.get_info();
            log::debug!(
                "{backend:?} adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }
        if let Some(adapter) = adapters
            .into_iter()
            .find(|a| qualifies(a, options.allow_other_device_types))
        {
            return Ok(adapter);
        }
    }

    Err(MorphError::DeviceUnavailable {
        backends: format!("{:?}", options.all_backends()),
    })
}

fn qualifies(adapter: &wgpu::Adapter, allow_other: bool) -> bool {
    let info = adapter.get_info();
    if !is_gpu_class(info.device_type, allow_other) {
        return false;
    }
    let storage_ok = adapter
        .features()
        .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        && adapter
            .get_texture_format_features(IMAGE_FORMAT)
            .allowed_usages
            .contains(wgpu::TextureUsages::STORAGE_BINDING);
    if !storage_ok {
        log::debug!("skipping {}: no R8Unorm storage texture support", info.name);
    }
    storage_ok
}

fn is_gpu_class(device_type: wgpu::DeviceType, allow_other: bool) -> bool {
    match device_type {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => true,
        wgpu::DeviceType::Other => allow_other,
        wgpu::DeviceType::Cpu => false,
    }
}

// ============================================================
// Limits helpers
// ============================================================

pub(crate) fn dispatch_size_for(ws: WorkgroupSize, img_w: u32, img_h: u32) -> (u32, u32) {
    (img_w.div_ceil(ws.x), img_h.div_ceil(ws.y))
}

/// Build the limits to request for `profile` from what the adapter
/// supports. Never asks for more than `adapter` offers.
fn limits_for_profile(profile: DeviceProfile, adapter: &wgpu::Limits) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => adapter.clone(),

        DeviceProfile::RaspberryPi => wgpu::Limits {
            // VideoCore VI/VII: vulkaninfo reports 256 max invocations.
            max_compute_invocations_per_workgroup: adapter
                .max_compute_invocations_per_workgroup
                .min(256),
            max_compute_workgroup_size_x: adapter.max_compute_workgroup_size_x.min(256),
            max_compute_workgroup_size_y: adapter.max_compute_workgroup_size_y.min(256),
            max_compute_workgroup_size_z: adapter.max_compute_workgroup_size_z.min(64),
            // VideoCore VI caps textures at 4096×4096.
            max_texture_dimension_2d: adapter.max_texture_dimension_2d.min(4096),
            max_storage_buffer_binding_size: adapter.max_storage_buffer_binding_size.min(128 << 20),
            ..adapter.clone()
        },
    }
}

/// Invocations per workgroup a profile allows before any adapter is known.
fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    match profile {
        DeviceProfile::Native => u32::MAX,
        DeviceProfile::RaspberryPi => 256,
    }
}

// ============================================================
// Tests
// ============================================================
