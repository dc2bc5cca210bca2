// error.rs: error taxonomy for the morphology pipeline.
//
// Every failure is tagged with the phase it came from so callers can tell
// "no GPU on this machine" apart from "the driver choked mid-transfer".
// Nothing in the crate retries: one attempt per call, errors go straight
// back to the caller and no partial image is ever returned.

use std::fmt;

/// Which stage of a morphology invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Context,
    Allocation,
    Compilation,
    Transfer,
    Dispatch,
    Configuration,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Context => "context",
            Phase::Allocation => "allocation",
            Phase::Compilation => "compilation",
            Phase::Transfer => "transfer",
            Phase::Dispatch => "dispatch",
            Phase::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Errors from device acquisition, buffer management, kernel compilation
/// and execution.
#[derive(Debug, thiserror::Error)]
pub enum MorphError {
    /// No backend exposes a GPU that can run the morphology kernel.
    #[error("no suitable GPU adapter found (checked backends: {backends})")]
    DeviceUnavailable { backends: String },

    /// The driver refused to create a device/queue on the selected adapter.
    #[error("device creation failed on adapter {adapter}: {source}")]
    ContextCreationFailed {
        adapter: String,
        #[source]
        source: wgpu::RequestDeviceError,
    },

    /// Device memory could not be allocated for an image of this size.
    #[error("failed to allocate {width}x{height} device image: {reason}")]
    AllocationFailed {
        width: u32,
        height: u32,
        reason: String,
    },

    /// The WGSL program was rejected. `diagnostic` holds the compiler output.
    #[error("kernel compilation failed:\n{diagnostic}")]
    CompilationFailed { diagnostic: String },

    /// Host image and device buffers disagree on dimensions.
    #[error("dimension mismatch: device buffers are {}x{}, host image is {}x{}",
        expected.0, expected.1, actual.0, actual.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Driver-level failure while uploading, dispatching or downloading.
    #[error("device runtime error during {phase}: {message}")]
    DeviceRuntime { phase: Phase, message: String },

    /// Workgroup override exceeds the active profile's invocation limit.
    #[error("workgroup size {total} exceeds profile limit of {max} invocations")]
    InvalidWorkgroupSize { total: u32, max: u32 },
}

impl MorphError {
    /// The phase in which this error originated.
    pub fn phase(&self) -> Phase {
        match self {
            MorphError::DeviceUnavailable { .. } | MorphError::ContextCreationFailed { .. } => {
                Phase::Context
            }
            MorphError::AllocationFailed { .. } => Phase::Allocation,
            MorphError::CompilationFailed { .. } => Phase::Compilation,
            MorphError::DimensionMismatch { .. } => Phase::Transfer,
            MorphError::DeviceRuntime { phase, .. } => *phase,
            MorphError::InvalidWorkgroupSize { .. } => Phase::Configuration,
        }
    }
}

pub type Result<T, E = MorphError> = std::result::Result<T, E>;
