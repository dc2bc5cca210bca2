// gpu/mod.rs: wgpu execution layer.
//
// Dependency order, leaves first:
//
//   device  : adapter selection, device + in-order queue, error scopes
//   buffers : per-call input/output device images, host transfers
//   kernel  : the compiled morphology program and its dispatch
//   pipeline: upload → dispatch → download, plus the process-wide instance
//
// `cpu::morph_op_reference` is the authoritative definition of the output;
// every kernel change is validated against it pixel-for-pixel.

pub mod buffers;
pub mod device;
pub mod kernel;
pub mod pipeline;
