// cpu.rs: CPU reference for the 3×3 morphology kernel.
//
// This is the oracle the GPU kernel is validated against pixel-for-pixel,
// not an execution fallback: the public pipeline never calls it. It uses
// the same boundary rule as the shader (clamp-to-edge), so border pixels
// must agree exactly.
//
//   neighborhood of (x, y):     (x-1,y-1) (x,y-1) (x+1,y-1)
//                               (x-1,y  ) (x,y  ) (x+1,y  )
//                               (x-1,y+1) (x,y+1) (x+1,y+1)
//
// Out-of-range coordinates are clamped to [0, w-1] × [0, h-1].

use crate::image::GrayImage;
use crate::op::MorphOp;

/// Half-width of the fixed square structuring element.
pub const RADIUS: isize = 1;

/// Apply `op` over the 3×3 clamp-to-edge neighborhood of every pixel.
///
/// The result is tightly packed (stride == width) and has the same
/// dimensions as `src`. An empty image yields an empty image.
pub fn morph_op_reference(src: &GrayImage, op: MorphOp) -> GrayImage {
    let (w, h) = (src.width(), src.height());
    if src.is_empty() {
        return GrayImage::new(w, h);
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = op.identity();
            for dy in -RADIUS..=RADIUS {
                for dx in -RADIUS..=RADIUS {
                    let v = src.get_clamped(x as isize + dx, y as isize + dy);
                    acc = op.reduce(acc, v);
                }
            }
            out.set(x, y, acc);
        }
    }
    out
}
