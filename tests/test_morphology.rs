// tests/test_morphology.rs: properties of 3×3 dilation / erosion.
//
// Every property is checked twice: against the CPU reference (always runs)
// and against the GPU pipeline (`#[ignore]`d, needs a real device):
//
//   cargo test --test test_morphology -- --include-ignored

use gpu_morph::cpu::morph_op_reference;
use gpu_morph::{apply_morph_op, GrayImage, MorphOp};

// ===== Fixtures =====

fn diamond() -> GrayImage {
    GrayImage::from_rows(&[[10u8, 50, 10], [50, 200, 50], [10, 50, 10]])
}

/// Deterministic pseudo-random texture; xorshift so the test needs no RNG crate.
fn noise(w: usize, h: usize, seed: u32) -> GrayImage {
    let mut state = seed.max(1);
    let data = (0..w * h)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();
    GrayImage::from_vec(w, h, data)
}

fn fixtures() -> Vec<GrayImage> {
    vec![
        diamond(),
        noise(1, 1, 3),
        noise(1, 9, 5),
        noise(9, 1, 7),
        noise(17, 13, 11),
        noise(64, 48, 13),
    ]
}

// ===== Property checks, shared by CPU and GPU =====

fn check_dimension_preservation(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    for img in fixtures() {
        for op in MorphOp::ALL {
            let out = apply(&img, op);
            assert_eq!((out.width(), out.height()), (img.width(), img.height()));
        }
    }
}

fn check_determinism(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    let img = noise(33, 21, 42);
    for op in MorphOp::ALL {
        let first = apply(&img, op);
        for _ in 0..3 {
            assert_eq!(apply(&img, op), first, "{op} is not deterministic");
        }
    }
}

fn check_uniform_is_fixed_point(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    for v in [0u8, 1, 128, 254, 255] {
        let img = GrayImage::filled(7, 5, v);
        for op in MorphOp::ALL {
            assert_eq!(apply(&img, op), img, "{op} changed a uniform {v} image");
        }
    }
}

fn check_monotonicity(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    for img in fixtures() {
        let dilated = apply(&img, MorphOp::Dilate);
        let eroded = apply(&img, MorphOp::Erode);
        for (x, y, v) in img.pixels() {
            assert!(dilated.get(x, y) >= v, "dilate < input at ({x},{y})");
            assert!(eroded.get(x, y) <= v, "erode > input at ({x},{y})");
        }
    }
}

fn check_duality(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    for img in fixtures() {
        for op in MorphOp::ALL {
            let lhs = apply(&img.inverted(), op.dual());
            let rhs = apply(&img, op).inverted();
            assert_eq!(lhs, rhs, "{}(255 - img) != 255 - {op}(img)", op.dual());
        }
    }
}

fn check_single_pixel(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    for v in [0u8, 77, 255] {
        let img = GrayImage::filled(1, 1, v);
        for op in MorphOp::ALL {
            assert_eq!(apply(&img, op).get(0, 0), v);
        }
    }
}

fn check_diamond_scenario(apply: &dyn Fn(&GrayImage, MorphOp) -> GrayImage) {
    let dilated = apply(&diamond(), MorphOp::Dilate);
    assert_eq!(dilated, GrayImage::filled(3, 3, 200), "{dilated:?}");

    // Corner (0,0): clamped window covers rows/cols {0,0,1} → contains 200.
    assert_eq!(dilated.get(0, 0), 200);
    assert_eq!(dilated.get(2, 2), 200);

    let eroded = apply(&diamond(), MorphOp::Erode);
    assert_eq!(eroded, GrayImage::filled(3, 3, 10), "{eroded:?}");
}

// ===== CPU reference =====

fn cpu(img: &GrayImage, op: MorphOp) -> GrayImage {
    morph_op_reference(img, op)
}

#[test]
fn cpu_dimension_preservation() {
    check_dimension_preservation(&cpu);
}

#[test]
fn cpu_determinism() {
    check_determinism(&cpu);
}

#[test]
fn cpu_uniform_is_fixed_point() {
    check_uniform_is_fixed_point(&cpu);
}

#[test]
fn cpu_monotonicity() {
    check_monotonicity(&cpu);
}

#[test]
fn cpu_duality() {
    check_duality(&cpu);
}

#[test]
fn cpu_single_pixel() {
    check_single_pixel(&cpu);
}

#[test]
fn cpu_diamond_scenario() {
    check_diamond_scenario(&cpu);
}

// ===== GPU pipeline =====

fn gpu(img: &GrayImage, op: MorphOp) -> GrayImage {
    apply_morph_op(img, op).unwrap_or_else(|e| panic!("{op} failed: {e}"))
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_dimension_preservation() {
    check_dimension_preservation(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_determinism() {
    check_determinism(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_uniform_is_fixed_point() {
    check_uniform_is_fixed_point(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_monotonicity() {
    check_monotonicity(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_duality() {
    check_duality(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_single_pixel() {
    check_single_pixel(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_diamond_scenario() {
    check_diamond_scenario(&gpu);
}

#[test]
#[ignore = "requires a real GPU"]
fn gpu_matches_cpu_reference() {
    // Sizes straddle the 16×8 / 8×8 workgroup edges and the 256-byte row
    // alignment of transfers.
    for (w, h) in [(2, 2), (15, 7), (16, 8), (17, 9), (255, 3), (257, 5), (640, 480)] {
        let img = noise(w, h, (w * 31 + h) as u32);
        for op in MorphOp::ALL {
            assert_eq!(gpu(&img, op), cpu(&img, op), "{op} {w}x{h} differs from reference");
        }
    }
}
