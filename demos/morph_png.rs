// demos/morph_png.rs: dilate and erode a grayscale PNG on the GPU.
//
// Reads the input as 8-bit luminance, runs both operations through the
// process-wide pipeline, writes the results next to each other and prints
// how far each one is from the CPU reference (expected: 0).
//
// USAGE
// ─────
//   cargo run --example morph_png                        # in.png → dilate.png, erode.png
//   cargo run --example morph_png -- photo.png out/      # writes out/dilate.png, out/erode.png
//   cargo run --example morph_png -- photo.png out/ erode  # only out/erode.png
//
// Set RUST_LOG=debug to see adapter selection and per-call phases.

use std::path::{Path, PathBuf};

use gpu_morph::cpu::morph_op_reference;
use gpu_morph::{apply_morph_op, release_shared_pipeline, GrayImage, MorphOp};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let input = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("in.png"));
    let out_dir = PathBuf::from(args.get(2).map(String::as_str).unwrap_or("."));
    let ops: Vec<MorphOp> = match args.get(3).map(|s| s.parse::<MorphOp>()) {
        None => MorphOp::ALL.to_vec(),
        Some(Ok(op)) => vec![op],
        Some(Err(e)) => {
            eprintln!("[morph_png] {e}");
            std::process::exit(1);
        }
    };

    let src = match load_gray(&input) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("[morph_png] cannot read {}: {e}", input.display());
            std::process::exit(1);
        }
    };
    eprintln!("[morph_png] source: {} ({}×{})", input.display(), src.width(), src.height());

    for op in ops {
        let result = match apply_morph_op(&src, op) {
            Ok(img) => img,
            Err(e) => {
                eprintln!("[morph_png] {op} failed in {} phase: {e}", e.phase());
                std::process::exit(2);
            }
        };

        let reference = morph_op_reference(&src, op);
        let max_err = result
            .pixels()
            .map(|(x, y, v)| v.abs_diff(reference.get(x, y)))
            .max()
            .unwrap_or(0);

        let path = out_dir.join(format!("{op}.png"));
        if let Err(e) = save_gray(&path, result) {
            eprintln!("[morph_png] cannot write {}: {e}", path.display());
            std::process::exit(1);
        }
        eprintln!("[morph_png] {op}: wrote {}  max_err vs CPU = {max_err}", path.display());
    }

    release_shared_pipeline();
}

fn load_gray(path: &Path) -> Result<GrayImage, image::ImageError> {
    let luma = image::open(path)?.into_luma8();
    let (w, h) = luma.dimensions();
    Ok(GrayImage::from_vec(w as usize, h as usize, luma.into_raw()))
}

fn save_gray(path: &Path, img: GrayImage) -> Result<(), image::ImageError> {
    let (w, h) = img.dimensions().expect("decoded images have u32 dimensions");
    let buf = image::GrayImage::from_raw(w, h, img.into_packed_vec())
        .expect("packed buffer always matches its dimensions");
    buf.save(path)
}
