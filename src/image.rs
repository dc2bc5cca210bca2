// image.rs: host-side grayscale image.
//
// `GrayImage` is the only image type the morphology pipeline accepts and
// produces: single channel, `u8` samples, row-major, runtime dimensions.
//
// Rows may carry padding (stride > width) so the type can wrap frames
// coming from camera drivers or decoders that align rows. Padding is never
// read by the pipeline: uploads compact rows and downloads always produce
// a tightly packed image (stride == width).
//
// Memory layout (stride = 5, width = 4):
//
//   data index:  0  1  2  3 [4]  5  6  7  8 [9] 10 11 12 13 [14]
//   pixel:       ■  ■  ■  ■  ·   ■  ■  ■  ■  ·   ■  ■  ■  ■  ·
//   row:         |--- row 0 ---|  |--- row 1 ---|  |--- row 2 ---|

use std::fmt;

/// A single-channel 8-bit image with runtime dimensions.
#[derive(Clone)]
pub struct GrayImage {
    /// Samples in row-major order. Length = height * stride.
    data: Vec<u8>,
    width: usize,
    height: usize,
    /// Row stride in elements. stride >= width.
    stride: usize,
}

impl GrayImage {
    // --- Constructors ---

    /// Create a zero-filled image. Stride equals width.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0)
    }

    /// Create an image with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        GrayImage {
            data: vec![value; width * height],
            width,
            height,
            stride: width,
        }
    }

    /// Create a zero-filled image with an explicit stride.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn new_with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        GrayImage {
            data: vec![0; height * stride],
            width,
            height,
            stride,
        }
    }

    /// Wrap a tightly packed sample vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        GrayImage { data, width, height, stride: width }
    }

    /// Wrap a sample vector whose rows are `stride` elements apart.
    ///
    /// # Panics
    /// Panics if `stride < width` or `data.len() != height * stride`.
    pub fn from_vec_with_stride(width: usize, height: usize, stride: usize, data: Vec<u8>) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert_eq!(
            data.len(),
            height * stride,
            "data length ({}) must equal height * stride ({})",
            data.len(),
            height * stride,
        );
        GrayImage { data, width, height, stride }
    }

    /// Build an image from nested rows, e.g. `&[[10, 50], [50, 200]]`.
    ///
    /// # Panics
    /// Panics if the rows have different lengths.
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(width * height);
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            assert_eq!(row.len(), width, "row {y} has length {} (expected {width})", row.len());
            data.extend_from_slice(row);
        }
        GrayImage { data, width, height, stride: width }
    }

    // --- Accessors ---

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// `(width, height)` as `u32`, the form wgpu extents use, or `None`
    /// when either side does not fit.
    #[inline]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((u32::try_from(self.width).ok()?, u32::try_from(self.height).ok()?))
    }

    /// True when the image has no pixels at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Sample at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.bounds_check(x, y);
        self.data[y * self.stride + x]
    }

    /// Sample at (x, y) with out-of-range coordinates clamped to the
    /// nearest edge pixel.
    ///
    /// # Panics
    /// Panics if the image is empty.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> u8 {
        assert!(!self.is_empty(), "cannot sample an empty image");
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.stride + cx]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.bounds_check(x, y);
        self.data[y * self.stride + x] = value;
    }

    /// Borrow row `y`, without stride padding.
    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Iterate over all pixels as `(x, y, value)`, skipping padding.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, u8)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.stride + x]))
        })
    }

    /// The raw buffer, including stride padding.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return tightly packed samples (no padding).
    pub fn into_packed_vec(self) -> Vec<u8> {
        if self.stride == self.width {
            return self.data;
        }
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            let start = y * self.stride;
            out.extend_from_slice(&self.data[start..start + self.width]);
        }
        out
    }

    /// Apply `f` to every sample, producing a packed image.
    pub fn map(&self, mut f: impl FnMut(u8) -> u8) -> GrayImage {
        let mut data = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            data.extend(self.row(y).iter().map(|&v| f(v)));
        }
        GrayImage { data, width: self.width, height: self.height, stride: self.width }
    }

    /// Photometric negative: `255 - v` for every sample.
    pub fn inverted(&self) -> GrayImage {
        self.map(|v| 255 - v)
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

// Two images are equal when their visible pixels are; padding is ignored.
impl PartialEq for GrayImage {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && (0..self.height).all(|y| self.row(y) == other.row(y))
    }
}

impl Eq for GrayImage {}

impl fmt::Debug for GrayImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "GrayImage {{ {}×{}, stride={} }}",
            self.width, self.height, self.stride,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_layout() {
        let img = GrayImage::from_rows(&[[1u8, 2, 3], [4, 5, 6]]);
        assert_eq!(img.width(), 3);
        assert_eq!(img.height(), 2);
        assert_eq!(img.get(2, 0), 3);
        assert_eq!(img.get(0, 1), 4);
    }

    #[test]
    fn test_get_clamped_replicates_edges() {
        let img = GrayImage::from_rows(&[[1u8, 2], [3, 4]]);
        assert_eq!(img.get_clamped(-1, -1), 1);
        assert_eq!(img.get_clamped(5, -3), 2);
        assert_eq!(img.get_clamped(-2, 9), 3);
        assert_eq!(img.get_clamped(2, 2), 4);
    }

    #[test]
    fn test_equality_ignores_padding() {
        let padded = GrayImage::from_vec_with_stride(2, 2, 4, vec![1, 2, 99, 99, 3, 4, 77, 77]);
        let packed = GrayImage::from_vec(2, 2, vec![1, 2, 3, 4]);
        assert_eq!(padded, packed);
        assert_eq!(padded.into_packed_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_inverted() {
        let img = GrayImage::from_rows(&[[0u8, 255, 100]]);
        assert_eq!(img.inverted().into_packed_vec(), vec![255, 0, 155]);
    }

    #[test]
    #[should_panic(expected = "data length")]
    fn test_from_vec_rejects_wrong_length() {
        let _ = GrayImage::from_vec(3, 3, vec![0; 8]);
    }

    #[test]
    fn test_dimensions_fit_u32() {
        assert_eq!(GrayImage::new(640, 480).dimensions(), Some((640, 480)));
        assert_eq!(GrayImage::new(0, 3).dimensions(), Some((0, 3)));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_dimensions_do_not_truncate() {
        // Zero rows, so no sample storage is allocated.
        let wide = GrayImage::new((1usize << 32) + 3, 0);
        assert_eq!(wide.dimensions(), None);
    }

    #[test]
    fn test_empty() {
        assert!(GrayImage::new(0, 5).is_empty());
        assert!(GrayImage::new(5, 0).is_empty());
        assert!(!GrayImage::new(1, 1).is_empty());
    }
}
