//! Scanline polygon rasterization into binary masks.
//!
//! A pixel is filled when its centre lies inside the polygon under the
//! even-odd rule. Rows are sampled at `y + 0.5` and each crossing span covers
//! the pixels whose centre `x + 0.5` falls in `[x_start, x_end)`.

use image::{Rgba, RgbaImage};

/// Value of a filled mask pixel.
pub const FILLED: u8 = 255;

/// One byte per pixel, row-major. Background is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn filled_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == FILLED).count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Fill one implicitly closed polygon. Fewer than three vertices is a no-op.
    pub fn fill_polygon(&mut self, points: &[[f64; 2]]) {
        if points.len() < 3 || self.width == 0 || self.height == 0 {
            return;
        }
        let width = self.width as usize;
        let max_x = f64::from(self.width - 1);
        let mut crossings = Vec::with_capacity(points.len());

        for y in 0..self.height as usize {
            let scan_y = y as f64 + 0.5;
            crossings.clear();

            for (i, a) in points.iter().enumerate() {
                let b = points[(i + 1) % points.len()];
                let ([x1, y1], [x2, y2]) = (*a, b);
                if (y1 > scan_y) == (y2 > scan_y) {
                    continue;
                }
                let x = x1 + (scan_y - y1) * (x2 - x1) / (y2 - y1);
                if x.is_finite() {
                    crossings.push(x);
                }
            }
            crossings.sort_by(f64::total_cmp);

            for span in crossings.chunks_exact(2) {
                let start = (span[0] - 0.5).ceil().max(0.0);
                let end = ((span[1] - 0.5).ceil() - 1.0).min(max_x);
                if end < start {
                    continue;
                }
                let row = y * width;
                self.data[row + start as usize..=row + end as usize].fill(FILLED);
            }
        }
    }

    /// Grayscale-as-RGBA image: 255 or 0 on every colour channel, fully opaque.
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let v = self.get(x, y).unwrap_or(0);
            Rgba([v, v, v, 255])
        })
    }
}

/// Rasterize every polygon onto one `width` x `height` mask.
pub fn rasterize<'a, I>(width: u32, height: u32, polygons: I) -> Mask
where
    I: IntoIterator<Item = &'a [[f64; 2]]>,
{
    let mut mask = Mask::new(width, height);
    for points in polygons {
        mask.fill_polygon(points);
    }
    mask
}
