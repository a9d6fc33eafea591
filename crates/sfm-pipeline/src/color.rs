//! Point colors sampled from in-memory source images.

use image::RgbImage;

use crate::correspondence::{ImageId, Keypoint};

/// Decoded RGB images indexed by image id.
///
/// Images may be missing; sampling from a missing image yields no color.
#[derive(Debug, Clone, Default)]
pub struct ImageColors {
    images: Vec<Option<RgbImage>>,
}

impl ImageColors {
    pub fn new(images: Vec<Option<RgbImage>>) -> Self {
        Self { images }
    }

    /// RGB value at the rounded keypoint location.
    ///
    /// `None` when the image is absent or the pixel lies outside it.
    pub fn sample(&self, image: ImageId, kp: &Keypoint) -> Option<[u8; 3]> {
        let img = self.images.get(image)?.as_ref()?;
        let (x, y) = (kp.x.round(), kp.y.round());
        if !(x >= 0.0 && y >= 0.0 && x < img.width() as f64 && y < img.height() as f64) {
            return None;
        }
        Some(img.get_pixel(x as u32, y as u32).0)
    }

    /// Averaged color of a point seen at `a` and `b`; needs both samples.
    pub fn point_color(
        &self,
        a: (ImageId, &Keypoint),
        b: (ImageId, &Keypoint),
    ) -> Option<[u8; 3]> {
        let ca = self.sample(a.0, a.1)?;
        let cb = self.sample(b.0, b.1)?;
        Some(average_color(ca, cb))
    }
}

/// Componentwise integer mean, truncated toward zero.
pub fn average_color(a: [u8; 3], b: [u8; 3]) -> [u8; 3] {
    std::array::from_fn(|i| ((u16::from(a[i]) + u16::from(b[i])) / 2) as u8)
}
