// pixpack/src/processors/resizer.rs
use crate::core::ResizeAlgorithm;
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgba};

/// Channel distance from the corner colour under which a pixel counts as border.
const DEFAULT_TRIM_THRESHOLD: u8 = 10;

#[derive(Debug, Clone)]
pub struct Resizer {
    algorithm: ResizeAlgorithm,
    trim_threshold: u8,
}

impl Resizer {
    pub fn new(algorithm: ResizeAlgorithm) -> Self {
        Self {
            algorithm,
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
        }
    }

    /// Scales `image` down so its width is at most `max_width`, keeping the
    /// aspect ratio. Never enlarges.
    pub fn fit_width(&self, image: DynamicImage, max_width: u32) -> DynamicImage {
        let (orig_width, orig_height) = image.dimensions();
        let (width, height) = Self::calculate_dimensions(orig_width, orig_height, max_width);

        if width == orig_width && height == orig_height {
            log::debug!("Image is {}px wide, within {}px; skipping resize", orig_width, max_width);
            return image;
        }

        log::debug!(
            "Resizing image from {}x{} to {}x{}",
            orig_width,
            orig_height,
            width,
            height
        );

        image.resize_exact(width, height, self.get_filter_type())
    }

    /// Crops away border rows and columns matching the top-left pixel.
    /// Fully transparent pixels match each other regardless of colour.
    pub fn trim(&self, image: DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image;
        }

        let rgba = image.to_rgba8();
        let background = *rgba.get_pixel(0, 0);

        let mut min_x = width;
        let mut min_y = height;
        let mut max_x = 0;
        let mut max_y = 0;

        for (x, y, pixel) in rgba.enumerate_pixels() {
            if self.is_background(pixel, &background) {
                continue;
            }
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        // Uniform image; nothing sensible to keep, so leave it alone.
        if min_x > max_x || min_y > max_y {
            return image;
        }

        let trimmed_width = max_x - min_x + 1;
        let trimmed_height = max_y - min_y + 1;
        if trimmed_width == width && trimmed_height == height {
            return image;
        }

        log::debug!(
            "Trimming border: {}x{} -> {}x{} at ({}, {})",
            width,
            height,
            trimmed_width,
            trimmed_height,
            min_x,
            min_y
        );

        image.crop_imm(min_x, min_y, trimmed_width, trimmed_height)
    }

    fn is_background(&self, pixel: &Rgba<u8>, background: &Rgba<u8>) -> bool {
        if pixel[3] == 0 && background[3] == 0 {
            return true;
        }

        pixel
            .0
            .iter()
            .zip(background.0.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.trim_threshold)
    }

    pub fn calculate_dimensions(orig_width: u32, orig_height: u32, max_width: u32) -> (u32, u32) {
        if max_width == 0 || orig_width <= max_width {
            return (orig_width, orig_height);
        }

        let ratio = max_width as f64 / orig_width as f64;
        let height = (orig_height as f64 * ratio).round() as u32;
        (max_width, height.max(1))
    }

    fn get_filter_type(&self) -> FilterType {
        match self.algorithm {
            ResizeAlgorithm::Nearest => FilterType::Nearest,
            ResizeAlgorithm::Bilinear => FilterType::Triangle,
            ResizeAlgorithm::Bicubic => FilterType::CatmullRom,
            ResizeAlgorithm::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl Default for Resizer {
    fn default() -> Self {
        Self::new(ResizeAlgorithm::default())
    }
}
