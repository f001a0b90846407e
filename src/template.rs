use image::RgbaImage;

use crate::raster::{Canvas, SourceRect};

/// Oval swatch of a nail design, transparent outside the inscribed ellipse.
#[derive(Clone, Debug, PartialEq)]
pub struct DesignTemplate {
    image: RgbaImage,
}

impl DesignTemplate {
    /// Center-crops `design` to the template aspect, scales it to
    /// `width` x `height` and masks it to the inscribed ellipse.
    pub fn build(design: &RgbaImage, width: u32, height: u32) -> Self {
        let mut canvas = Canvas::new(width, height);
        let (w, h) = (width as f32, height as f32);
        canvas.clip_ellipse(w / 2.0, h / 2.0, w / 2.0, h / 2.0);
        canvas.draw_image(design, cover_crop(design.width(), design.height(), w / h), 0.0, 0.0, w, h);
        Self {
            image: canvas.into_image(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Largest centered source rectangle with the target aspect (width / height).
fn cover_crop(src_w: u32, src_h: u32, target_aspect: f32) -> SourceRect {
    let (sw, sh) = (src_w as f32, src_h as f32);
    if sh <= 0.0 || target_aspect <= 0.0 {
        return SourceRect {
            x: 0.0,
            y: 0.0,
            width: sw,
            height: sh,
        };
    }
    if sw / sh > target_aspect {
        let width = sh * target_aspect;
        SourceRect {
            x: (sw - width) / 2.0,
            y: 0.0,
            width,
            height: sh,
        }
    } else {
        let height = sw / target_aspect;
        SourceRect {
            x: 0.0,
            y: (sh - height) / 2.0,
            width: sw,
            height,
        }
    }
}
