use image::RgbaImage;

use crate::{
    raster::{Canvas, SourceRect},
    template::DesignTemplate,
    types::NailRegion,
};

/// Paints `template` onto a copy of `photo` once per region, in the order
/// given, so later regions cover earlier ones where they overlap.
/// Degenerate regions leave the photo untouched.
pub fn composite(photo: &RgbaImage, regions: &[NailRegion], template: &DesignTemplate) -> RgbaImage {
    let mut canvas = Canvas::from_image(photo.clone());
    let full = SourceRect::full(template.image());

    for region in regions {
        if region.is_degenerate() {
            log::debug!("skipping zero-sized {} nail", region.finger);
            continue;
        }
        canvas.save();
        canvas.translate(region.center_x, region.center_y);
        canvas.rotate(region.angle_radians());
        canvas.draw_image(
            template.image(),
            full,
            region.offset_x,
            region.offset_y,
            region.width,
            region.height,
        );
        canvas.restore();
    }

    canvas.into_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        raster::solid,
        regions::estimate_fallback_regions,
        types::{Finger, NailRegion},
    };

    fn pink_template() -> DesignTemplate {
        DesignTemplate::build(&solid(40, 60, [255, 105, 180, 255]), 20, 30)
    }

    fn gray_photo(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255])
        })
    }

    #[test]
    fn no_regions_leaves_photo_identical() {
        let photo = gray_photo(64, 48);
        assert_eq!(composite(&photo, &[], &pink_template()), photo);
    }

    #[test]
    fn degenerate_region_is_a_no_op() {
        let photo = gray_photo(32, 32);
        let region = NailRegion::centered(Finger::Ring, 16.0, 16.0, 0.0, 0.0, 35.0);
        assert_eq!(composite(&photo, &[region], &pink_template()), photo);
    }

    #[test]
    fn each_region_gets_an_overlay_at_its_center() {
        let photo = gray_photo(200, 200);
        let regions = estimate_fallback_regions(200, 200);
        let out = composite(&photo, &regions, &pink_template());

        assert_eq!(out.dimensions(), photo.dimensions());
        for region in &regions {
            let (x, y) = (region.center_x as u32, region.center_y as u32);
            assert_eq!(out.get_pixel(x, y).0, [255, 105, 180, 255]);
        }
        assert_eq!(out.get_pixel(5, 5), photo.get_pixel(5, 5));
    }

    #[test]
    fn rotation_turns_the_overlay() {
        let photo = solid(100, 100, [0, 0, 0, 255]);
        let upright = NailRegion::centered(Finger::Index, 50.0, 50.0, 10.0, 40.0, 0.0);
        let sideways = NailRegion {
            angle_degrees: 90.0,
            ..upright
        };

        let out = composite(&photo, &[upright], &pink_template());
        assert_eq!(out.get_pixel(50, 35).0[0], 255);
        assert_eq!(out.get_pixel(35, 50).0[0], 0);

        let out = composite(&photo, &[sideways], &pink_template());
        assert_eq!(out.get_pixel(35, 50).0[0], 255);
        assert_eq!(out.get_pixel(50, 35).0[0], 0);
    }
}
