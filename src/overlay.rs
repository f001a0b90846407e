use image::{Rgba, RgbaImage};

use crate::types::{Finger, NailRegion};

const OUTLINE_THICKNESS: i32 = 3;
const CENTER_RADIUS: i32 = 4;

fn finger_color(finger: Finger) -> [u8; 4] {
    match finger {
        Finger::Thumb => [255, 64, 64, 255],
        Finger::Index => [255, 200, 0, 255],
        Finger::Middle => [64, 220, 64, 255],
        Finger::Ring => [0, 180, 255, 255],
        Finger::Pinky => [200, 80, 255, 255],
    }
}

/// Draws each region's rotated rectangle and center point onto `image`.
/// Used for inspecting placements; the try-on output itself never has these.
pub fn draw_region_outlines(image: &mut RgbaImage, regions: &[NailRegion]) {
    for region in regions {
        let color = finger_color(region.finger);
        let corners = region.corners();
        for i in 0..corners.len() {
            let next = corners[(i + 1) % corners.len()];
            draw_line(image, corners[i], next, color, OUTLINE_THICKNESS);
        }
        draw_circle(
            image,
            (region.center_x.round() as i32, region.center_y.round() as i32),
            CENTER_RADIUS,
            color,
        );
    }
}

fn draw_line(image: &mut RgbaImage, p0: (f32, f32), p1: (f32, f32), color: [u8; 4], thickness: i32) {
    let (mut x0, mut y0) = (p0.0.round() as i32, p0.1.round() as i32);
    let (x1, y1) = (p1.0.round() as i32, p1.1.round() as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(image, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(image: &mut RgbaImage, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(image, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(image: &mut RgbaImage, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 || x as u32 >= image.width() || y as u32 >= image.height() {
        return;
    }
    image.put_pixel(x as u32, y as u32, Rgba(color));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::solid;

    #[test]
    fn outlines_corners_and_center() {
        let mut image = solid(100, 100, [0, 0, 0, 255]);
        let region = NailRegion::centered(Finger::Middle, 50.0, 50.0, 20.0, 30.0, 0.0);
        draw_region_outlines(&mut image, &[region]);

        let green = finger_color(Finger::Middle);
        assert_eq!(image.get_pixel(40, 35).0, green);
        assert_eq!(image.get_pixel(60, 65).0, green);
        assert_eq!(image.get_pixel(50, 35).0, green);
        assert_eq!(image.get_pixel(50, 50).0, green);
        // Interior between outline and center dot stays untouched.
        assert_eq!(image.get_pixel(45, 42).0, [0, 0, 0, 255]);
    }

    #[test]
    fn regions_off_the_image_are_clipped() {
        let mut image = solid(10, 10, [0, 0, 0, 255]);
        let region = NailRegion::centered(Finger::Thumb, -50.0, 200.0, 30.0, 30.0, 45.0);
        draw_region_outlines(&mut image, &[region]);
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }
}
