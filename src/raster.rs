//! Image loading, a small 2-D drawing surface, and PNG/data-URL encoding.

use std::{fmt, io::Cursor, path::PathBuf, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{ImageFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use reqwest::blocking::Client;

use crate::error::LoadError;

/// Where a photo comes from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    Path(PathBuf),
    /// `http(s)://` or `data:` URL.
    Url(String),
    Bytes(Vec<u8>),
    Image(RgbaImage),
}

impl From<&str> for ImageSource {
    fn from(value: &str) -> Self {
        let lower = value.trim_start().to_ascii_lowercase();
        if lower.starts_with("data:") || lower.starts_with("http://") || lower.starts_with("https://") {
            ImageSource::Url(value.trim().to_string())
        } else {
            ImageSource::Path(PathBuf::from(value))
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(value: PathBuf) -> Self {
        ImageSource::Path(value)
    }
}

impl From<RgbaImage> for ImageSource {
    fn from(value: RgbaImage) -> Self {
        ImageSource::Image(value)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Url(url) if url.starts_with("data:") => f.write_str("data URL"),
            ImageSource::Url(url) => f.write_str(url),
            ImageSource::Bytes(bytes) => write!(f, "{} bytes", bytes.len()),
            ImageSource::Image(image) => write!(f, "{}x{} raster", image.width(), image.height()),
        }
    }
}

pub trait ImageLoader: Send + Sync {
    /// Decodes `source` into a non-empty RGBA raster.
    fn load(&self, source: &ImageSource) -> Result<RgbaImage, LoadError>;
}

pub struct DefaultLoader {
    client: Client,
}

impl DefaultLoader {
    pub fn new(fetch_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|err| {
                log::warn!("falling back to default HTTP client: {err}");
                Client::new()
            });
        Self { client }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let fetch_err = |source| LoadError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().map_err(fetch_err)?.to_vec())
    }
}

impl Default for DefaultLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ImageLoader for DefaultLoader {
    fn load(&self, source: &ImageSource) -> Result<RgbaImage, LoadError> {
        let image = match source {
            ImageSource::Path(path) => {
                let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
                    path: path.clone(),
                    source,
                })?;
                decode_bytes(&bytes)?
            }
            ImageSource::Url(url) if url.starts_with("data:") => decode_bytes(&parse_data_url(url)?)?,
            ImageSource::Url(url) => decode_bytes(&self.fetch(url)?)?,
            ImageSource::Bytes(bytes) => decode_bytes(bytes)?,
            ImageSource::Image(image) => image.clone(),
        };
        ensure_not_empty(image)
    }
}

pub fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    ensure_not_empty(image)
}

fn ensure_not_empty(image: RgbaImage) -> Result<RgbaImage, LoadError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(LoadError::EmptyImage { width, height });
    }
    Ok(image)
}

/// Payload bytes of a `data:[<mime>][;base64],<payload>` URL.
pub fn parse_data_url(url: &str) -> Result<Vec<u8>, LoadError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| LoadError::DataUrl("missing data: scheme".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| LoadError::DataUrl("missing ',' separator".to_string()))?;
    if !meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(LoadError::DataUrl("only base64 payloads are supported".to_string()));
    }
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|err| LoadError::DataUrl(format!("invalid base64 payload: {err}")))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

pub fn to_png_data_url(image: &RgbaImage) -> Result<String, image::ImageError> {
    let png = encode_png(image)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

/// Row-major 2x3 affine matrix, applied as `x' = a*x + c*y + e`,
/// `y' = b*x + d*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// `self` applied after `inner`.
    fn then(&self, inner: &Transform) -> Transform {
        Transform {
            a: self.a * inner.a + self.c * inner.b,
            b: self.b * inner.a + self.d * inner.b,
            c: self.a * inner.c + self.c * inner.d,
            d: self.b * inner.c + self.d * inner.d,
            e: self.a * inner.e + self.c * inner.f + self.e,
            f: self.b * inner.e + self.d * inner.f + self.f,
        }
    }

    pub fn invert(&self) -> Option<Transform> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        Some(Transform {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct EllipseClip {
    /// Device space to the space the ellipse was declared in.
    to_local: Transform,
    cx: f32,
    cy: f32,
    rx: f32,
    ry: f32,
}

impl EllipseClip {
    fn contains(&self, x: f32, y: f32) -> bool {
        if self.rx <= 0.0 || self.ry <= 0.0 {
            return false;
        }
        let (lx, ly) = self.to_local.apply(x, y);
        let nx = (lx - self.cx) / self.rx;
        let ny = (ly - self.cy) / self.ry;
        nx * nx + ny * ny <= 1.0
    }
}

#[derive(Clone, Copy, Debug)]
struct DrawState {
    transform: Transform,
    clip: Option<EllipseClip>,
}

/// Rectangle in source pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SourceRect {
    pub fn full(image: &RgbaImage) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
        }
    }
}

/// Drawing surface with canvas-style save/restore, translate/rotate and an
/// elliptical clip. Angles are radians, clockwise in image space.
pub struct Canvas {
    pixels: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
}

impl Canvas {
    /// Fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(RgbaImage::new(width, height))
    }

    pub fn from_image(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            state: DrawState {
                transform: Transform::IDENTITY,
                clip: None,
            },
            stack: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn save(&mut self) {
        self.stack.push(self.state);
    }

    /// Unbalanced restores are ignored.
    pub fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        let step = Transform {
            e: dx,
            f: dy,
            ..Transform::IDENTITY
        };
        self.state.transform = self.state.transform.then(&step);
    }

    pub fn rotate(&mut self, radians: f32) {
        let (sin, cos) = radians.sin_cos();
        let step = Transform {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        };
        self.state.transform = self.state.transform.then(&step);
    }

    /// Restricts drawing to the ellipse with center `(cx, cy)` and radii
    /// `(rx, ry)` in the current coordinate space.
    pub fn clip_ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32) {
        let Some(to_local) = self.state.transform.invert() else {
            // A collapsed transform leaves nothing drawable.
            self.state.clip = Some(EllipseClip {
                to_local: Transform::IDENTITY,
                cx,
                cy,
                rx: 0.0,
                ry: 0.0,
            });
            return;
        };
        self.state.clip = Some(EllipseClip {
            to_local,
            cx,
            cy,
            rx,
            ry,
        });
    }

    /// Draws `src_rect` of `image` into the rectangle `(dx, dy, dw, dh)` of the
    /// current coordinate space, blending source-over. Empty destinations and
    /// empty source rectangles draw nothing.
    pub fn draw_image(
        &mut self,
        image: &RgbaImage,
        src_rect: SourceRect,
        dx: f32,
        dy: f32,
        dw: f32,
        dh: f32,
    ) {
        if !(dw > 0.0 && dh > 0.0 && src_rect.width > 0.0 && src_rect.height > 0.0) {
            return;
        }
        if image.width() == 0 || image.height() == 0 || self.width() == 0 || self.height() == 0 {
            return;
        }
        let transform = self.state.transform;
        let Some(to_local) = transform.invert() else {
            return;
        };
        let clip = self.state.clip;

        let corners = [
            transform.apply(dx, dy),
            transform.apply(dx + dw, dy),
            transform.apply(dx + dw, dy + dh),
            transform.apply(dx, dy + dh),
        ];
        let (min_x, max_x, min_y, max_y) = corners.iter().fold(
            (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
            |acc, (x, y)| (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y)),
        );
        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(self.width());
        let y1 = (max_y.ceil().max(0.0) as u32).min(self.height());
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let scale_x = src_rect.width / dw;
        let scale_y = src_rect.height / dh;
        let stride = self.width() as usize * 4;

        self.pixels
            .par_chunks_exact_mut(stride)
            .enumerate()
            .skip(y0 as usize)
            .take((y1 - y0) as usize)
            .for_each(|(y, row)| {
                let py = y as f32 + 0.5;
                for x in x0..x1 {
                    let px = x as f32 + 0.5;
                    if let Some(clip) = &clip {
                        if !clip.contains(px, py) {
                            continue;
                        }
                    }
                    let (lx, ly) = to_local.apply(px, py);
                    let (u, v) = (lx - dx, ly - dy);
                    if u < 0.0 || v < 0.0 || u >= dw || v >= dh {
                        continue;
                    }
                    let sx = src_rect.x + u * scale_x;
                    let sy = src_rect.y + v * scale_y;
                    let color = sample_rgba(image, &src_rect, sx, sy);
                    let idx = x as usize * 4;
                    blend_over(&mut row[idx..idx + 4], color);
                }
            });
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }
}

/// Bilinear sample at continuous coordinates (pixel centers at `n + 0.5`),
/// clamped to `rect` so edges don't bleed in neighbors outside the crop.
fn sample_rgba(image: &RgbaImage, rect: &SourceRect, x: f32, y: f32) -> [f32; 4] {
    let max_x = (rect.x + rect.width).min(image.width() as f32) - 0.5;
    let max_y = (rect.y + rect.height).min(image.height() as f32) - 0.5;
    let min_x = rect.x.max(0.0) + 0.5;
    let min_y = rect.y.max(0.0) + 0.5;
    let fx = x.clamp(min_x, max_x.max(min_x)) - 0.5;
    let fy = y.clamp(min_y, max_y.max(min_y)) - 0.5;

    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let last_x = image.width() - 1;
    let last_y = image.height() - 1;
    let ix0 = (x0.max(0.0) as u32).min(last_x);
    let iy0 = (y0.max(0.0) as u32).min(last_y);
    let ix1 = (ix0 + 1).min(last_x);
    let iy1 = (iy0 + 1).min(last_y);

    let fetch = |ix: u32, iy: u32| -> [f32; 4] { image.get_pixel(ix, iy).0.map(|c| c as f32) };
    let c00 = fetch(ix0, iy0);
    let c10 = fetch(ix1, iy0);
    let c01 = fetch(ix0, iy1);
    let c11 = fetch(ix1, iy1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    [0, 1, 2, 3].map(|c| lerp(lerp(c00[c], c10[c], tx), lerp(c01[c], c11[c], tx), ty))
}

fn blend_over(dst: &mut [u8], src: [f32; 4]) {
    let sa = src[3] / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let blended = (src[c] * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Single-color raster.
pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn strings_are_classified_by_scheme() {
        assert!(matches!(ImageSource::from("https://cdn/x.png"), ImageSource::Url(_)));
        assert!(matches!(ImageSource::from("data:image/png;base64,AAAA"), ImageSource::Url(_)));
        assert!(matches!(ImageSource::from("photos/hand.jpg"), ImageSource::Path(_)));
    }

    #[test]
    fn data_url_round_trips_through_loader() {
        let original = solid(3, 2, [10, 20, 30, 255]);
        let url = to_png_data_url(&original).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let decoded = DefaultLoader::default().load(&ImageSource::from(url.as_str())).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn malformed_data_urls_are_rejected() {
        assert!(matches!(parse_data_url("data:image/png,raw"), Err(LoadError::DataUrl(_))));
        assert!(matches!(parse_data_url("data:image/png;base64"), Err(LoadError::DataUrl(_))));
        assert!(matches!(
            parse_data_url("data:image/png;base64,@@@"),
            Err(LoadError::DataUrl(_))
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = DefaultLoader::default()
            .load(&ImageSource::Bytes(b"not an image".to_vec()))
            .unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = DefaultLoader::default()
            .load(&ImageSource::from("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
    }

    #[test]
    fn empty_raster_is_rejected() {
        let err = DefaultLoader::default()
            .load(&ImageSource::Image(RgbaImage::new(0, 4)))
            .unwrap_err();
        assert!(matches!(err, LoadError::EmptyImage { width: 0, height: 4 }));
    }

    #[test]
    fn transform_inverse_round_trips() {
        let mut canvas = Canvas::new(1, 1);
        canvas.translate(40.0, 10.0);
        canvas.rotate(0.7);
        let t = canvas.state.transform;
        let inv = t.invert().unwrap();
        let (x, y) = t.apply(3.0, -5.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 3.0).abs() < 1e-4 && (by + 5.0).abs() < 1e-4);
    }

    #[test]
    fn untransformed_draw_copies_pixels() {
        let mut canvas = Canvas::new(4, 4);
        let red = solid(2, 2, [255, 0, 0, 255]);
        canvas.draw_image(&red, SourceRect::full(&red), 1.0, 1.0, 2.0, 2.0);

        let out = canvas.into_image();
        assert_eq!(out.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(3, 3).0, [0, 0, 0, 0]);
    }

    #[test]
    fn quarter_turn_swaps_extent() {
        let mut canvas = Canvas::new(20, 20);
        let bar = solid(1, 1, [0, 255, 0, 255]);
        canvas.save();
        canvas.translate(10.0, 10.0);
        canvas.rotate(FRAC_PI_2);
        // 8 wide, 2 tall before rotation: vertical after.
        canvas.draw_image(&bar, SourceRect::full(&bar), -4.0, -1.0, 8.0, 2.0);
        canvas.restore();

        let out = canvas.image();
        assert_eq!(out.get_pixel(10, 7).0[1], 255);
        assert_eq!(out.get_pixel(9, 12).0[1], 255);
        assert_eq!(out.get_pixel(6, 10).0[3], 0);
        assert_eq!(out.get_pixel(13, 10).0[3], 0);
        assert_eq!(canvas.state.transform, Transform::IDENTITY);
    }

    #[test]
    fn ellipse_clip_masks_corners() {
        let mut canvas = Canvas::new(20, 30);
        canvas.clip_ellipse(10.0, 15.0, 10.0, 15.0);
        let white = solid(1, 1, [255, 255, 255, 255]);
        canvas.draw_image(&white, SourceRect::full(&white), 0.0, 0.0, 20.0, 30.0);

        let out = canvas.into_image();
        assert_eq!(out.get_pixel(10, 15).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(19, 29).0[3], 0);
    }

    #[test]
    fn zero_sized_destination_draws_nothing() {
        let mut canvas = Canvas::new(5, 5);
        let red = solid(2, 2, [255, 0, 0, 255]);
        canvas.draw_image(&red, SourceRect::full(&red), 0.0, 0.0, 0.0, 0.0);
        canvas.draw_image(&red, SourceRect::full(&red), 0.0, 0.0, f32::NAN, 3.0);
        assert!(canvas.into_image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn translucent_source_blends_over_opaque() {
        let mut dst = [0u8, 0, 255, 255];
        blend_over(&mut dst, [255.0, 0.0, 0.0, 127.5]);
        assert_eq!(dst, [128, 0, 128, 255]);
    }
}
