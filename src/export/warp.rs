use crate::transform::AffineTransform;

/// Packed RGBA image.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaImage {
    /// Opaque black.
    pub fn black(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 4];
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn clear(&mut self) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

fn blend(px: &mut [u8], src: &[u8], alpha: f32) {
    if alpha >= 1.0 {
        px[..3].copy_from_slice(&src[..3]);
    } else {
        for c in 0..3 {
            px[c] = (src[c] as f32 * alpha + px[c] as f32 * (1.0 - alpha)).round() as u8;
        }
    }
    px[3] = 255;
}

/// Splits a transform without skew whose rotation is a multiple of a quarter
/// turn into the size a `width`x`height` source should be resampled to and
/// the transform placing the resampled image on the canvas.
///
/// `None` when the transform is not of that shape.
pub fn prescale(
    transform: &AffineTransform,
    width: u32,
    height: u32,
) -> Option<(u32, u32, AffineTransform)> {
    let t = transform;
    let size = t.a.abs().max(t.b.abs()).max(t.c.abs()).max(t.d.abs());
    let negligible = |v: f64| v.abs() <= size * 1e-9;
    // per-axis factor for source x and source y
    let (sx, sy) = if negligible(t.b) && negligible(t.c) {
        (t.a.abs(), t.d.abs())
    } else if negligible(t.a) && negligible(t.d) {
        (t.b.abs(), t.c.abs())
    } else {
        return None;
    };
    if !(sx.is_normal() && sy.is_normal()) || width == 0 || height == 0 {
        return None;
    }
    let w = ((width as f64 * sx).round() as u32).max(1);
    let h = ((height as f64 * sy).round() as u32).max(1);
    let residual =
        AffineTransform::scale(width as f64 / w as f64, height as f64 / h as f64).concat(t);
    Some((w, h, residual))
}

/// Draws `src` onto `dst` as an exact pixel permutation when `transform` is
/// a flip or quarter turn plus translation, allowing for less than a pixel of
/// drift across the image. Everything else goes through [`composite`].
pub fn place(dst: &mut RgbaImage, src: &RgbaImage, transform: &AffineTransform, opacity: f32) -> bool {
    let t = transform;
    let (a, b, c, d) = (t.a.round(), t.b.round(), t.c.round(), t.d.round());
    let (sw, sh) = (src.width as f64, src.height as f64);
    let drift = ((t.a - a).abs() + (t.b - b).abs()) * sw + ((t.c - c).abs() + (t.d - d).abs()) * sh;
    let permutes = (a.abs() == 1.0 && d.abs() == 1.0 && b == 0.0 && c == 0.0)
        || (b.abs() == 1.0 && c.abs() == 1.0 && a == 0.0 && d == 0.0);
    if !permutes || drift > 1.0 {
        return composite(dst, src, transform, opacity);
    }
    let alpha = opacity.clamp(0.0, 1.0);
    if alpha == 0.0 {
        return true;
    }

    // canvas pixel holding source pixel (u, v)'s centre
    let (a, b, c, d) = (a as i64, b as i64, c as i64, d as i64);
    let ox = (t.tx + 0.5 * (a + c) as f64).floor() as i64;
    let oy = (t.ty + 0.5 * (b + d) as f64).floor() as i64;
    let (dw, dh) = (dst.width as i64, dst.height as i64);
    let src_row = src.width as usize * 4;
    for v in 0..src.height as i64 {
        let row = &src.data[v as usize * src_row..(v as usize + 1) * src_row];
        for (u, s) in row.chunks_exact(4).enumerate() {
            let u = u as i64;
            let x = a * u + c * v + ox;
            let y = b * u + d * v + oy;
            if x < 0 || y < 0 || x >= dw || y >= dh {
                continue;
            }
            let i = (y * dw + x) as usize * 4;
            blend(&mut dst.data[i..i + 4], s, alpha);
        }
    }
    true
}

/// Draws `src` onto `dst` through `transform` (source pixels to canvas
/// pixels), nearest-neighbour sampled at pixel centres and blended over the
/// existing canvas with `opacity`.
///
/// Returns `false` without touching `dst` when the transform cannot be inverted.
pub fn composite(dst: &mut RgbaImage, src: &RgbaImage, transform: &AffineTransform, opacity: f32) -> bool {
    let Some(inv) = transform.invert() else {
        return false;
    };
    let alpha = opacity.clamp(0.0, 1.0);
    if alpha == 0.0 {
        return true;
    }
    let (sw, sh) = (src.width as f64, src.height as f64);
    let dst_row = dst.width as usize * 4;
    let src_row = src.width as usize * 4;

    for y in 0..dst.height as usize {
        // source position of this row's first pixel centre, stepped by (a, b) per x
        let (mut sx, mut sy) = inv.apply(0.5, y as f64 + 0.5);
        let row = &mut dst.data[y * dst_row..(y + 1) * dst_row];
        for px in row.chunks_exact_mut(4) {
            if sx >= 0.0 && sy >= 0.0 && sx < sw && sy < sh {
                let i = sy as usize * src_row + sx as usize * 4;
                blend(px, &src.data[i..i + 4], alpha);
            }
            sx += inv.a;
            sy += inv.b;
        }
    }
    true
}
