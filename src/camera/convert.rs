//! Raw frame normalization to tightly packed RGB24.
//!
//! Pure conversion only: no I/O, no state, and the source buffer is never
//! mutated or retained. A malformed source yields `None` so a single bad
//! frame can be skipped without ending the stream.

use super::types::{PixelFormat, StreamFormat};

/// Convert one raw captured buffer into tightly packed RGB24 bytes.
///
/// The output is always `width * height * 3` bytes with no row padding;
/// trailing pad bytes in the source rows are dropped. Returns `None` when
/// the source is structurally unusable (zero dimensions, fewer bytes than
/// one row, or a stride that cannot be recovered).
pub fn convert_frame(src: &[u8], format: &StreamFormat) -> Option<Vec<u8>> {
    let width = format.width as usize;
    let height = format.height as usize;
    if width == 0 || height == 0 {
        return None;
    }
    match format.pixel_format {
        PixelFormat::Rgb24 => copy_rgb24(src, width, height, format.stride as usize),
        PixelFormat::Yuyv => yuyv_to_rgb24(src, width, height, format.stride as usize),
    }
}

/// Resolve the stride actually usable for `src`.
///
/// A declared stride of 0 means tightly packed. When the declared stride
/// would overrun the source, fall back to `src.len() / height` on the
/// assumption that every row shrank uniformly; if even that is below one
/// tight row the buffer is unusable.
fn effective_stride(src_len: usize, row_bytes: usize, declared: usize, height: usize) -> Option<usize> {
    let mut stride = if declared == 0 { row_bytes } else { declared };
    if stride * height > src_len {
        stride = src_len / height;
        if stride < row_bytes {
            return None;
        }
    }
    Some(stride)
}

fn copy_rgb24(src: &[u8], width: usize, height: usize, stride: usize) -> Option<Vec<u8>> {
    let row_bytes = width * 3;
    if src.len() < row_bytes {
        return None;
    }
    let stride = effective_stride(src.len(), row_bytes, stride, height)?;

    let mut dst = vec![0u8; row_bytes * height];
    for y in 0..height {
        let start = y * stride;
        let end = start + row_bytes;
        if end > src.len() {
            return None;
        }
        dst[y * row_bytes..(y + 1) * row_bytes].copy_from_slice(&src[start..end]);
    }
    Some(dst)
}

fn yuyv_to_rgb24(src: &[u8], width: usize, height: usize, stride: usize) -> Option<Vec<u8>> {
    let row_bytes = width * 2;
    if src.len() < row_bytes {
        return None;
    }
    let stride = effective_stride(src.len(), row_bytes, stride, height)?;

    let mut dst = vec![0u8; width * height * 3];
    for y in 0..height {
        let in_start = y * stride;
        let in_end = in_start + row_bytes;
        if in_end > src.len() {
            return None;
        }
        let out_start = y * width * 3;
        yuyv_row(
            &mut dst[out_start..out_start + width * 3],
            &src[in_start..in_end],
            width,
        );
    }
    Some(dst)
}

/// Unpack one YUYV scanline into RGB24.
///
/// BT.601 studio range, integer fixed point: luma offset 16 floored at 0,
/// coefficients scaled by 2^8 with +128 rounding. Pixels come in pairs
/// sharing one chroma sample; an odd trailing pixel without a full sample
/// pair is left black rather than read out of bounds.
fn yuyv_row(dst: &mut [u8], src: &[u8], width: usize) {
    let mut x = 0;
    while x < width {
        let i = x * 2;
        if i + 3 >= src.len() {
            break;
        }

        let y0 = src[i] as i32;
        let u = src[i + 1] as i32 - 128;
        let y1 = src[i + 2] as i32;
        let v = src[i + 3] as i32 - 128;

        let c0 = (y0 - 16).max(0);
        let c1 = (y1 - 16).max(0);

        let j = x * 3;
        if j + 5 >= dst.len() {
            break;
        }

        dst[j] = clamp_channel((298 * c0 + 409 * v + 128) >> 8);
        dst[j + 1] = clamp_channel((298 * c0 - 100 * u - 208 * v + 128) >> 8);
        dst[j + 2] = clamp_channel((298 * c0 + 516 * u + 128) >> 8);

        dst[j + 3] = clamp_channel((298 * c1 + 409 * v + 128) >> 8);
        dst[j + 4] = clamp_channel((298 * c1 - 100 * u - 208 * v + 128) >> 8);
        dst[j + 5] = clamp_channel((298 * c1 + 516 * u + 128) >> 8);

        x += 2;
    }
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
