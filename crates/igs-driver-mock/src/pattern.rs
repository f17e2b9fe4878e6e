//! Test pattern generation for simulated video frames.

/// Simple pseudo-random number generator (LCG) for reproducible noise.
/// Uses the same constants as glibc for predictable cross-platform behavior.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Generates an 8-bit diagnostic test pattern.
///
/// Pixels are interleaved, `channels` bytes per pixel, rows top to bottom.
/// The pattern includes:
/// - Checkerboard background with per-frame noise
/// - Solid triangle in the top-left corner for orientation detection
/// - Center crosshair
/// - Gradient bar along the top edge
/// - A bright spot orbiting the center, one step per frame
///
/// With more than one channel the spot is drawn in the first channel only,
/// so channel order can be verified visually.
pub fn generate_test_pattern(width: u32, height: u32, channels: u32, frame_num: u64) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let c = channels.max(1) as usize;
    let mut buffer = vec![0u8; w * h * c];
    if w == 0 || h == 0 {
        return buffer;
    }

    // For very small images, a diagonal gradient offset by the frame number
    if w < 32 || h < 32 {
        for y in 0..h {
            for x in 0..w {
                let value = ((x + y + frame_num as usize) * 255 / (w + h)) as u8;
                let base = (y * w + x) * c;
                buffer[base..base + c].fill(value);
            }
        }
        return buffer;
    }

    let checker = (w.min(h) / 16).max(1);
    let corner = (w.min(h) / 8).max(1);
    let cross_len = (w.min(h) / 6).max(1);
    let gradient_rows = (h / 12).max(1);
    let cx = w / 2;
    let cy = h / 2;

    let orbit = (w.min(h) / 4) as f64;
    let angle = (frame_num as f64 * 0.1) % std::f64::consts::TAU;
    let spot_x = cx as f64 + orbit * angle.cos();
    let spot_y = cy as f64 + orbit * angle.sin();
    let spot_sigma = (w.min(h) as f64 / 20.0).max(2.0);

    let frame_seed = frame_num.wrapping_mul(2654435761);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let noise = (prng(frame_seed ^ idx as u64) & 0x0F) as i32 - 8;

            let mut value: i32 = if ((x / checker) + (y / checker)) % 2 == 0 {
                64
            } else {
                80
            };
            value += noise;

            if y < gradient_rows {
                value = (x * 255 / w) as i32;
            }
            if x < corner && y < corner && x + y < corner {
                value = 255;
            }
            let on_cross = (y.abs_diff(cy) <= 1 && x.abs_diff(cx) <= cross_len)
                || (x.abs_diff(cx) <= 1 && y.abs_diff(cy) <= cross_len);
            if on_cross {
                value = 255;
            }

            let base_value = value.clamp(0, 255) as u8;
            let base = idx * c;
            buffer[base..base + c].fill(base_value);

            let dx = x as f64 - spot_x;
            let dy = y as f64 - spot_y;
            let gain = (-(dx * dx + dy * dy) / (2.0 * spot_sigma * spot_sigma)).exp();
            let spot = (f64::from(base_value) + gain * 160.0).min(255.0) as u8;
            buffer[base] = spot;
        }
    }

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_generates_correct_size() {
        assert_eq!(generate_test_pattern(640, 480, 1, 0).len(), 640 * 480);
        assert_eq!(generate_test_pattern(320, 240, 3, 0).len(), 320 * 240 * 3);
    }

    #[test]
    fn test_pattern_small_image() {
        assert_eq!(generate_test_pattern(8, 8, 1, 0).len(), 64);
    }

    #[test]
    fn test_pattern_varies_with_frame_number() {
        let first = generate_test_pattern(100, 100, 1, 0);
        let second = generate_test_pattern(100, 100, 1, 1);
        assert_ne!(first, second);
    }

    #[test]
    fn test_orientation_marker_is_white() {
        let frame = generate_test_pattern(128, 96, 3, 5);
        assert_eq!(&frame[0..3], &[255, 255, 255]);
    }

    #[test]
    fn test_degenerate_geometry_is_empty() {
        assert!(generate_test_pattern(0, 10, 1, 0).is_empty());
    }
}
