use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::{filter3x3, separable_filter_equal};

pub type GradientImage = ImageBuffer<Luma<f32>, Vec<f32>>;

const K_SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const K_SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

/// Pixel-level transforms shared by the validator and the classifier
pub struct ImageTransforms;

impl ImageTransforms {
    /// ITU-R 601 luma, rounded.
    pub fn to_grayscale(image: &RgbImage) -> GrayImage {
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            let Rgb([r, g, b]) = *image.get_pixel(x, y);
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            Luma([luma.round().clamp(0.0, 255.0) as u8])
        })
    }

    /// 1-D Gaussian kernel, normalized to sum 1.
    ///
    /// With a non-positive sigma the small odd sizes use the fixed binomial
    /// tables, larger ones derive sigma from the size.
    pub fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
        let size = size.max(1) | 1;
        if sigma <= 0.0 {
            let fixed: Option<&[f32]> = match size {
                1 => Some(&[1.0]),
                3 => Some(&[0.25, 0.5, 0.25]),
                5 => Some(&[0.0625, 0.25, 0.375, 0.25, 0.0625]),
                7 => Some(&[0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125]),
                _ => None,
            };
            if let Some(kernel) = fixed {
                return kernel.to_vec();
            }
        }

        let sigma = if sigma > 0.0 {
            sigma
        } else {
            0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
        };
        let center = (size / 2) as f32;
        let mut kernel: Vec<f32> = (0..size)
            .map(|i| {
                let d = i as f32 - center;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let sum: f32 = kernel.iter().sum();
        kernel.iter_mut().for_each(|k| *k /= sum);
        kernel
    }

    pub fn gaussian_blur(image: &GrayImage, size: u32, sigma: f32) -> GrayImage {
        if image.width() == 0 || image.height() == 0 {
            return image.clone();
        }
        let kernel = Self::gaussian_kernel(size, sigma);
        separable_filter_equal(image, &kernel)
    }

    /// Horizontal and vertical Sobel responses.
    pub fn sobel(image: &GrayImage) -> (GradientImage, GradientImage) {
        let gray: GradientImage =
            ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
                Luma([image.get_pixel(x, y)[0] as f32])
            });
        let gx: GradientImage = filter3x3(&gray, &K_SOBEL_X);
        let gy: GradientImage = filter3x3(&gray, &K_SOBEL_Y);
        (gx, gy)
    }

    /// Canny edge map over precomputed Sobel responses, no extra smoothing.
    ///
    /// Gradient strength is the L1 norm `|gx| + |gy|`. Non-maximum suppression
    /// quantizes the direction into four sectors; pixels above `high` seed the
    /// hysteresis, which then follows 8-connected pixels above `low`.
    pub fn canny_edges(gx: &GradientImage, gy: &GradientImage, low: f32, high: f32) -> GrayImage {
        let (width, height) = gx.dimensions();
        let (w, h) = (width as usize, height as usize);
        let mut edges = GrayImage::new(width, height);
        if w == 0 || h == 0 {
            return edges;
        }

        let dx = gx.as_raw();
        let dy = gy.as_raw();
        let magnitude: Vec<f32> = dx.iter().zip(dy).map(|(x, y)| x.abs() + y.abs()).collect();
        let mag = |x: isize, y: isize| -> f32 {
            if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
                0.0
            } else {
                magnitude[y as usize * w + x as usize]
            }
        };

        // 0: below low, 1: weak candidate, 2: edge
        let mut state = vec![0u8; w * h];
        let mut stack = Vec::new();
        let tan_22 = std::f32::consts::FRAC_PI_8.tan();
        let tan_67 = (3.0 * std::f32::consts::FRAC_PI_8).tan();

        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let m = magnitude[i];
                if m <= low {
                    continue;
                }
                let (xi, yi) = (x as isize, y as isize);
                let (ax, ay) = (dx[i].abs(), dy[i].abs());

                let is_max = if ay < ax * tan_22 {
                    m > mag(xi - 1, yi) && m >= mag(xi + 1, yi)
                } else if ay > ax * tan_67 {
                    m > mag(xi, yi - 1) && m >= mag(xi, yi + 1)
                } else {
                    let s = if (dx[i] < 0.0) != (dy[i] < 0.0) { -1 } else { 1 };
                    m > mag(xi - s, yi - 1) && m > mag(xi + s, yi + 1)
                };
                if !is_max {
                    continue;
                }

                if m > high {
                    state[i] = 2;
                    stack.push(i);
                } else {
                    state[i] = 1;
                }
            }
        }

        while let Some(i) = stack.pop() {
            let (x, y) = ((i % w) as isize, (i / w) as isize);
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                        continue;
                    }
                    let j = ny as usize * w + nx as usize;
                    if state[j] == 1 {
                        state[j] = 2;
                        stack.push(j);
                    }
                }
            }
        }

        for (pixel, s) in edges.pixels_mut().zip(&state) {
            if *s == 2 {
                pixel[0] = 255;
            }
        }
        edges
    }

    /// RGB to 8-bit HSV: hue halved into 0..180, saturation and value in 0..=255.
    pub fn rgb_to_hsv(pixel: Rgb<u8>) -> [u8; 3] {
        let Rgb([r, g, b]) = pixel;
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let diff = max - min;

        let s = if max > 0.0 { diff * 255.0 / max } else { 0.0 };

        let mut h = if diff == 0.0 {
            0.0
        } else if max == rf {
            60.0 * (gf - bf) / diff
        } else if max == gf {
            120.0 + 60.0 * (bf - rf) / diff
        } else {
            240.0 + 60.0 * (rf - gf) / diff
        };
        if h < 0.0 {
            h += 360.0;
        }

        let mut h = (h / 2.0).round() as u16;
        if h >= 180 {
            h -= 180;
        }

        [h as u8, s.round() as u8, max as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_matches_8bit_convention() {
        assert_eq!(ImageTransforms::rgb_to_hsv(Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(ImageTransforms::rgb_to_hsv(Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(ImageTransforms::rgb_to_hsv(Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(ImageTransforms::rgb_to_hsv(Rgb([255, 255, 0])), [30, 255, 255]);
        assert_eq!(ImageTransforms::rgb_to_hsv(Rgb([128, 128, 128])), [0, 0, 128]);
        assert_eq!(ImageTransforms::rgb_to_hsv(Rgb([0, 0, 0])), [0, 0, 0]);
    }

    #[test]
    fn near_full_circle_hue_wraps_to_zero() {
        // hue of ~359.5 degrees
        let [h, _, _] = ImageTransforms::rgb_to_hsv(Rgb([255, 0, 2]));
        assert_eq!(h, 0);
    }

    #[test]
    fn five_tap_kernel_is_binomial() {
        let k = ImageTransforms::gaussian_kernel(5, 0.0);
        assert_eq!(k, vec![0.0625, 0.25, 0.375, 0.25, 0.0625]);
    }

    #[test]
    fn derived_kernel_sums_to_one() {
        let k = ImageTransforms::gaussian_kernel(9, 0.0);
        assert_eq!(k.len(), 9);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(k[4] > k[3] && k[3] > k[2]);
    }

    #[test]
    fn blur_keeps_flat_images_flat() {
        let img = GrayImage::from_pixel(20, 20, Luma([77]));
        let blurred = ImageTransforms::gaussian_blur(&img, 5, 0.0);
        assert!(blurred.pixels().all(|p| (p[0] as i32 - 77).abs() <= 1));
    }

    #[test]
    fn sobel_responds_to_vertical_edge() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 0 } else { 200 }]));
        let (gx, gy) = ImageTransforms::sobel(&img);
        assert!(gx.get_pixel(5, 5)[0] > 0.0);
        assert_eq!(gy.get_pixel(5, 5)[0], 0.0);
    }

    #[test]
    fn canny_thins_a_step_to_one_column() {
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 100 } else { 125 }]));
        let blurred = ImageTransforms::gaussian_blur(&img, 5, 0.0);
        let (gx, gy) = ImageTransforms::sobel(&blurred);
        let edges = ImageTransforms::canny_edges(&gx, &gy, 25.0, 50.0);

        for y in 0..20 {
            let row: Vec<u32> = (0..20).filter(|&x| edges.get_pixel(x, y)[0] == 255).collect();
            assert_eq!(row.len(), 1, "row {} edges {:?}", y, row);
            assert!((9..=10).contains(&row[0]));
        }
    }

    #[test]
    fn canny_ignores_steps_below_low_threshold() {
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 100 } else { 103 }]));
        let (gx, gy) = ImageTransforms::sobel(&img);
        let edges = ImageTransforms::canny_edges(&gx, &gy, 25.0, 50.0);
        assert!(edges.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn canny_follows_weak_pixels_connected_to_strong_ones() {
        // top half of the step is strong, bottom half only weak
        let img = GrayImage::from_fn(20, 20, |x, y| {
            let high = if y < 10 { 140 } else { 110 };
            Luma([if x < 10 { 100 } else { high }])
        });
        let (gx, gy) = ImageTransforms::sobel(&img);
        let edges = ImageTransforms::canny_edges(&gx, &gy, 25.0, 50.0);
        let edge_rows = (0..20)
            .filter(|&y| (0..20).any(|x| edges.get_pixel(x, y)[0] == 255))
            .count();
        assert_eq!(edge_rows, 20);
    }

    #[test]
    fn grayscale_uses_601_weights() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(ImageTransforms::to_grayscale(&img).get_pixel(0, 0)[0], 76);
    }
}
