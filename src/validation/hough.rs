//! Circle detection with the Hough gradient method.
//!
//! Edge pixels vote for centre candidates along their gradient direction; the
//! strongest candidates are then confirmed by looking for a radius with enough
//! edge support around them.

use crate::config::HoughConfig;
use crate::image::ImageTransforms;
use image::GrayImage;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Circle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Edge pixels lying on the circle
    pub support: u32,
}

pub struct HoughCircleDetector {
    config: HoughConfig,
}

impl HoughCircleDetector {
    pub fn new(config: HoughConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HoughConfig {
        &self.config
    }

    /// Find circles in an already smoothed grayscale image, strongest first.
    /// Stops after `limit` circles when given.
    pub fn detect(&self, gray: &GrayImage, limit: Option<usize>) -> Vec<Circle> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 || limit == Some(0) {
            return Vec::new();
        }

        let dp = self.config.dp.max(1.0);
        let min_radius = self.config.min_radius as f32;
        let max_radius = match self.config.max_radius {
            0 => width.max(height) as f32,
            r => r as f32,
        };
        if max_radius < min_radius {
            return Vec::new();
        }

        let acc_w = (width as f32 / dp).ceil() as usize;
        let acc_h = (height as f32 / dp).ceil() as usize;
        let (accumulator, edge_points) =
            self.vote(gray, dp, min_radius, max_radius, acc_w, acc_h);

        if edge_points.is_empty() {
            return Vec::new();
        }

        let threshold = self.config.accumulator_threshold;
        let centers = local_maxima(&accumulator, acc_w, acc_h, threshold);
        tracing::trace!(
            "Hough: {} edge pixels, {} centre candidates",
            edge_points.len(),
            centers.len()
        );

        let min_r2 = min_radius * min_radius;
        let max_r2 = max_radius * max_radius;
        let min_dist2 = self.config.min_dist * self.config.min_dist;

        let mut circles: Vec<Circle> = Vec::new();
        let mut distances = Vec::with_capacity(edge_points.len());

        for (_, ax, ay) in centers {
            let cx = (ax as f32 + 0.5) * dp;
            let cy = (ay as f32 + 0.5) * dp;

            let too_close = circles.iter().any(|c| {
                let (dx, dy) = (c.x - cx, c.y - cy);
                dx * dx + dy * dy < min_dist2
            });
            if too_close {
                continue;
            }

            distances.clear();
            for &(px, py) in &edge_points {
                let (dx, dy) = (px - cx, py - cy);
                let d2 = dx * dx + dy * dy;
                if (min_r2..=max_r2).contains(&d2) {
                    distances.push(d2.sqrt());
                }
            }
            if distances.is_empty() {
                continue;
            }
            distances.sort_unstable_by(|a, b| a.total_cmp(b));

            let (radius, support) = best_radius(&distances, dp);
            if support > threshold {
                circles.push(Circle {
                    x: cx,
                    y: cy,
                    radius,
                    support,
                });
                if limit.is_some_and(|n| circles.len() >= n) {
                    break;
                }
            }
        }

        circles
    }

    /// Accumulate centre votes; returns the accumulator and the voting edge pixels.
    fn vote(
        &self,
        gray: &GrayImage,
        dp: f32,
        min_radius: f32,
        max_radius: f32,
        acc_w: usize,
        acc_h: usize,
    ) -> (Vec<u32>, Vec<(f32, f32)>) {
        let high = self.config.canny_threshold.max(1.0);
        let (gx, gy) = ImageTransforms::sobel(gray);
        let edges = ImageTransforms::canny_edges(&gx, &gy, (high / 2.0).max(1.0), high);

        let idp = 1.0 / dp;
        let mut accumulator = vec![0u32; acc_w * acc_h];
        let mut edge_points = Vec::new();

        for (x, y, edge) in edges.enumerate_pixels() {
            if edge[0] == 0 {
                continue;
            }
            let vx = gx.get_pixel(x, y)[0];
            let vy = gy.get_pixel(x, y)[0];
            let magnitude = (vx * vx + vy * vy).sqrt();
            if magnitude <= f32::EPSILON {
                continue;
            }
            edge_points.push((x as f32, y as f32));

            let (ux, uy) = (vx / magnitude * idp, vy / magnitude * idp);
            let (x0, y0) = (x as f32 * idp, y as f32 * idp);

            for sign in [1.0f32, -1.0] {
                let (sx, sy) = (ux * sign, uy * sign);
                let mut px = x0 + min_radius * sx;
                let mut py = y0 + min_radius * sy;
                let mut r = min_radius;
                while r <= max_radius {
                    let (ax, ay) = (px.floor(), py.floor());
                    if ax < 0.0 || ay < 0.0 || ax >= acc_w as f32 || ay >= acc_h as f32 {
                        break;
                    }
                    accumulator[ay as usize * acc_w + ax as usize] += 1;
                    px += sx;
                    py += sy;
                    r += 1.0;
                }
            }
        }

        (accumulator, edge_points)
    }
}

/// Cells above `threshold` that beat their 4-neighbourhood, strongest first.
fn local_maxima(acc: &[u32], width: usize, height: usize, threshold: u32) -> Vec<(u32, usize, usize)> {
    let at = |x: isize, y: isize| -> u32 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0
        } else {
            acc[y as usize * width + x as usize]
        }
    };

    let mut centers = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let v = acc[y * width + x];
            if v <= threshold {
                continue;
            }
            let (xi, yi) = (x as isize, y as isize);
            if v > at(xi - 1, yi) && v >= at(xi + 1, yi) && v > at(xi, yi - 1) && v >= at(xi, yi + 1) {
                centers.push((v, x, y));
            }
        }
    }
    centers.sort_by(|a, b| b.0.cmp(&a.0));
    centers
}

/// Group sorted distances into bins of width `bin` and pick the bin with the
/// best support per unit radius. Returns (median radius, support).
fn best_radius(sorted: &[f32], bin: f32) -> (f32, u32) {
    let mut best_radius = 0.0f32;
    let mut best_count = 0usize;
    let mut start = 0usize;

    for j in 1..=sorted.len() {
        if j < sorted.len() && sorted[j] - sorted[start] <= bin {
            continue;
        }
        let count = j - start;
        let radius = sorted[(start + j - 1) / 2];
        if best_count == 0 || count as f32 * best_radius >= best_count as f32 * radius {
            best_radius = radius;
            best_count = count;
        }
        start = j;
    }

    (best_radius, best_count as u32)
}
