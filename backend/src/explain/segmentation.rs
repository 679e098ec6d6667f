//! SLIC superpixels over CIE-Lab, with connectivity enforcement.

use image::RgbImage;
use ndarray::{Array2, Array3};
use palette::{FromColor, Lab, Srgb};
use std::collections::VecDeque;

/// Segment label per pixel, consecutive from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Segments {
    pub labels: Array2<usize>,
    pub count: usize,
}

impl Segments {
    pub fn mask_of(&self, wanted: &[usize]) -> Array2<bool> {
        let mut lookup = vec![false; self.count];
        for &s in wanted {
            if s < self.count {
                lookup[s] = true;
            }
        }
        self.labels.mapv(|l| lookup[l])
    }

    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.count];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }
}

#[derive(Debug, Clone, Copy)]
struct Center {
    y: f32,
    x: f32,
    lab: [f32; 3],
}

fn to_lab(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    let mut lab = Array3::zeros((h as usize, w as usize, 3));
    for (x, y, p) in image.enumerate_pixels() {
        let srgb = Srgb::new(p[0], p[1], p[2]).into_format::<f32>();
        let c: Lab = Lab::from_color(srgb.into_linear());
        lab[[y as usize, x as usize, 0]] = c.l;
        lab[[y as usize, x as usize, 1]] = c.a;
        lab[[y as usize, x as usize, 2]] = c.b;
    }
    lab
}

/// Partitions `image` into roughly `n_segments` compact, colour-coherent
/// regions. Higher `compactness` favours square-ish segments over colour
/// fidelity.
pub fn slic(
    image: &RgbImage,
    n_segments: usize,
    compactness: f32,
    max_iterations: usize,
) -> Segments {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return Segments {
            labels: Array2::zeros((h, w)),
            count: 0,
        };
    }

    let lab = to_lab(image);
    let step = ((h * w) as f32 / n_segments.max(1) as f32).sqrt().max(1.0);

    let mut centers = Vec::new();
    let mut cy = step / 2.0;
    while cy < h as f32 {
        let mut cx = step / 2.0;
        while cx < w as f32 {
            let (py, px) = (cy as usize, cx as usize);
            centers.push(Center {
                y: cy,
                x: cx,
                lab: [lab[[py, px, 0]], lab[[py, px, 1]], lab[[py, px, 2]]],
            });
            cx += step;
        }
        cy += step;
    }

    let spatial_weight = (compactness / step).powi(2);
    let window = (2.0 * step).ceil() as isize;
    let mut labels = Array2::<usize>::zeros((h, w));
    let mut distances = Array2::<f32>::from_elem((h, w), f32::INFINITY);

    for _ in 0..max_iterations.max(1) {
        distances.fill(f32::INFINITY);
        for (k, c) in centers.iter().enumerate() {
            let y_lo = (c.y as isize - window).max(0) as usize;
            let y_hi = ((c.y as isize + window) as usize).min(h - 1);
            let x_lo = (c.x as isize - window).max(0) as usize;
            let x_hi = ((c.x as isize + window) as usize).min(w - 1);
            for y in y_lo..=y_hi {
                for x in x_lo..=x_hi {
                    let dl = lab[[y, x, 0]] - c.lab[0];
                    let da = lab[[y, x, 1]] - c.lab[1];
                    let db = lab[[y, x, 2]] - c.lab[2];
                    let dy = y as f32 - c.y;
                    let dx = x as f32 - c.x;
                    let d = dl * dl + da * da + db * db + spatial_weight * (dy * dy + dx * dx);
                    if d < distances[[y, x]] {
                        distances[[y, x]] = d;
                        labels[[y, x]] = k;
                    }
                }
            }
        }

        let mut sums = vec![[0.0f64; 6]; centers.len()];
        for ((y, x), &k) in labels.indexed_iter() {
            let s = &mut sums[k];
            s[0] += y as f64;
            s[1] += x as f64;
            s[2] += lab[[y, x, 0]] as f64;
            s[3] += lab[[y, x, 1]] as f64;
            s[4] += lab[[y, x, 2]] as f64;
            s[5] += 1.0;
        }
        for (c, s) in centers.iter_mut().zip(&sums) {
            if s[5] > 0.0 {
                let n = s[5];
                c.y = (s[0] / n) as f32;
                c.x = (s[1] / n) as f32;
                c.lab = [(s[2] / n) as f32, (s[3] / n) as f32, (s[4] / n) as f32];
            }
        }
    }

    let min_size = ((h * w) as f32 / centers.len().max(1) as f32 * 0.5) as usize;
    enforce_connectivity(&labels, min_size.max(1))
}

/// Splits disconnected pieces of a label into their own segments, merges
/// pieces smaller than `min_size` into the previously visited neighbour, and
/// relabels consecutively in raster order.
pub fn enforce_connectivity(labels: &Array2<usize>, min_size: usize) -> Segments {
    let (h, w) = labels.dim();
    let mut out = Array2::<usize>::from_elem((h, w), usize::MAX);
    let mut next = 0usize;
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for sy in 0..h {
        for sx in 0..w {
            if out[[sy, sx]] != usize::MAX {
                continue;
            }
            let original = labels[[sy, sx]];

            // A neighbour already relabeled, to absorb small pieces.
            let adjacent = [(sy.wrapping_sub(1), sx), (sy, sx.wrapping_sub(1))]
                .into_iter()
                .filter(|&(y, x)| y < h && x < w)
                .map(|(y, x)| out[[y, x]])
                .find(|&l| l != usize::MAX);

            component.clear();
            queue.push_back((sy, sx));
            out[[sy, sx]] = next;
            while let Some((y, x)) = queue.pop_front() {
                component.push((y, x));
                let neighbours = [
                    (y.wrapping_sub(1), x),
                    (y + 1, x),
                    (y, x.wrapping_sub(1)),
                    (y, x + 1),
                ];
                for (ny, nx) in neighbours {
                    if ny < h
                        && nx < w
                        && out[[ny, nx]] == usize::MAX
                        && labels[[ny, nx]] == original
                    {
                        out[[ny, nx]] = next;
                        queue.push_back((ny, nx));
                    }
                }
            }

            match adjacent {
                Some(target) if component.len() < min_size => {
                    for &(y, x) in &component {
                        out[[y, x]] = target;
                    }
                }
                _ => next += 1,
            }
        }
    }

    Segments { labels: out, count: next }
}
