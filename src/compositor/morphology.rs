use ndarray::prelude::*;
use rayon::prelude::*;

/// Run `filter` over every line of `plane` along `axis` (rows for axis 1,
/// columns for axis 0) in parallel.
fn filter_lines<F>(plane: ArrayView2<f32>, axis: Axis, filter: F) -> Array2<f32>
where
    F: Fn(&[f32], &mut [f32]) + Sync,
{
    let (h, w) = plane.dim();
    // lines run along `axis`, so we iterate over the other one
    let across = Axis(1 - axis.index());
    let count = plane.len_of(across);
    let len = plane.len_of(axis);

    let lines: Vec<Vec<f32>> = (0..count)
        .into_par_iter()
        .map(|i| {
            let line = plane.index_axis(across, i).to_vec();
            let mut out = vec![0.0; len];
            filter(&line, &mut out);
            out
        })
        .collect();
    let flat: Vec<f32> = lines.into_iter().flatten().collect();

    if axis.index() == 1 {
        Array2::from_shape_fn((h, w), |(y, x)| flat[y * w + x])
    } else {
        Array2::from_shape_fn((h, w), |(y, x)| flat[x * h + y])
    }
}

/// Sliding-window extreme with an OpenCV-style anchor; taps outside the line
/// are skipped.
fn sliding_extreme(line: &[f32], out: &mut [f32], ksize: usize, anchor: usize, take_min: bool) {
    let n = line.len() as isize;
    for (i, o) in out.iter_mut().enumerate() {
        let start = i as isize - anchor as isize;
        let lo = start.max(0);
        let hi = (start + ksize as isize).min(n);
        let mut acc = if take_min { f32::INFINITY } else { f32::NEG_INFINITY };
        for j in lo..hi {
            let v = line[j as usize];
            acc = if take_min { acc.min(v) } else { acc.max(v) };
        }
        *o = if acc.is_finite() { acc } else { line[i] };
    }
}

fn morph(plane: ArrayView2<f32>, ksize: usize, take_min: bool) -> Array2<f32> {
    if ksize <= 1 {
        return plane.to_owned();
    }
    let anchor = ksize / 2;
    let rows = filter_lines(plane, Axis(1), |line, out| {
        sliding_extreme(line, out, ksize, anchor, take_min)
    });
    filter_lines(rows.view(), Axis(0), |line, out| {
        sliding_extreme(line, out, ksize, anchor, take_min)
    })
}

/// Erosion with a `ksize` x `ksize` rectangle.
pub fn erode(plane: ArrayView2<f32>, ksize: usize) -> Array2<f32> {
    morph(plane, ksize, true)
}

/// Dilation with a `ksize` x `ksize` rectangle.
pub fn dilate(plane: ArrayView2<f32>, ksize: usize) -> Array2<f32> {
    morph(plane, ksize, false)
}

/// 1D Gaussian weights summing to one. Non-positive `sigma` is derived from
/// the kernel size the way OpenCV does it.
pub fn gaussian_kernel(ksize: usize, sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        let fixed: Option<&[f32]> = match ksize {
            1 => Some(&[1.0]),
            3 => Some(&[0.25, 0.5, 0.25]),
            5 => Some(&[0.0625, 0.25, 0.375, 0.25, 0.0625]),
            7 => Some(&[
                0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
            ]),
            _ => None,
        };
        if let Some(fixed) = fixed {
            return fixed.to_vec();
        }
    }

    let sigma = if sigma > 0.0 {
        sigma as f64
    } else {
        0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let scale = -0.5 / (sigma * sigma);
    let center = (ksize as f64 - 1.0) / 2.0;

    let weights: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Reflect an out-of-range index back into `0..n` without repeating the
/// edge sample (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(i: isize, n: isize) -> usize {
    if n == 1 {
        return 0;
    }
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

fn convolve_line(line: &[f32], out: &mut [f32], kernel: &[f32]) {
    let n = line.len() as isize;
    let half = (kernel.len() / 2) as isize;
    for (i, o) in out.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (k, w) in kernel.iter().enumerate() {
            let j = reflect_101(i as isize + k as isize - half, n);
            acc += line[j] * w;
        }
        *o = acc;
    }
}

/// Separable Gaussian blur with a square odd `ksize` kernel and reflected
/// borders.
pub fn gaussian_blur(plane: ArrayView2<f32>, ksize: usize, sigma: f32) -> Array2<f32> {
    if ksize <= 1 || plane.is_empty() {
        return plane.to_owned();
    }
    let kernel = gaussian_kernel(ksize, sigma);
    let rows = filter_lines(plane, Axis(1), |line, out| convolve_line(line, out, &kernel));
    filter_lines(rows.view(), Axis(0), |line, out| convolve_line(line, out, &kernel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(size: usize, from: usize, to: usize) -> Array2<f32> {
        Array2::from_shape_fn((size, size), |(y, x)| {
            if (from..to).contains(&y) && (from..to).contains(&x) {
                255.0
            } else {
                0.0
            }
        })
    }

    fn area(mask: &Array2<f32>) -> usize {
        mask.iter().filter(|&&v| v > 0.0).count()
    }

    #[test]
    fn erosion_area_shrinks_as_kernel_grows() {
        let mask = square_mask(64, 8, 56);
        let mut previous = area(&mask);
        for k in [1, 2, 3, 5, 8, 10, 15, 20] {
            let eroded = area(&erode(mask.view(), k));
            assert!(eroded <= previous, "k = {}: {} > {}", k, eroded, previous);
            previous = eroded;
        }
    }

    #[test]
    fn odd_erosion_trims_each_side() {
        let eroded = erode(square_mask(20, 5, 15).view(), 3);
        assert_eq!(area(&eroded), 8 * 8);
        assert_eq!(eroded[[6, 6]], 255.0);
        assert_eq!(eroded[[5, 5]], 0.0);
    }

    #[test]
    fn erosion_ignores_the_image_border() {
        let full = Array2::from_elem((6, 6), 255.0f32);
        assert_eq!(erode(full.view(), 4), full);
    }

    #[test]
    fn even_dilation_grows_up_and_left() {
        let mut plane = Array2::zeros((5, 5));
        plane[[2, 2]] = 255.0;
        let dilated = dilate(plane.view(), 2);
        // anchor (1, 1): the window of (y, x) covers (y-1..=y, x-1..=x)
        assert_eq!(dilated[[2, 2]], 255.0);
        assert_eq!(dilated[[3, 3]], 255.0);
        assert_eq!(dilated[[1, 1]], 0.0);
        assert_eq!(area(&dilated), 4);
    }

    #[test]
    fn gaussian_kernel_sums_to_one() {
        for k in [3, 5, 11, 21] {
            let kernel = gaussian_kernel(k, 0.0);
            assert_eq!(kernel.len(), k);
            assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(kernel[k / 2] >= kernel[0]);
        }
    }

    #[test]
    fn blur_preserves_constant_planes() {
        let plane = Array2::from_elem((7, 9), 42.0f32);
        let blurred = gaussian_blur(plane.view(), 11, 0.0);
        for v in blurred.iter() {
            assert!((v - 42.0).abs() < 1e-3);
        }
    }

    #[test]
    fn reflection_skips_the_edge() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(-7, 3), 1);
        assert_eq!(reflect_101(4, 1), 0);
    }
}
