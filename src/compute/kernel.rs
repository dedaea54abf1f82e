//! kernel.rs
//! Reduction kernels over voxel windows.

use wide::f64x4;

/// Sum of element-wise products. Both windows cover the same voxels, so
/// they have the same length.
///
/// **Optimization:** 4-lane SIMD accumulation; the tail is summed scalar.
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "windows of one structure must align");

    let mut acc = f64x4::ZERO;
    let a_chunks = a.chunks_exact(4);
    let b_chunks = b.chunks_exact(4);
    let a_tail = a_chunks.remainder();
    let b_tail = b_chunks.remainder();

    for (ca, cb) in a_chunks.zip(b_chunks) {
        let va = f64x4::from([ca[0], ca[1], ca[2], ca[3]]);
        let vb = f64x4::from([cb[0], cb[1], cb[2], cb[3]]);
        acc = acc + va * vb;
    }

    let lanes: f64 = acc.to_array().iter().sum();
    let tail: f64 = a_tail.iter().zip(b_tail).map(|(x, y)| x * y).sum();
    lanes + tail
}

/// Non-exclusion mask: a voxel counts if it lies inside the injection
/// footprint or outside the AAV exclusion zone.
#[inline(always)]
pub fn not_excluded(injection_fraction: f64, exclusion_fraction: f64) -> bool {
    injection_fraction != 0.0 || exclusion_fraction == 0.0
}

/// Sum of `values[i] * weights[i]` over voxels passing the non-exclusion
/// mask. `weights = None` sums `values` directly. All windows have the same
/// length.
pub fn masked_dot(
    values: &[f64],
    weights: Option<&[f64]>,
    injection_fraction: &[f64],
    exclusion_fraction: &[f64],
) -> f64 {
    debug_assert_eq!(values.len(), injection_fraction.len(), "windows of one structure must align");
    debug_assert_eq!(values.len(), exclusion_fraction.len(), "windows of one structure must align");

    let kept = values
        .iter()
        .zip(injection_fraction.iter().zip(exclusion_fraction))
        .enumerate()
        .filter(|(_, (_, (inj, excl)))| not_excluded(**inj, **excl));
    match weights {
        Some(w) => {
            debug_assert_eq!(values.len(), w.len(), "windows of one structure must align");
            kept.map(|(i, (v, _))| v * w[i]).sum()
        }
        None => kept.map(|(_, (v, _))| *v).sum(),
    }
}
