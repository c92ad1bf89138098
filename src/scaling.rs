//! Scaling lists for H.265/HEVC quantization
//!
//! For every transform size, predictor class, and QP remainder the quantizer
//! needs three precomputed tables: a forward scaling factor per position, an
//! inverse scaling factor, and a floating-point error scale that converts
//! squared quantization error into the distortion units used by RDOQ. With
//! scaling lists disabled all positions share the flat base factors; custom
//! lists shape the factors per frequency, with 8×8 matrices ratio-upsampled
//! to the larger sizes and an explicit DC override.

use crate::error::{Error, Result};
use crate::quant::{MAX_TR_DYNAMIC_RANGE, SCALE_BITS};

/// Number of supported transform sizes (4×4 .. 32×32)
pub const NUM_SIZES: usize = 4;
/// Number of scaling lists per size (intra/inter × Y/Cb/Cr)
pub const NUM_LISTS: usize = 6;
/// Number of QP remainder classes
pub const NUM_REM: usize = 6;

/// Forward base scaling factors, one per QP remainder
pub const QUANT_SCALES: [i32; NUM_REM] = [26214, 23302, 20560, 18396, 16384, 14564];
/// Inverse base scaling factors, one per QP remainder
pub const INV_QUANT_SCALES: [i32; NUM_REM] = [40, 45, 51, 57, 64, 72];

/// Default intra 8×8 scaling matrix
static DEFAULT_INTRA_8X8: [i32; 64] = [
    16, 16, 16, 16, 17, 18, 21, 24, //
    16, 16, 16, 16, 17, 19, 22, 25, //
    16, 16, 17, 18, 20, 22, 25, 29, //
    16, 16, 18, 21, 24, 27, 31, 36, //
    17, 17, 20, 24, 30, 35, 41, 47, //
    18, 19, 22, 27, 35, 44, 54, 65, //
    21, 22, 25, 31, 41, 54, 70, 88, //
    24, 25, 29, 36, 47, 65, 88, 115,
];

/// Default inter 8×8 scaling matrix
static DEFAULT_INTER_8X8: [i32; 64] = [
    16, 16, 16, 16, 17, 18, 20, 24, //
    16, 16, 16, 17, 18, 20, 24, 25, //
    16, 16, 17, 18, 20, 24, 25, 28, //
    16, 17, 18, 20, 24, 25, 28, 33, //
    17, 18, 20, 24, 25, 28, 33, 41, //
    18, 20, 24, 25, 28, 33, 41, 54, //
    20, 24, 25, 28, 33, 41, 54, 71, //
    24, 25, 28, 33, 41, 54, 71, 91,
];

/// Flat 4×4 matrix (the HEVC default for 4×4 lists)
static FLAT_4X4: [i32; 16] = [16; 16];

type CoefTable<T> = [[[Box<[T]>; NUM_REM]; NUM_LISTS]; NUM_SIZES];

/// Per-(size, list, rem) quantizer, dequantizer, and error-scale tables
pub struct ScalingList {
    bit_depth: u32,
    enabled: bool,
    quant_coef: CoefTable<i32>,
    dequant_coef: CoefTable<i32>,
    err_scale: CoefTable<f64>,
}

fn check_bit_depth(bit_depth: u32) -> Result<()> {
    if bit_depth != 8 && bit_depth != 10 && bit_depth != 12 {
        return Err(Error::config(format!("Invalid bit depth: {}", bit_depth)));
    }
    Ok(())
}

impl ScalingList {
    /// Flat scaling (scaling lists disabled)
    pub fn flat(bit_depth: u32) -> Result<Self> {
        check_bit_depth(bit_depth)?;
        Ok(Self::build(bit_depth, false, |_size_idx, _list| {
            (&FLAT_4X4[..], 16)
        }))
    }

    /// The default HEVC scaling matrices (flat 4×4, shaped 8×8 and larger)
    pub fn hevc_default(bit_depth: u32) -> Result<Self> {
        check_bit_depth(bit_depth)?;
        tracing::trace!(bit_depth, "installing default HEVC scaling matrices");
        Ok(Self::build(bit_depth, true, |size_idx, list| {
            let intra = list < 3;
            if size_idx == 0 {
                (&FLAT_4X4[..], 16)
            } else if intra {
                (&DEFAULT_INTRA_8X8[..], 16)
            } else {
                (&DEFAULT_INTER_8X8[..], 16)
            }
        }))
    }

    /// Build tables from per-(size, list) source matrices
    ///
    /// `source` returns the 4×4 or 8×8 matrix and the DC value for a slot;
    /// 8×8 matrices are ratio-upsampled to 16×16 and 32×32.
    fn build(bit_depth: u32, enabled: bool, source: impl Fn(usize, usize) -> (&'static [i32], i32)) -> Self {
        let mut quant_coef: CoefTable<i32> = table_of(|size_idx| 1usize << (2 * (size_idx + 2)));
        let mut dequant_coef: CoefTable<i32> = table_of(|size_idx| 1usize << (2 * (size_idx + 2)));
        let mut err_scale: CoefTable<f64> = table_of(|size_idx| 1usize << (2 * (size_idx + 2)));

        for size_idx in 0..NUM_SIZES {
            let log2_tr_size = size_idx as u32 + 2;
            let width = 1usize << log2_tr_size;
            let transform_shift = MAX_TR_DYNAMIC_RANGE - bit_depth as i32 - log2_tr_size as i32;
            let scaling_bits =
                f64::from(1 << SCALE_BITS) * 2f64.powi(-2 * transform_shift);
            let depth_scale = f64::from(1 << (2 * (bit_depth - 8)));

            for list in 0..NUM_LISTS {
                let (matrix, dc) = source(size_idx, list);
                let src_width = if matrix.len() == 16 { 4 } else { 8 };
                let ratio = (width / src_width).max(1);

                for rem in 0..NUM_REM {
                    let q = &mut quant_coef[size_idx][list][rem];
                    let dq = &mut dequant_coef[size_idx][list][rem];
                    let es = &mut err_scale[size_idx][list][rem];

                    for j in 0..width {
                        for i in 0..width {
                            let m = matrix[src_width * (j / ratio) + i / ratio];
                            q[j * width + i] = (QUANT_SCALES[rem] << 4) / m;
                            dq[j * width + i] = INV_QUANT_SCALES[rem] * m;
                        }
                    }
                    if ratio > 1 {
                        q[0] = (QUANT_SCALES[rem] << 4) / dc;
                        dq[0] = INV_QUANT_SCALES[rem] * dc;
                    }
                    for i in 0..width * width {
                        es[i] = scaling_bits
                            / f64::from(q[i])
                            / f64::from(q[i])
                            / depth_scale;
                    }
                }
            }
        }

        ScalingList {
            bit_depth,
            enabled,
            quant_coef,
            dequant_coef,
            err_scale,
        }
    }

    /// Whether custom (non-flat) lists are active
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Bit depth the error scales were computed for
    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    /// Forward scaling factors for `(size_idx, list_type, rem)`
    pub fn quant_coef(&self, size_idx: usize, list: usize, rem: usize) -> &[i32] {
        &self.quant_coef[size_idx][list][rem]
    }

    /// Inverse scaling factors for `(size_idx, list_type, rem)`
    pub fn dequant_coef(&self, size_idx: usize, list: usize, rem: usize) -> &[i32] {
        &self.dequant_coef[size_idx][list][rem]
    }

    /// Squared-error-to-distortion factors for `(size_idx, list_type, rem)`
    pub fn err_scale(&self, size_idx: usize, list: usize, rem: usize) -> &[f64] {
        &self.err_scale[size_idx][list][rem]
    }
}

fn table_of<T: Default + Clone>(len: impl Fn(usize) -> usize) -> CoefTable<T> {
    std::array::from_fn(|size_idx| {
        std::array::from_fn(|_| {
            std::array::from_fn(|_| vec![T::default(); len(size_idx)].into_boxed_slice())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_list_uses_base_scales() {
        let sl = ScalingList::flat(8).unwrap();
        assert!(!sl.enabled());
        for rem in 0..NUM_REM {
            let q = sl.quant_coef(0, 0, rem);
            assert_eq!(q.len(), 16);
            assert!(q.iter().all(|&v| v == QUANT_SCALES[rem]));
            let dq = sl.dequant_coef(0, 0, rem);
            assert!(dq.iter().all(|&v| v == INV_QUANT_SCALES[rem] << 4));
        }
    }

    #[test]
    fn test_table_shapes() {
        let sl = ScalingList::flat(8).unwrap();
        assert_eq!(sl.quant_coef(0, 0, 0).len(), 16);
        assert_eq!(sl.quant_coef(1, 3, 0).len(), 64);
        assert_eq!(sl.quant_coef(2, 5, 5).len(), 256);
        assert_eq!(sl.quant_coef(3, 0, 0).len(), 1024);
    }

    #[test]
    fn test_invalid_bit_depth() {
        assert!(ScalingList::flat(9).is_err());
        assert!(ScalingList::hevc_default(14).is_err());
    }

    #[test]
    fn test_err_scale_positive_and_monotonic_in_rem() {
        let sl = ScalingList::flat(8).unwrap();
        for size_idx in 0..NUM_SIZES {
            let lo = sl.err_scale(size_idx, 0, 0)[0];
            let hi = sl.err_scale(size_idx, 0, 5)[0];
            assert!(lo > 0.0);
            // larger quant step (higher rem) means a coarser grid, so each
            // unit of scaled error carries more distortion
            assert!(hi > lo);
        }
    }

    #[test]
    fn test_default_matrices_shape_high_frequencies() {
        let sl = ScalingList::hevc_default(8).unwrap();
        assert!(sl.enabled());
        let q = sl.quant_coef(1, 0, 0);
        // high-frequency positions divide by larger matrix entries
        assert!(q[63] < q[0]);
        let dq = sl.dequant_coef(1, 0, 0);
        assert!(dq[63] > dq[0]);
    }

    #[test]
    fn test_upsampled_dc_override() {
        let sl = ScalingList::hevc_default(8).unwrap();
        // 16x16 intra luma: DC override uses value 16
        let q = sl.quant_coef(2, 0, 0);
        assert_eq!(q[0], (QUANT_SCALES[0] << 4) / 16);
        // neighbor comes from the upsampled 8x8 matrix
        assert_eq!(q[1], (QUANT_SCALES[0] << 4) / 16);
    }

    #[test]
    fn test_flat_err_scale_matches_formula() {
        let sl = ScalingList::flat(8).unwrap();
        // 4x4, 8-bit: transform_shift = 15 - 8 - 2 = 5
        let expected = f64::from(1 << SCALE_BITS) * 2f64.powi(-10)
            / f64::from(QUANT_SCALES[0])
            / f64::from(QUANT_SCALES[0]);
        let got = sl.err_scale(0, 0, 0)[0];
        assert!((got - expected).abs() < 1e-12);
    }
}
