//! Primitive kernel dispatch for the transform/quantization pipeline
//!
//! Every block-sized numeric kernel the pipeline calls goes through this
//! table, so optimized (SIMD, assembly) implementations can be swapped in
//! per entry without touching the pipeline logic. The constructors wire up
//! the scalar reference kernels.

use crate::error::{Error, Result};
use crate::transform::{dct_c, dst_c, idct_c, idst_c};

/// Number of transform kernel slots (DST 4×4 plus the four DCT sizes)
pub const NUM_TR_KERNELS: usize = 5;
/// Number of square block sizes (4×4 .. 32×32)
pub const NUM_SQUARE_BLOCKS: usize = 4;

/// Kernel slot for the 4×4 DST
pub const DST_4X4: usize = 0;
/// Kernel slot for the 4×4 DCT; larger DCT sizes follow consecutively
pub const DCT_4X4: usize = 1;

/// Slot of the forward/inverse transform kernel for a size, DST-aware
pub fn tr_kernel_index(size_idx: usize, use_dst: bool) -> usize {
    DCT_4X4 + size_idx - usize::from(use_dst)
}

/// Forward transform: residual (strided) to coefficients (tight)
pub type DctFn = fn(src: &[i16], dst: &mut [i32], src_stride: usize);
/// Inverse transform: coefficients (tight) to residual (strided)
pub type IdctFn = fn(src: &[i32], dst: &mut [i16], dst_stride: usize);
/// Quantize, recording grid deltas for sign-bit hiding
pub type QuantFn =
    fn(coef: &[i32], quant_coeff: &[i32], delta_u: &mut [i32], q_coef: &mut [i16], qbits: i32, add: i32) -> u32;
/// Quantize to magnitudes, keeping the scaled coefficients for RDOQ
pub type NquantFn =
    fn(coef: &[i32], quant_coeff: &[i32], scaled_coeff: &mut [i32], q_coef: &mut [i16], qbits: i32, add: i32) -> u32;
/// Dequantize with a uniform scale
pub type DequantNormalFn = fn(q_coef: &[i16], coef: &mut [i32], scale: i32, shift: i32);
/// Dequantize with a per-position scaling list
pub type DequantScalingFn =
    fn(q_coef: &[i16], dequant_coeff: &[i32], coef: &mut [i32], per: i32, shift: i32);
/// Widen a strided 16-bit block into a tight 32-bit block with a left shift
pub type Cvt16to32ShlFn = fn(dst: &mut [i32], src: &[i16], src_stride: usize, shift: i32, size: usize);
/// Narrow a tight 32-bit block into a strided 16-bit block with a rounded right shift
pub type Cvt32to16ShrFn = fn(dst: &mut [i16], src: &[i32], dst_stride: usize, shift: i32, size: usize);
/// Copy a strided pixel block into a strided 16-bit block
pub type CopyPsFn = fn(dst: &mut [i16], dst_stride: usize, src: &[u16], src_stride: usize);
/// Fill a strided 16-bit block with a value
pub type BlockFillFn = fn(dst: &mut [i16], stride: usize, val: i16);
/// Count nonzero entries of a coefficient block
pub type CountNonzeroFn = fn(q_coef: &[i16]) -> u32;

/// Kernel dispatch table
///
/// Entries are plain function pointers; replace any of them to install an
/// optimized variant.
#[derive(Clone)]
pub struct Primitives {
    pub dct: [DctFn; NUM_TR_KERNELS],
    pub idct: [IdctFn; NUM_TR_KERNELS],
    pub quant: QuantFn,
    pub nquant: NquantFn,
    pub dequant_normal: DequantNormalFn,
    pub dequant_scaling: DequantScalingFn,
    pub cvt16to32_shl: Cvt16to32ShlFn,
    pub cvt32to16_shr: Cvt32to16ShrFn,
    pub square_copy_ps: [CopyPsFn; NUM_SQUARE_BLOCKS],
    pub blockfill_s: [BlockFillFn; NUM_SQUARE_BLOCKS],
    pub count_nonzero: CountNonzeroFn,
}

impl Primitives {
    /// Scalar reference kernels for the given bit depth
    pub fn scalar(bit_depth: u32) -> Result<Self> {
        match bit_depth {
            8 => Ok(Self::scalar_for::<8>()),
            10 => Ok(Self::scalar_for::<10>()),
            12 => Ok(Self::scalar_for::<12>()),
            _ => Err(Error::config(format!("Invalid bit depth: {}", bit_depth))),
        }
    }

    fn scalar_for<const BD: u32>() -> Self {
        Primitives {
            dct: [
                dst_c::<BD>,
                dct_c::<4, BD>,
                dct_c::<8, BD>,
                dct_c::<16, BD>,
                dct_c::<32, BD>,
            ],
            idct: [
                idst_c::<BD>,
                idct_c::<4, BD>,
                idct_c::<8, BD>,
                idct_c::<16, BD>,
                idct_c::<32, BD>,
            ],
            quant: quant_c,
            nquant: nquant_c,
            dequant_normal: dequant_normal_c,
            dequant_scaling: dequant_scaling_c,
            cvt16to32_shl: cvt16to32_shl_c,
            cvt32to16_shr: cvt32to16_shr_c,
            square_copy_ps: [
                square_copy_ps_c::<4>,
                square_copy_ps_c::<8>,
                square_copy_ps_c::<16>,
                square_copy_ps_c::<32>,
            ],
            blockfill_s: [
                blockfill_s_c::<4>,
                blockfill_s_c::<8>,
                blockfill_s_c::<16>,
                blockfill_s_c::<32>,
            ],
            count_nonzero: count_nonzero_c,
        }
    }
}

fn quant_c(
    coef: &[i32],
    quant_coeff: &[i32],
    delta_u: &mut [i32],
    q_coef: &mut [i16],
    qbits: i32,
    add: i32,
) -> u32 {
    let qbits8 = qbits - 8;
    let mut num_sig = 0u32;
    for (i, &c) in coef.iter().enumerate() {
        let sign = if c < 0 { -1 } else { 1 };
        let tmp = c.abs() * quant_coeff[i];
        let level = (tmp + add) >> qbits;
        delta_u[i] = (tmp - (level << qbits)) >> qbits8;
        if level != 0 {
            num_sig += 1;
        }
        q_coef[i] = (level * sign).clamp(-32768, 32767) as i16;
    }
    num_sig
}

fn nquant_c(
    coef: &[i32],
    quant_coeff: &[i32],
    scaled_coeff: &mut [i32],
    q_coef: &mut [i16],
    qbits: i32,
    add: i32,
) -> u32 {
    let mut num_sig = 0u32;
    for (i, &c) in coef.iter().enumerate() {
        let tmp = c.abs() * quant_coeff[i];
        scaled_coeff[i] = tmp;
        let level = (tmp + add) >> qbits;
        if level != 0 {
            num_sig += 1;
        }
        q_coef[i] = level.min(32767) as i16;
    }
    num_sig
}

fn dequant_normal_c(q_coef: &[i16], coef: &mut [i32], scale: i32, shift: i32) {
    let add = 1i64 << (shift - 1);
    for (i, &q) in q_coef.iter().enumerate() {
        let v = (i64::from(q) * i64::from(scale) + add) >> shift;
        coef[i] = v.clamp(-32768, 32767) as i32;
    }
}

fn dequant_scaling_c(q_coef: &[i16], dequant_coeff: &[i32], coef: &mut [i32], per: i32, shift: i32) {
    // dequant coefficients carry the 16x scaling-list gain
    let shift = shift + 4;
    if shift > per {
        let add = 1i64 << (shift - per - 1);
        for (i, &q) in q_coef.iter().enumerate() {
            let v = (i64::from(q) * i64::from(dequant_coeff[i]) + add) >> (shift - per);
            coef[i] = v.clamp(-32768, 32767) as i32;
        }
    } else {
        for (i, &q) in q_coef.iter().enumerate() {
            let v = (i64::from(q) * i64::from(dequant_coeff[i])).clamp(-32768, 32767);
            coef[i] = (v << (per - shift)).clamp(-32768, 32767) as i32;
        }
    }
}

fn cvt16to32_shl_c(dst: &mut [i32], src: &[i16], src_stride: usize, shift: i32, size: usize) {
    for j in 0..size {
        for i in 0..size {
            dst[j * size + i] = i32::from(src[j * src_stride + i]) << shift;
        }
    }
}

fn cvt32to16_shr_c(dst: &mut [i16], src: &[i32], dst_stride: usize, shift: i32, size: usize) {
    let round = 1i32 << (shift - 1);
    for j in 0..size {
        for i in 0..size {
            dst[j * dst_stride + i] = ((src[j * size + i] + round) >> shift) as i16;
        }
    }
}

fn square_copy_ps_c<const N: usize>(dst: &mut [i16], dst_stride: usize, src: &[u16], src_stride: usize) {
    for j in 0..N {
        for i in 0..N {
            dst[j * dst_stride + i] = src[j * src_stride + i] as i16;
        }
    }
}

fn blockfill_s_c<const N: usize>(dst: &mut [i16], stride: usize, val: i16) {
    for j in 0..N {
        dst[j * stride..j * stride + N].fill(val);
    }
}

fn count_nonzero_c(q_coef: &[i16]) -> u32 {
    q_coef.iter().filter(|&&c| c != 0).count() as u32
}
