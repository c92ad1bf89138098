//! CABAC bit-cost estimates and context derivation
//!
//! The entropy coder proper lives outside this crate; quantization only
//! needs to know what each syntax element would cost. [`EstBits`] is a
//! per-channel snapshot of those costs, scaled so one bit equals `1 << 15`
//! units. The context derivation functions mirror the coder's context
//! selection so costs are read from the right slots.

use crate::quant::IEP_RATE;

/// Significance-map contexts for one channel (luma uses all 27)
pub const NUM_SIG_FLAG_CTX: usize = 27;
/// Significant-CG contexts for one channel
pub const NUM_SIG_CG_FLAG_CTX: usize = 2;
/// Greater-than-one contexts for one channel (luma uses all 16)
pub const NUM_ONE_FLAG_CTX: usize = 16;
/// Greater-than-two context slots (4 luma + 2 spare; the quantizer's
/// `ctxSet + c2` arithmetic can form indices whose costs are never read)
pub const NUM_ABS_FLAG_CTX: usize = 6;
/// Last-position coordinate groups
pub const NUM_LAST_GROUPS: usize = 10;
/// Coded-block-flag contexts
pub const NUM_QT_CBF_CTX: usize = 5;
/// Root coded-block-flag contexts
pub const NUM_QT_ROOT_CBF_CTX: usize = 1;

/// Per-channel snapshot of CABAC bit costs
///
/// Indexing is `[context][binary value]` except for the last-position
/// tables, which hold the accumulated prefix cost per coordinate group.
/// All costs are in `1 bit = 1 << 15` units.
#[derive(Debug, Clone)]
pub struct EstBits {
    pub significant_bits: [[i32; 2]; NUM_SIG_FLAG_CTX],
    pub significant_coeff_group_bits: [[i32; 2]; NUM_SIG_CG_FLAG_CTX],
    pub greater_one_bits: [[i32; 2]; NUM_ONE_FLAG_CTX],
    pub level_abs_bits: [[i32; 2]; NUM_ABS_FLAG_CTX],
    pub last_x_bits: [i32; NUM_LAST_GROUPS],
    pub last_y_bits: [i32; NUM_LAST_GROUPS],
    pub block_cbp_bits: [[i32; 2]; NUM_QT_CBF_CTX],
    pub block_root_cbp_bits: [[i32; 2]; NUM_QT_ROOT_CBF_CTX],
}

impl EstBits {
    /// Uninformed snapshot: every context bin costs exactly one bit
    ///
    /// Last-position prefixes cost one bit per group step, matching their
    /// truncated-unary binarization. Useful before the entropy coder has
    /// published adapted estimates, and as a deterministic test fixture.
    pub fn uniform() -> Self {
        let bit = IEP_RATE;
        let mut last_x = [0i32; NUM_LAST_GROUPS];
        let mut last_y = [0i32; NUM_LAST_GROUPS];
        for g in 0..NUM_LAST_GROUPS {
            last_x[g] = (g as i32 + 1) * bit;
            last_y[g] = (g as i32 + 1) * bit;
        }
        EstBits {
            significant_bits: [[bit; 2]; NUM_SIG_FLAG_CTX],
            significant_coeff_group_bits: [[bit; 2]; NUM_SIG_CG_FLAG_CTX],
            greater_one_bits: [[bit; 2]; NUM_ONE_FLAG_CTX],
            level_abs_bits: [[bit; 2]; NUM_ABS_FLAG_CTX],
            last_x_bits: last_x,
            last_y_bits: last_y,
            block_cbp_bits: [[bit; 2]; NUM_QT_CBF_CTX],
            block_root_cbp_bits: [[bit; 2]; NUM_QT_ROOT_CBF_CTX],
        }
    }
}

impl Default for EstBits {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Neighbor significance pattern for a coefficient group
///
/// Reads the significance flags of the CGs to the right of and below
/// `(cg_x, cg_y)`, guarding the block edges. Returns `right + 2 * below`
/// packed as 0..3.
pub fn calc_pattern_sig_ctx(sig_coeff_group_flags: u64, cg_x: u32, cg_y: u32, log2_tr_size_cg: u32) -> u32 {
    if log2_tr_size_cg == 0 {
        return 0;
    }
    let tr_size_cg = 1u32 << log2_tr_size_cg;
    debug_assert!(tr_size_cg <= 8, "transform CG is too large");
    let sig_pos = (sig_coeff_group_flags >> (1 + (cg_y << log2_tr_size_cg) + cg_x)) as u32;
    let sig_right = if cg_x < tr_size_cg - 1 { sig_pos & 1 } else { 0 };
    let sig_lower = if cg_y < tr_size_cg - 1 {
        (sig_pos >> (tr_size_cg - 2)) & 2
    } else {
        0
    };
    sig_right + sig_lower
}

/// Context of the significant-CG flag at `(cg_x, cg_y)`
pub fn sig_coeff_group_ctx(sig_coeff_group_flags: u64, cg_x: u32, cg_y: u32, log2_tr_size_cg: u32) -> u32 {
    let tr_size_cg = 1u32 << log2_tr_size_cg;
    debug_assert!(tr_size_cg <= 8, "transform size too large");
    let sig_pos = (sig_coeff_group_flags >> (1 + (cg_y << log2_tr_size_cg) + cg_x)) as u32;
    let sig_right = if cg_x < tr_size_cg - 1 { sig_pos } else { 0 };
    let sig_lower = if cg_y < tr_size_cg - 1 {
        sig_pos >> (tr_size_cg - 1)
    } else {
        0
    };
    (sig_right | sig_lower) & 1
}

/// Fixed significance context map for 4×4 blocks
const CTX_IND_MAP_4X4: [u8; 16] = [
    0, 1, 4, 5, //
    2, 3, 4, 5, //
    6, 6, 8, 8, //
    7, 7, 8, 8,
];

/// Per-pattern context counts inside a CG, `[pattern][x & 3][y & 3]`
const TABLE_CNT: [[[u8; 4]; 4]; 4] = [
    [
        [2, 1, 1, 0],
        [1, 1, 0, 0],
        [1, 0, 0, 0],
        [0, 0, 0, 0],
    ],
    [
        [2, 1, 0, 0],
        [2, 1, 0, 0],
        [2, 1, 0, 0],
        [2, 1, 0, 0],
    ],
    [
        [2, 2, 2, 2],
        [1, 1, 1, 1],
        [0, 0, 0, 0],
        [0, 0, 0, 0],
    ],
    [
        [2, 2, 2, 2],
        [2, 2, 2, 2],
        [2, 2, 2, 2],
        [2, 2, 2, 2],
    ],
];

/// Context of the significant-coefficient flag at `blk_pos`
pub fn sig_ctx_inc(
    pattern_sig_ctx: u32,
    log2_tr_size: u32,
    tr_size: u32,
    blk_pos: u32,
    is_luma: bool,
    first_significance_map_context: u32,
) -> u32 {
    if blk_pos == 0 {
        // DC has its own context
        return 0;
    }
    if log2_tr_size == 2 {
        return u32::from(CTX_IND_MAP_4X4[blk_pos as usize]);
    }

    let pos_y = blk_pos >> log2_tr_size;
    let pos_x = blk_pos & (tr_size - 1);
    let pos_x_in_subset = (blk_pos & 3) as usize;
    let pos_y_in_subset = (pos_y & 3) as usize;

    let cnt = u32::from(TABLE_CNT[pattern_sig_ctx as usize][pos_x_in_subset][pos_y_in_subset]);
    let offset = first_significance_map_context + cnt;

    // note the bitwise OR: any coordinate >= 4 leaves the top-left CG
    if is_luma && (pos_x | pos_y) >= 4 {
        3 + offset
    } else {
        offset
    }
}

/// Context of the coded-block flag for a TU
pub fn ctx_qt_cbf(is_luma: bool, tu_depth: u32) -> u32 {
    if is_luma {
        u32::from(tu_depth == 0)
    } else {
        tu_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_costs_one_bit() {
        let est = EstBits::uniform();
        assert_eq!(est.significant_bits[0][0], 1 << 15);
        assert_eq!(est.significant_bits[26][1], 1 << 15);
        assert_eq!(est.last_x_bits[0], 1 << 15);
        assert_eq!(est.last_x_bits[9], 10 << 15);
    }

    #[test]
    fn test_pattern_sig_ctx_4x4_is_zero() {
        assert_eq!(calc_pattern_sig_ctx(u64::MAX, 0, 0, 0), 0);
    }

    #[test]
    fn test_pattern_sig_ctx_neighbors() {
        // 8x8 block: 2x2 CG grid, bit layout y*2 + x
        // right neighbor of (0,0) is bit 1, lower neighbor is bit 2
        assert_eq!(calc_pattern_sig_ctx(0b0010, 0, 0, 1), 1);
        assert_eq!(calc_pattern_sig_ctx(0b0100, 0, 0, 1), 2);
        assert_eq!(calc_pattern_sig_ctx(0b0110, 0, 0, 1), 3);
        assert_eq!(calc_pattern_sig_ctx(0, 0, 0, 1), 0);
    }

    #[test]
    fn test_pattern_sig_ctx_edge_guards() {
        // bottom-right CG has no neighbors regardless of the bitmap
        assert_eq!(calc_pattern_sig_ctx(u64::MAX, 1, 1, 1), 0);
        // right edge: only the lower neighbor can contribute
        assert_eq!(calc_pattern_sig_ctx(u64::MAX, 1, 0, 1), 2);
    }

    #[test]
    fn test_pattern_sig_ctx_32x32() {
        // 8x8 CG grid: right neighbor of (2,3) is bit 3*8+3 = 27
        assert_eq!(calc_pattern_sig_ctx(1 << 27, 2, 3, 3), 1);
        // lower neighbor is bit 4*8+2 = 34
        assert_eq!(calc_pattern_sig_ctx(1 << 34, 2, 3, 3), 2);
    }

    #[test]
    fn test_sig_coeff_group_ctx() {
        assert_eq!(sig_coeff_group_ctx(0, 0, 0, 1), 0);
        assert_eq!(sig_coeff_group_ctx(0b0010, 0, 0, 1), 1);
        assert_eq!(sig_coeff_group_ctx(0b0100, 0, 0, 1), 1);
        assert_eq!(sig_coeff_group_ctx(u64::MAX, 1, 1, 1), 0);
    }

    #[test]
    fn test_sig_ctx_inc_dc() {
        assert_eq!(sig_ctx_inc(3, 5, 32, 0, true, 21), 0);
    }

    #[test]
    fn test_sig_ctx_inc_4x4_uses_map() {
        assert_eq!(sig_ctx_inc(0, 2, 4, 1, true, 0), 1);
        assert_eq!(sig_ctx_inc(0, 2, 4, 15, true, 0), 8);
        assert_eq!(sig_ctx_inc(0, 2, 4, 6, false, 0), 4);
    }

    #[test]
    fn test_sig_ctx_inc_luma_outside_first_cg() {
        // 8x8, position (4, 0): first CG along x is left behind
        let ctx = sig_ctx_inc(0, 3, 8, 4, true, 9);
        // pattern 0, in-subset (0,0) -> cnt 2, plus luma offset 3
        assert_eq!(ctx, 9 + 2 + 3);
        // chroma never takes the offset
        let ctx = sig_ctx_inc(0, 3, 8, 4, false, 9);
        assert_eq!(ctx, 9 + 2);
    }

    #[test]
    fn test_sig_ctx_inc_pattern_shapes() {
        // pattern 1 (right CG significant) keys off the y coordinate only
        for x in 0..4u32 {
            let blk_pos = 5 * 16 + x; // in-subset (x, 1) in a 16x16 block
            let ctx = sig_ctx_inc(1, 4, 16, blk_pos, false, 12);
            assert_eq!(ctx, 12 + 1);
        }
        // pattern 2 (lower CG significant) keys off the x coordinate only
        for y in 0..4u32 {
            let blk_pos = (y + 4) * 16 + 1; // in-subset (1, y)
            let ctx = sig_ctx_inc(2, 4, 16, blk_pos, false, 12);
            assert_eq!(ctx, 12 + 1);
        }
        // pattern 3 is flat
        let ctx = sig_ctx_inc(3, 4, 16, 16 * 5 + 7, false, 12);
        assert_eq!(ctx, 12 + 2);
    }

    #[test]
    fn test_ctx_qt_cbf() {
        assert_eq!(ctx_qt_cbf(true, 0), 1);
        assert_eq!(ctx_qt_cbf(true, 2), 0);
        assert_eq!(ctx_qt_cbf(false, 0), 0);
        assert_eq!(ctx_qt_cbf(false, 3), 3);
    }
}
