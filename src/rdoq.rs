//! Rate-distortion optimized quantization
//!
//! Plain quantization rounds every coefficient to the nearest grid point.
//! RDOQ instead walks the block in reverse scan order and picks each level
//! to minimize `D + lambda * R`, where distortion is measured on the scaled
//! integer coefficients and the rate comes from the CABAC bit estimates:
//! significance flags, greater-1/greater-2 flags, and the Go-Rice /
//! exp-Golomb remainder. On top of the per-coefficient choice it tries
//! zeroing whole coefficient groups, re-selects the last significant
//! position, and finishes with a rate-aware sign-bit-hiding pass.

use crate::cabac::{calc_pattern_sig_ctx, ctx_qt_cbf, sig_coeff_group_ctx, sig_ctx_inc, EstBits};
use crate::quant::{
    scaling_list_type, Quant, TuInfo, IEP_RATE, MAX_TR_SIZE, QUANT_IQUANT_SHIFT, QUANT_SHIFT,
    SBH_THRESHOLD, SCALE_BITS,
};
use crate::scaling::INV_QUANT_SCALES;
use crate::scan::{group_idx, ScanPattern, LOG2_SCAN_SET_SIZE, MLS_GRP_NUM, SCAN_SET_SIZE};

const MAX_COEFFS: usize = MAX_TR_SIZE * MAX_TR_SIZE;

/// Escape threshold of the Go-Rice binarization, in prefix units
const COEF_REMAIN_BIN_REDUCTION: u32 = 3;
/// Coefficients per context set that may use the greater-1 flag
const C1FLAG_NUMBER: u32 = 8;
/// Largest remainder codable without exp-Golomb escape, per Rice parameter
const G_GO_RICE_RANGE: [u32; 5] = [7, 14, 26, 46, 78];
/// Base level at which the Rice remainder starts, keyed by `c1c2Idx`
const BASE_LEVEL: [u32; 4] = [1, 2, 1, 3];

/// Per-CG cost accumulators for the all-zero trial
#[derive(Default)]
struct CoeffGroupRdStats {
    nnz_before_pos0: u32,
    /// distortion and level cost of the coded nonzero levels
    coded_level_and_dist: f64,
    /// distortion if every nonzero level were reset to zero
    uncoded_dist: f64,
    sig_cost: f64,
    sig_cost0: f64,
}

/// Rate of an absolute level in bit-estimate units
fn get_ic_rate(
    abs_level: u32,
    diff_level: i32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    abs_go_rice: u32,
    c1c2_idx: u32,
) -> i32 {
    debug_assert!(c1c2_idx <= 3, "c1c2Idx check failure");
    debug_assert!(abs_go_rice <= 4, "goRice check failure");
    if abs_level == 0 {
        debug_assert!(diff_level < 0, "diffLevel check failure");
        return 0;
    }
    let mut rate = 0i32;

    if diff_level < 0 {
        debug_assert!(abs_level <= 2, "absLevel check failure");
        rate += greater_one_bits[usize::from(abs_level == 2)];
        if abs_level == 2 {
            rate += level_abs_bits[0];
        }
    } else {
        let mut symbol = diff_level as u32;
        let max_vlc = G_GO_RICE_RANGE[abs_go_rice as usize];

        if symbol > max_vlc {
            // exp-Golomb escape on the part beyond the Rice range
            let excess = symbol - max_vlc;
            let size = 31 - excess.leading_zeros();
            rate += ((size * 2 + 1) as i32) << 15;
            symbol = max_vlc + 1;
        }

        let pref_len = (symbol >> abs_go_rice) + 1;
        let num_bins = (pref_len + abs_go_rice).min(8);
        rate += (num_bins as i32) << 15;

        if c1c2_idx & 1 != 0 {
            rate += greater_one_bits[1];
        }
        if c1c2_idx == 3 {
            rate += level_abs_bits[1];
        }
    }
    rate
}

/// Rate of a candidate level during the search, sign bin included
fn get_ic_rate_cost(
    abs_level: u32,
    diff_level: i32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    abs_go_rice: u32,
    c1c2_idx: u32,
) -> i32 {
    debug_assert!(abs_level != 0, "absLevel should not be zero");
    let mut rate = IEP_RATE;

    if diff_level < 0 {
        debug_assert!(abs_level <= 2, "absLevel range check failure");
        rate += greater_one_bits[usize::from(abs_level == 2)];
        if abs_level == 2 {
            rate += level_abs_bits[0];
        }
    } else {
        let symbol = diff_level as u32;
        let prefix = symbol >> abs_go_rice;
        if prefix < COEF_REMAIN_BIN_REDUCTION {
            rate += ((prefix + 1 + abs_go_rice) as i32) << 15;
        } else {
            let excess = prefix - COEF_REMAIN_BIN_REDUCTION;
            let mut length = 0u32;
            if excess != 0 {
                length = 31 - (excess + 1).leading_zeros();
            }
            rate += ((COEF_REMAIN_BIN_REDUCTION + length + abs_go_rice + 1 + length) as i32) << 15;
        }
        if c1c2_idx & 1 != 0 {
            rate += greater_one_bits[1];
        }
        if c1c2_idx == 3 {
            rate += level_abs_bits[1];
        }
    }
    rate
}

/// Bit cost of signaling the last significant position
fn rate_last(est: &EstBits, pos_x: u32, pos_y: u32) -> i32 {
    let ctx_x = group_idx(pos_x);
    let ctx_y = group_idx(pos_y);
    let mut cost = est.last_x_bits[ctx_x as usize] + est.last_y_bits[ctx_y as usize];
    // groups past 2 carry fixed-length bypass suffixes
    if pos_x > 2 {
        cost += IEP_RATE * ((ctx_x as i32 - 2) >> 1);
    }
    if pos_y > 2 {
        cost += IEP_RATE * ((ctx_y as i32 - 2) >> 1);
    }
    cost
}

/// Psy-rdoq bias: favors levels that keep reconstructed AC energy
struct PsyEval {
    psy_scale: u64,
    sign_coef: i32,
    predicted_coef: i32,
    unquant_scale: i32,
    unquant_shift: i32,
    unquant_round: i32,
    scale_bits: i32,
}

impl PsyEval {
    fn value(&self, lvl: u32) -> i64 {
        let unquant_abs = (i64::from(lvl) * i64::from(self.unquant_scale)
            + i64::from(self.unquant_round))
            >> self.unquant_shift;
        let predicted = if self.sign_coef < 0 {
            -self.predicted_coef
        } else {
            self.predicted_coef
        };
        let recon = (unquant_abs + i64::from(predicted)).abs() << self.scale_bits;
        ((self.psy_scale as i64) * recon) >> 8
    }
}

/// Search the two candidate levels for one coefficient
///
/// Tries `maxAbsLevel` and `maxAbsLevel - 1` (floored at 1) and keeps the
/// cheaper of distortion plus lambda-scaled significance and level rate,
/// updating `level`, `cost_coeff`, and `cost_sig` when it improves on the
/// incoming values.
#[allow(clippy::too_many_arguments)]
fn rdo_coded_level(
    level: &mut u32,
    cost_coeff: &mut f64,
    cost_sig: &mut f64,
    level_double: i32,
    max_abs_level: u32,
    qbits: i32,
    scale_factor: f64,
    lambda2: f64,
    cur_cost_sig_bits: i32,
    base_level: u32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    go_rice_param: u32,
    c1c2_idx: u32,
    psy: Option<&PsyEval>,
) {
    let min_abs_level = max_abs_level.saturating_sub(1).max(1);
    *level = 0;
    for lvl in (min_abs_level..=max_abs_level).rev() {
        let err = i64::from(level_double) - (i64::from(lvl) << qbits);
        let err2 = (err * err) as f64;
        let rate_cost = get_ic_rate_cost(
            lvl,
            lvl as i32 - base_level as i32,
            greater_one_bits,
            level_abs_bits,
            go_rice_param,
            c1c2_idx,
        );
        let mut cur_cost =
            err2 * scale_factor + lambda2 * f64::from(cur_cost_sig_bits + rate_cost);
        if let Some(psy) = psy {
            cur_cost -= psy.value(lvl) as f64;
        }
        if cur_cost < *cost_coeff {
            *level = lvl;
            *cost_coeff = cur_cost;
            *cost_sig = lambda2 * f64::from(cur_cost_sig_bits);
        }
    }
}

impl Quant {
    /// Rate-distortion optimized quantization of the transformed block
    ///
    /// `dst_coeff` receives signed levels; the return value is the nonzero
    /// count. The engine's lambda, bit estimates, and QPs must be current.
    pub(crate) fn rdo_quant(&self, tu: &TuInfo, dst_coeff: &mut [i16], log2_tr_size: u32) -> u32 {
        let tr_size = 1u32 << log2_tr_size;
        let transform_shift = self.transform_shift(log2_tr_size);
        let list = scaling_list_type(tu.is_intra, tu.text_type);
        let ttype = tu.text_type.index();
        let rem = self.qp_param[ttype].rem as usize;
        let per = self.qp_param[ttype].per;
        let qbits = QUANT_SHIFT + per + transform_shift;
        let add = 1i32 << (qbits - 1);
        let size_idx = log2_tr_size as usize - 2;
        let num_coeff = 1usize << (log2_tr_size * 2);
        let is_luma = tu.text_type.is_luma();

        let mut scaled_coeff = [0i32; MAX_COEFFS];
        let quant_coef = self.scaling.quant_coef(size_idx, list, rem);
        let num_sig = (self.primitives.nquant)(
            &self.resi_dct[..num_coeff],
            quant_coef,
            &mut scaled_coeff[..num_coeff],
            dst_coeff,
            qbits,
            add,
        );
        debug_assert_eq!(
            num_sig,
            (self.primitives.count_nonzero)(dst_coeff),
            "numSig disagrees with recount"
        );
        if num_sig == 0 {
            return 0;
        }

        let lambda2 = self.lambda2[ttype];
        let est = &self.est_bits;
        let err_scale = self.scaling.err_scale(size_idx, list, rem);

        // unquant constants for psy-rdoq
        let use_psy = self.psy_rdoq_scale != 0 && is_luma;
        let unquant_shift = QUANT_IQUANT_SHIFT - QUANT_SHIFT - transform_shift;
        let unquant_round = (1i32 << unquant_shift) - 1;
        let unquant_scale = INV_QUANT_SCALES[rem] << per;
        let scale_bits = SCALE_BITS - 2 * transform_shift;

        let mut block_uncoded_cost = 0f64;
        let mut cost_coeff = [0f64; MAX_COEFFS];
        let mut cost_sig = [0f64; MAX_COEFFS];
        let mut cost_coeff0 = [0f64; MAX_COEFFS];

        // bookkeeping for the final sign-hiding pass
        let mut rate_inc_up = [0i32; MAX_COEFFS];
        let mut rate_inc_down = [0i32; MAX_COEFFS];
        let mut sig_rate_delta = [0i32; MAX_COEFFS];
        let mut delta_u = [0i32; MAX_COEFFS];

        let mut cost_coeff_group_sig = [0f64; MLS_GRP_NUM];
        let mut sig_coeff_group_flag = 0u64;
        let mut ctx_set = 0u32;
        let mut c1 = 1i32;
        let mut c2 = 0i32;
        let mut base_cost = 0f64;
        let mut last_scan_pos = -1i32;
        let mut go_rice_param = 0u32;
        let mut c1_idx = 0u32;
        let mut c2_idx = 0u32;
        let mut cg_last_scan_pos = -1i32;

        let cp = self.coding_parameters(tu, log2_tr_size);
        let cg_num = 1usize << (cp.log2_tr_size_cg * 2);

        for cg_scan_pos in (0..cg_num).rev() {
            let cg_blk_pos = u32::from(cp.scan_cg[cg_scan_pos]);
            let cg_pos_y = cg_blk_pos >> cp.log2_tr_size_cg;
            let cg_pos_x = cg_blk_pos - (cg_pos_y << cp.log2_tr_size_cg);
            let cg_blk_pos_mask = 1u64 << cg_blk_pos;
            let mut rd_stats = CoeffGroupRdStats::default();

            let pattern_sig_ctx =
                calc_pattern_sig_ctx(sig_coeff_group_flag, cg_pos_x, cg_pos_y, cp.log2_tr_size_cg);

            for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                let scan_pos = (cg_scan_pos << LOG2_SCAN_SET_SIZE) + scan_pos_in_cg;
                let blk_pos = cp.scan[scan_pos] as usize;
                let scale_factor = err_scale[blk_pos];
                let level_double = scaled_coeff[blk_pos];
                let max_abs_level = dst_coeff[blk_pos].unsigned_abs() as u32;

                // distortion of coding this coefficient as zero
                cost_coeff0[scan_pos] =
                    (i64::from(level_double) * i64::from(level_double)) as f64 * scale_factor;
                block_uncoded_cost += cost_coeff0[scan_pos];

                if max_abs_level > 0 && last_scan_pos < 0 {
                    // first nonzero in reverse scan is the last position
                    last_scan_pos = scan_pos as i32;
                    ctx_set = if scan_pos < SCAN_SET_SIZE || !is_luma { 0 } else { 2 };
                    cg_last_scan_pos = cg_scan_pos as i32;
                }

                if last_scan_pos >= 0 {
                    let c1c2_idx =
                        u32::from(c1_idx < C1FLAG_NUMBER) + 2 * u32::from(c2_idx == 0);
                    let base_level = BASE_LEVEL[c1c2_idx as usize];

                    let one_ctx = (4 * ctx_set + c1 as u32) as usize;
                    let abs_ctx = (ctx_set + c2 as u32) as usize;
                    let greater_one_bits = &est.greater_one_bits[one_ctx];
                    let level_abs_bits = &est.level_abs_bits[abs_ctx];

                    let mut level = 0u32;
                    cost_coeff[scan_pos] = f64::MAX;

                    if scan_pos as i32 == last_scan_pos {
                        // the last coefficient pays no significance bit
                        rdo_coded_level(
                            &mut level,
                            &mut cost_coeff[scan_pos],
                            &mut cost_sig[scan_pos],
                            level_double,
                            max_abs_level,
                            qbits,
                            scale_factor,
                            lambda2,
                            0,
                            base_level,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                            self.psy_eval(use_psy, blk_pos, unquant_scale, unquant_shift, unquant_round, scale_bits)
                                .as_ref(),
                        );
                        sig_rate_delta[blk_pos] = 0;
                    } else {
                        let ctx_sig = sig_ctx_inc(
                            pattern_sig_ctx,
                            log2_tr_size,
                            tr_size,
                            blk_pos as u32,
                            is_luma,
                            cp.first_significance_map_context,
                        ) as usize;
                        if max_abs_level < 3 {
                            cost_sig[scan_pos] =
                                lambda2 * f64::from(est.significant_bits[ctx_sig][0]);
                            cost_coeff[scan_pos] = cost_coeff0[scan_pos] + cost_sig[scan_pos];
                        }
                        if max_abs_level != 0 {
                            rdo_coded_level(
                                &mut level,
                                &mut cost_coeff[scan_pos],
                                &mut cost_sig[scan_pos],
                                level_double,
                                max_abs_level,
                                qbits,
                                scale_factor,
                                lambda2,
                                est.significant_bits[ctx_sig][1],
                                base_level,
                                greater_one_bits,
                                level_abs_bits,
                                go_rice_param,
                                c1c2_idx,
                                self.psy_eval(use_psy, blk_pos, unquant_scale, unquant_shift, unquant_round, scale_bits)
                                    .as_ref(),
                            );
                        }
                        sig_rate_delta[blk_pos] =
                            est.significant_bits[ctx_sig][1] - est.significant_bits[ctx_sig][0];
                    }

                    delta_u[blk_pos] = ((i64::from(level_double)
                        - (i64::from(level) << qbits))
                        >> (qbits - 8)) as i32;
                    dst_coeff[blk_pos] = level as i16;
                    base_cost += cost_coeff[scan_pos];

                    if level > 0 {
                        let rate_now = get_ic_rate(
                            level,
                            level as i32 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        );
                        rate_inc_up[blk_pos] = get_ic_rate(
                            level + 1,
                            level as i32 + 1 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        ) - rate_now;
                        rate_inc_down[blk_pos] = get_ic_rate(
                            level - 1,
                            level as i32 - 1 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        ) - rate_now;
                    } else {
                        rate_inc_up[blk_pos] = greater_one_bits[0];
                        rate_inc_down[blk_pos] = 0;
                    }

                    // update the CABAC estimation state
                    if level >= base_level && go_rice_param < 4 && level > (3 << go_rice_param) {
                        go_rice_param += 1;
                    }
                    c1_idx += u32::from(level > 0);
                    if level > 1 {
                        c1 = 0;
                        c2 = (c2 + 1).min(2);
                        c2_idx += 1;
                    } else if (1..3).contains(&c1) && level > 0 {
                        c1 += 1;
                    }

                    // context set changes at each CG boundary
                    if scan_pos % SCAN_SET_SIZE == 0 && scan_pos > 0 {
                        c2 = 0;
                        go_rice_param = 0;
                        c1_idx = 0;
                        c2_idx = 0;
                        ctx_set = if scan_pos == SCAN_SET_SIZE || !is_luma { 0 } else { 2 };
                        debug_assert!(c1 >= 0, "c1 is negative");
                        if c1 == 0 {
                            ctx_set += 1;
                        }
                        c1 = 1;
                    }
                } else {
                    // before the last nonzero: nothing is coded here
                    cost_coeff[scan_pos] = 0.0;
                    base_cost += cost_coeff0[scan_pos];
                }

                rd_stats.sig_cost += cost_sig[scan_pos];
                if scan_pos_in_cg == 0 {
                    rd_stats.sig_cost0 = cost_sig[scan_pos];
                }
                if dst_coeff[blk_pos] != 0 {
                    sig_coeff_group_flag |= cg_blk_pos_mask;
                    rd_stats.coded_level_and_dist += cost_coeff[scan_pos] - cost_sig[scan_pos];
                    rd_stats.uncoded_dist += cost_coeff0[scan_pos];
                    if scan_pos_in_cg != 0 {
                        rd_stats.nnz_before_pos0 += 1;
                    }
                }
            }

            // summarize the coefficient group
            if cg_last_scan_pos >= 0 {
                cost_coeff_group_sig[cg_scan_pos] = 0.0;
                if cg_scan_pos > 0 {
                    if sig_coeff_group_flag & cg_blk_pos_mask == 0 {
                        // swap per-coefficient sig costs for one CG-off flag
                        let ctx_sig = sig_coeff_group_ctx(
                            sig_coeff_group_flag,
                            cg_pos_x,
                            cg_pos_y,
                            cp.log2_tr_size_cg,
                        ) as usize;
                        let off_cost =
                            lambda2 * f64::from(est.significant_coeff_group_bits[ctx_sig][0]);
                        base_cost += off_cost - rd_stats.sig_cost;
                        cost_coeff_group_sig[cg_scan_pos] = off_cost;
                    } else if (cg_scan_pos as i32) < cg_last_scan_pos {
                        // the last CG is handled with the last position below
                        if rd_stats.nnz_before_pos0 == 0 {
                            base_cost -= rd_stats.sig_cost0;
                            rd_stats.sig_cost -= rd_stats.sig_cost0;
                        }

                        let mut cost_zero_cg = base_cost;
                        let ctx_sig = sig_coeff_group_ctx(
                            sig_coeff_group_flag,
                            cg_pos_x,
                            cg_pos_y,
                            cp.log2_tr_size_cg,
                        ) as usize;
                        let on_cost =
                            lambda2 * f64::from(est.significant_coeff_group_bits[ctx_sig][1]);
                        let off_cost =
                            lambda2 * f64::from(est.significant_coeff_group_bits[ctx_sig][0]);
                        base_cost += on_cost;
                        cost_zero_cg += off_cost;
                        cost_coeff_group_sig[cg_scan_pos] = on_cost;

                        // cost if this CG were coded all-zero
                        cost_zero_cg += rd_stats.uncoded_dist;
                        cost_zero_cg -= rd_stats.coded_level_and_dist;
                        cost_zero_cg -= rd_stats.sig_cost;

                        if cost_zero_cg < base_cost {
                            sig_coeff_group_flag &= !cg_blk_pos_mask;
                            base_cost = cost_zero_cg;
                            cost_coeff_group_sig[cg_scan_pos] = off_cost;
                            for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                                let scan_pos =
                                    (cg_scan_pos << LOG2_SCAN_SET_SIZE) + scan_pos_in_cg;
                                let blk_pos = cp.scan[scan_pos] as usize;
                                if dst_coeff[blk_pos] != 0 {
                                    cost_coeff[scan_pos] = cost_coeff0[scan_pos];
                                    cost_sig[scan_pos] = 0.0;
                                }
                                dst_coeff[blk_pos] = 0;
                            }
                        }
                    }
                } else {
                    // the DC CG never signals a group flag
                    sig_coeff_group_flag |= cg_blk_pos_mask;
                }
            }
        }

        if last_scan_pos < 0 {
            return 0;
        }

        // coded-block-flag baseline: compare against coding nothing at all
        let mut best_cost;
        if !tu.is_intra && is_luma && tu.tu_depth == 0 {
            best_cost = block_uncoded_cost + lambda2 * f64::from(est.block_root_cbp_bits[0][0]);
            base_cost += lambda2 * f64::from(est.block_root_cbp_bits[0][1]);
        } else {
            let ctx_cbf = ctx_qt_cbf(is_luma, tu.tu_depth) as usize;
            best_cost = block_uncoded_cost + lambda2 * f64::from(est.block_cbp_bits[ctx_cbf][0]);
            base_cost += lambda2 * f64::from(est.block_cbp_bits[ctx_cbf][1]);
        }

        // move the last position toward DC while it pays for itself
        let mut best_last_idx = 0usize;
        'last_search: for cg_scan_pos in (0..=cg_last_scan_pos as usize).rev() {
            let cg_blk_pos = u32::from(cp.scan_cg[cg_scan_pos]);
            base_cost -= cost_coeff_group_sig[cg_scan_pos];

            if sig_coeff_group_flag & (1u64 << cg_blk_pos) == 0 {
                continue;
            }
            for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                let scan_pos = (cg_scan_pos << LOG2_SCAN_SET_SIZE) + scan_pos_in_cg;
                if scan_pos as i32 > last_scan_pos {
                    continue;
                }
                let blk_pos = cp.scan[scan_pos] as usize;
                if dst_coeff[blk_pos] != 0 {
                    let pos_y = (blk_pos as u32) >> log2_tr_size;
                    let pos_x = blk_pos as u32 - (pos_y << log2_tr_size);
                    let cost_last = if cp.scan_type == ScanPattern::Vertical {
                        rate_last(est, pos_y, pos_x)
                    } else {
                        rate_last(est, pos_x, pos_y)
                    };
                    let total_cost = base_cost + lambda2 * f64::from(cost_last) - cost_sig[scan_pos];

                    if total_cost < best_cost {
                        best_last_idx = scan_pos + 1;
                        best_cost = total_cost;
                    }
                    if dst_coeff[blk_pos] > 1 {
                        // cannot profitably prune past a level above one
                        break 'last_search;
                    }
                    base_cost -= cost_coeff[scan_pos];
                    base_cost += cost_coeff0[scan_pos];
                } else {
                    base_cost -= cost_sig[scan_pos];
                }
            }
        }

        // re-apply DCT signs and count, then clear the pruned tail
        let mut num_sig = 0u32;
        for pos in 0..best_last_idx {
            let blk_pos = cp.scan[pos] as usize;
            let level = i32::from(dst_coeff[blk_pos]);
            num_sig += u32::from(level != 0);
            let mask = self.resi_dct[blk_pos] >> 31;
            dst_coeff[blk_pos] = ((level ^ mask) - mask) as i16;
        }
        for pos in best_last_idx..=last_scan_pos as usize {
            dst_coeff[cp.scan[pos] as usize] = 0;
        }

        if tu.sign_hide && num_sig >= 2 {
            // the scaling list is ignored in this optimization
            let inv_quant = i64::from(INV_QUANT_SCALES[rem]) << per;
            let rd_factor =
                ((inv_quant * inv_quant) as f64 / (lambda2 * 16.0) + 0.5) as i64;

            let mut last_cg = true;
            for sub_set in (0..=cg_last_scan_pos as usize).rev() {
                let sub_pos = sub_set << LOG2_SCAN_SET_SIZE;

                let Some(last_nz) = (0..SCAN_SET_SIZE)
                    .rev()
                    .find(|&n| dst_coeff[cp.scan[n + sub_pos] as usize] != 0)
                else {
                    continue;
                };
                let first_nz = (0..SCAN_SET_SIZE)
                    .find(|&n| dst_coeff[cp.scan[n + sub_pos] as usize] != 0)
                    .unwrap();

                if last_nz as i32 - first_nz as i32 >= SBH_THRESHOLD {
                    let sign_bit = u32::from(dst_coeff[cp.scan[sub_pos + first_nz] as usize] <= 0);
                    let mut abs_sum = 0i32;
                    for n in first_nz..=last_nz {
                        abs_sum += i32::from(dst_coeff[cp.scan[n + sub_pos] as usize]);
                    }

                    if sign_bit != (abs_sum as u32 & 1) {
                        let mut min_cost_inc = i64::MAX;
                        let mut min_pos = None;
                        let mut final_change = 0i32;

                        let start = if last_cg { last_nz } else { SCAN_SET_SIZE - 1 };
                        for n in (0..=start).rev() {
                            let blk_pos = cp.scan[n + sub_pos] as usize;
                            let mut cur_cost;
                            let cur_change;
                            if dst_coeff[blk_pos] != 0 {
                                let cost_up = rd_factor * i64::from(-delta_u[blk_pos])
                                    + i64::from(rate_inc_up[blk_pos]);
                                let mut cost_down = rd_factor * i64::from(delta_u[blk_pos])
                                    + i64::from(rate_inc_down[blk_pos])
                                    - if dst_coeff[blk_pos].abs() == 1 {
                                        i64::from(IEP_RATE + sig_rate_delta[blk_pos])
                                    } else {
                                        0
                                    };

                                if last_cg && last_nz == n && dst_coeff[blk_pos].abs() == 1 {
                                    // strongly favor dropping a trailing one
                                    cost_down -= i64::from(4 * IEP_RATE);
                                }

                                if cost_up < cost_down {
                                    cur_cost = cost_up;
                                    cur_change = 1;
                                } else if n == first_nz && dst_coeff[blk_pos].abs() == 1 {
                                    cur_cost = i64::MAX;
                                    cur_change = -1;
                                } else {
                                    cur_cost = cost_down;
                                    cur_change = -1;
                                }
                            } else {
                                cur_cost = rd_factor * i64::from(-delta_u[blk_pos].abs())
                                    + i64::from(IEP_RATE)
                                    + i64::from(rate_inc_up[blk_pos])
                                    + i64::from(sig_rate_delta[blk_pos]);
                                cur_change = 1;

                                if n < first_nz {
                                    let this_sign_bit = u32::from(self.resi_dct[blk_pos] < 0);
                                    if this_sign_bit != sign_bit {
                                        cur_cost = i64::MAX;
                                    }
                                }
                            }

                            if cur_cost < min_cost_inc {
                                min_cost_inc = cur_cost;
                                final_change = cur_change;
                                min_pos = Some(blk_pos);
                            }
                        }

                        let min_pos = min_pos.expect("candidate scan cannot be empty");
                        if dst_coeff[min_pos] == 32767 || dst_coeff[min_pos] == -32768 {
                            final_change = -1;
                        }

                        if dst_coeff[min_pos] == 0 {
                            num_sig += 1;
                        } else if final_change == -1 && dst_coeff[min_pos].abs() == 1 {
                            num_sig -= 1;
                        }

                        if self.resi_dct[min_pos] >= 0 {
                            dst_coeff[min_pos] += final_change as i16;
                        } else {
                            dst_coeff[min_pos] -= final_change as i16;
                        }
                    }
                }
                last_cg = false;
            }
        }

        num_sig
    }

    #[allow(clippy::too_many_arguments)]
    fn psy_eval(
        &self,
        use_psy: bool,
        blk_pos: usize,
        unquant_scale: i32,
        unquant_shift: i32,
        unquant_round: i32,
        scale_bits: i32,
    ) -> Option<PsyEval> {
        // DC keeps its plain RD cost even with psy enabled
        if !use_psy || blk_pos == 0 {
            return None;
        }
        let sign_coef = self.resi_dct[blk_pos];
        Some(PsyEval {
            psy_scale: self.psy_rdoq_scale,
            sign_coef,
            predicted_coef: self.fenc_dct[blk_pos] - sign_coef,
            unquant_scale,
            unquant_shift,
            unquant_round,
            scale_bits,
        })
    }
}
