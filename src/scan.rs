//! Coefficient scanning for H.265/HEVC
//!
//! Transform coefficients are entropy-coded in one of three scan patterns:
//! diagonal (default), horizontal, or vertical. For blocks larger than 4×4
//! the scan is hierarchical: 4×4 coefficient groups (CGs) are visited in the
//! block-level pattern, and the 16 positions inside each CG are visited in
//! the same pattern. Intra blocks up to 8×8 select their pattern from the
//! prediction direction (mode-dependent coefficient scanning).

use std::sync::OnceLock;

/// log2 of the coefficient-group side (CGs are 4×4)
pub const MLS_CG_SIZE: u32 = 2;
/// Maximum number of coefficient groups in a block (32×32 has 64)
pub const MLS_GRP_NUM: usize = 64;
/// Number of coefficients per scan set (one CG)
pub const SCAN_SET_SIZE: usize = 16;
/// log2 of [`SCAN_SET_SIZE`]
pub const LOG2_SCAN_SET_SIZE: u32 = 4;

/// Largest transform size eligible for mode-dependent scanning (luma)
const MDCS_LOG2_MAX_SIZE: u32 = 3;
/// Angular distance from pure horizontal/vertical that still flips the scan
const MDCS_ANGLE_LIMIT: u32 = 4;
/// Intra prediction mode index for pure horizontal
const HOR_IDX: u32 = 10;
/// Intra prediction mode index for pure vertical
const VER_IDX: u32 = 26;

/// Coefficient scanning pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPattern {
    /// Diagonal scan (default)
    Diagonal = 0,
    /// Horizontal scan
    Horizontal = 1,
    /// Vertical scan
    Vertical = 2,
}

impl ScanPattern {
    fn index(self) -> usize {
        self as usize
    }
}

/// Group index of a last-significant coordinate (prefix context)
///
/// Coordinates 0..3 map to their own group; beyond that groups double in
/// width and carry extra bypass-coded suffix bits.
const GROUP_IDX: [u8; 32] = [
    0, 1, 2, 3, 4, 4, 5, 5, 6, 6, 6, 6, 7, 7, 7, 7, //
    8, 8, 8, 8, 8, 8, 8, 8, 9, 9, 9, 9, 9, 9, 9, 9,
];

/// Group index for a last-significant-coefficient coordinate (0..31)
pub fn group_idx(pos: u32) -> u32 {
    GROUP_IDX[pos as usize] as u32
}

/// Precomputed scan permutations for all sizes and patterns
struct ScanTables {
    /// `[pattern][log2_tr_size - 2]` → permutation of `0..size^2`
    order: [[Box<[u16]>; 4]; 3],
    /// `[pattern][log2_tr_size - 2]` → permutation of `0..(size/4)^2`
    order_cg: [[Box<[u16]>; 4]; 3],
}

static SCAN_TABLES: OnceLock<ScanTables> = OnceLock::new();

/// Coordinates of an `n`×`n` grid in the given pattern
fn pattern_coords(n: u32, pattern: ScanPattern) -> Vec<(u32, u32)> {
    let mut coords = Vec::with_capacity((n * n) as usize);
    match pattern {
        ScanPattern::Diagonal => {
            // up-right diagonals, each walked from its bottom-left end
            for d in 0..(2 * n - 1) {
                for y in (0..n).rev() {
                    if d >= y && d - y < n {
                        coords.push((d - y, y));
                    }
                }
            }
        }
        ScanPattern::Horizontal => {
            for y in 0..n {
                for x in 0..n {
                    coords.push((x, y));
                }
            }
        }
        ScanPattern::Vertical => {
            for x in 0..n {
                for y in 0..n {
                    coords.push((x, y));
                }
            }
        }
    }
    coords
}

/// Full-block scan: CGs in the pattern order, 16 positions per CG in the
/// same pattern, flattened to raster block positions
fn build_scan(log2_tr_size: u32, pattern: ScanPattern) -> Box<[u16]> {
    let size = 1u32 << log2_tr_size;
    let cg_side = size >> MLS_CG_SIZE;
    let mut scan = Vec::with_capacity((size * size) as usize);
    let inner = pattern_coords(4, pattern);
    if cg_side <= 1 {
        for &(x, y) in &inner {
            scan.push((y * size + x) as u16);
        }
    } else {
        for &(cg_x, cg_y) in &pattern_coords(cg_side, pattern) {
            for &(x, y) in &inner {
                scan.push(((cg_y * 4 + y) * size + cg_x * 4 + x) as u16);
            }
        }
    }
    scan.into_boxed_slice()
}

fn build_scan_cg(log2_tr_size: u32, pattern: ScanPattern) -> Box<[u16]> {
    let cg_side = (1u32 << log2_tr_size) >> MLS_CG_SIZE;
    if cg_side <= 1 {
        return vec![0u16].into_boxed_slice();
    }
    pattern_coords(cg_side, pattern)
        .iter()
        .map(|&(x, y)| (y * cg_side + x) as u16)
        .collect()
}

fn tables() -> &'static ScanTables {
    SCAN_TABLES.get_or_init(|| {
        let patterns = [
            ScanPattern::Diagonal,
            ScanPattern::Horizontal,
            ScanPattern::Vertical,
        ];
        ScanTables {
            order: patterns.map(|p| std::array::from_fn(|s| build_scan(s as u32 + 2, p))),
            order_cg: patterns.map(|p| std::array::from_fn(|s| build_scan_cg(s as u32 + 2, p))),
        }
    })
}

/// Scan permutation for a transform size and pattern
pub fn scan_order(pattern: ScanPattern, log2_tr_size: u32) -> &'static [u16] {
    &tables().order[pattern.index()][log2_tr_size as usize - 2]
}

/// Coefficient-group scan permutation for a transform size and pattern
pub fn scan_order_cg(pattern: ScanPattern, log2_tr_size: u32) -> &'static [u16] {
    &tables().order_cg[pattern.index()][log2_tr_size as usize - 2]
}

/// Scan pattern for a transform unit
///
/// Inter blocks always scan diagonally. Intra blocks up to 8×8 luma (4×4
/// chroma for subsampled formats) pick the pattern crosswise from the
/// prediction angle: near-vertical prediction leaves horizontal structure in
/// the residual and vice versa.
pub fn coef_scan_pattern(
    log2_tr_size: u32,
    is_luma: bool,
    is_intra: bool,
    dir_mode: u32,
    h_chroma_shift: u32,
) -> ScanPattern {
    if !is_intra {
        return ScanPattern::Diagonal;
    }
    let max_log2 = if is_luma {
        MDCS_LOG2_MAX_SIZE
    } else {
        MDCS_LOG2_MAX_SIZE - h_chroma_shift
    };
    if log2_tr_size > max_log2 {
        return ScanPattern::Diagonal;
    }
    if dir_mode.abs_diff(VER_IDX) <= MDCS_ANGLE_LIMIT {
        ScanPattern::Horizontal
    } else if dir_mode.abs_diff(HOR_IDX) <= MDCS_ANGLE_LIMIT {
        ScanPattern::Vertical
    } else {
        ScanPattern::Diagonal
    }
}

/// Entropy-coding layout of one transform unit
///
/// Bundles the scan tables and significance-map context base the coefficient
/// coders need, so per-coefficient loops index plain slices.
#[derive(Clone, Copy)]
pub struct CodingParameters {
    /// Coefficient scan (raster block positions in coding order)
    pub scan: &'static [u16],
    /// Coefficient-group scan
    pub scan_cg: &'static [u16],
    /// Selected pattern
    pub scan_type: ScanPattern,
    /// log2 of the CG grid side
    pub log2_tr_size_cg: u32,
    /// Base context index for the significance map at this size
    pub first_significance_map_context: u32,
}

impl CodingParameters {
    /// Derive the coding layout for a TU
    pub fn derive(
        log2_tr_size: u32,
        is_luma: bool,
        is_intra: bool,
        dir_mode: u32,
        h_chroma_shift: u32,
    ) -> Self {
        let scan_type = coef_scan_pattern(log2_tr_size, is_luma, is_intra, dir_mode, h_chroma_shift);

        let first_significance_map_context = match log2_tr_size {
            2 => 0,
            3 => {
                if scan_type != ScanPattern::Diagonal && is_luma {
                    15
                } else {
                    9
                }
            }
            _ => {
                if is_luma {
                    21
                } else {
                    12
                }
            }
        };

        CodingParameters {
            scan: scan_order(scan_type, log2_tr_size),
            scan_cg: scan_order_cg(scan_type, log2_tr_size),
            scan_type,
            log2_tr_size_cg: log2_tr_size - MLS_CG_SIZE,
            first_significance_map_context,
        }
    }
}
