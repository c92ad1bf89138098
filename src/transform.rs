//! Integer transforms for H.265/HEVC
//!
//! H.265 uses integer approximations of the DCT-II at 4×4 through 32×32 and
//! a DST variant for 4×4 luma intra blocks. The forward transform scales by
//! `log2(size) + bitDepth - 9` then `log2(size) + 6`; the inverse by `7`
//! then `20 - bitDepth`. All kernels here are plain scalar reference code;
//! optimized implementations can replace them through the primitives table.

use std::sync::OnceLock;

/// Quantized cosine base values per transform size (odd rows of the matrix)
const BASE2: [i32; 1] = [64];
const BASE4: [i32; 2] = [83, 36];
const BASE8: [i32; 4] = [89, 75, 50, 18];
const BASE16: [i32; 8] = [90, 87, 80, 70, 57, 43, 25, 9];
const BASE32: [i32; 16] = [
    90, 90, 88, 85, 82, 78, 73, 67, 61, 54, 46, 38, 31, 22, 13, 4,
];

/// DST-VII matrix for 4×4 luma intra blocks
const DST4: [i32; 16] = [
    29, 55, 74, 84, //
    74, 74, 0, -74, //
    84, -29, -74, 55, //
    55, -84, 74, -29,
];

fn base_for(n: usize) -> &'static [i32] {
    match n {
        2 => &BASE2,
        4 => &BASE4,
        8 => &BASE8,
        16 => &BASE16,
        32 => &BASE32,
        _ => unreachable!(),
    }
}

/// Entry `[k][j]` of the order-`n` HEVC transform matrix
///
/// Odd rows fold the angle `(2j+1)k * pi/(2n)` onto the quantized base
/// values; even rows are the symmetric extension of the half-size matrix.
fn matrix_entry(n: usize, k: usize, j: usize) -> i32 {
    if k == 0 {
        return 64;
    }
    if k % 2 == 1 {
        let base = base_for(n);
        let p = 2 * n; // pi in units of pi/(2n)
        let mut u = ((2 * j + 1) * k) % (2 * p);
        let mut sign = 1;
        if u > p {
            u = 2 * p - u;
        }
        if 2 * u > p {
            sign = -1;
            u = p - u;
        }
        return sign * base[(u - 1) / 2];
    }
    let jj = if j < n / 2 { j } else { n - 1 - j };
    matrix_entry(n / 2, k / 2, jj)
}

static DCT_MATRICES: OnceLock<[Box<[i32]>; 4]> = OnceLock::new();

/// Row-major order-`n` DCT matrix, `n = 4 << size_idx`
fn dct_matrix(n: usize) -> &'static [i32] {
    let tables = DCT_MATRICES.get_or_init(|| {
        std::array::from_fn(|size_idx| {
            let n = 4usize << size_idx;
            let mut m = vec![0i32; n * n];
            for k in 0..n {
                for j in 0..n {
                    m[k * n + j] = matrix_entry(n, k, j);
                }
            }
            m.into_boxed_slice()
        })
    });
    &tables[n.trailing_zeros() as usize - 2]
}

/// Two-pass forward transform with the given basis matrix
fn forward(t: &[i32], n: usize, src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32) {
    let shift1 = n.trailing_zeros() as i32 + bit_depth as i32 - 9;
    let shift2 = n.trailing_zeros() as i32 + 6;
    let add1 = 1i32 << (shift1 - 1);
    let add2 = 1i32 << (shift2 - 1);

    let mut tmp = [0i32; 32 * 32];
    for j in 0..n {
        for k in 0..n {
            let mut sum = 0i32;
            for i in 0..n {
                sum += t[k * n + i] * i32::from(src[j * stride + i]);
            }
            tmp[j * n + k] = (sum + add1) >> shift1;
        }
    }
    for k2 in 0..n {
        for k in 0..n {
            let mut sum = 0i32;
            for j in 0..n {
                sum += t[k2 * n + j] * tmp[j * n + k];
            }
            dst[k2 * n + k] = (sum + add2) >> shift2;
        }
    }
}

/// Two-pass inverse transform with the given basis matrix
fn inverse(t: &[i32], n: usize, src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32) {
    let shift1 = 7;
    let shift2 = 20 - bit_depth as i32;
    let add1 = 1i32 << (shift1 - 1);
    let add2 = 1i32 << (shift2 - 1);

    let mut tmp = [0i32; 32 * 32];
    for l in 0..n {
        for j in 0..n {
            let mut sum = 0i32;
            for k in 0..n {
                sum += t[k * n + j] * src[k * n + l];
            }
            tmp[j * n + l] = ((sum + add1) >> shift1).clamp(-32768, 32767);
        }
    }
    for j in 0..n {
        for i in 0..n {
            let mut sum = 0i32;
            for l in 0..n {
                sum += t[l * n + i] * tmp[j * n + l];
            }
            dst[j * stride + i] = (((sum + add2) >> shift2).clamp(-32768, 32767)) as i16;
        }
    }
}

/// Forward DCT kernel for an `N`×`N` block at bit depth `BD`
pub fn dct_c<const N: usize, const BD: u32>(src: &[i16], dst: &mut [i32], stride: usize) {
    forward(dct_matrix(N), N, src, dst, stride, BD);
}

/// Inverse DCT kernel for an `N`×`N` block at bit depth `BD`
pub fn idct_c<const N: usize, const BD: u32>(src: &[i32], dst: &mut [i16], stride: usize) {
    inverse(dct_matrix(N), N, src, dst, stride, BD);
}

/// Forward DST kernel (4×4 luma intra)
pub fn dst_c<const BD: u32>(src: &[i16], dst: &mut [i32], stride: usize) {
    forward(&DST4, 4, src, dst, stride, BD);
}

/// Inverse DST kernel (4×4 luma intra)
pub fn idst_c<const BD: u32>(src: &[i32], dst: &mut [i16], stride: usize) {
    inverse(&DST4, 4, src, dst, stride, BD);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dct4_matrix() {
        let t = dct_matrix(4);
        assert_eq!(&t[0..4], &[64, 64, 64, 64]);
        assert_eq!(&t[4..8], &[83, 36, -36, -83]);
        assert_eq!(&t[8..12], &[64, -64, -64, 64]);
        assert_eq!(&t[12..16], &[36, -83, 83, -36]);
    }

    #[test]
    fn test_dct8_matrix_rows() {
        let t = dct_matrix(8);
        assert_eq!(&t[8..16], &[89, 75, 50, 18, -18, -50, -75, -89]);
        assert_eq!(&t[16..24], &[83, 36, -36, -83, -83, -36, 36, 83]);
        assert_eq!(&t[24..32], &[75, -18, -89, -50, 50, 89, 18, -75]);
        assert_eq!(&t[56..64], &[18, -50, 75, -89, 89, -75, 50, -18]);
    }

    #[test]
    fn test_dct16_matrix_spot_values() {
        let t = dct_matrix(16);
        assert_eq!(&t[16..24], &[90, 87, 80, 70, 57, 43, 25, 9]);
        // even rows embed the 8x8 matrix symmetrically
        assert_eq!(t[2 * 16], 89);
        assert_eq!(t[2 * 16 + 15], 89);
        assert_eq!(t[2 * 16 + 8], -89);
    }

    #[test]
    fn test_dct32_matrix_spot_values() {
        let t = dct_matrix(32);
        assert_eq!(
            &t[32..48],
            &[90, 90, 88, 85, 82, 78, 73, 67, 61, 54, 46, 38, 31, 22, 13, 4]
        );
        assert_eq!(t[32 + 16], -4);
        assert_eq!(t[32 + 31], -90);
        // row 2 embeds row 1 of the 16x16 matrix
        assert_eq!(&t[64..72], &[90, 87, 80, 70, 57, 43, 25, 9]);
    }

    #[test]
    fn test_matrix_rows_orthogonal() {
        for n in [4usize, 8, 16, 32] {
            let t = dct_matrix(n);
            for a in 0..n {
                for b in (a + 1)..n {
                    let dot: i64 = (0..n)
                        .map(|j| i64::from(t[a * n + j]) * i64::from(t[b * n + j]))
                        .sum();
                    // integer approximation: rows are orthogonal up to
                    // rounding noise, tiny next to the row norm (~n*64^2)
                    assert!(
                        dot.abs() < (n as i64) * 200,
                        "rows {} and {} of T{} not orthogonal: {}",
                        a,
                        b,
                        n,
                        dot
                    );
                }
            }
        }
    }

    #[test]
    fn test_dct_zero_input() {
        let src = [0i16; 16];
        let mut dst = [0i32; 16];
        dct_c::<4, 8>(&src, &mut dst, 4);
        assert!(dst.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_dct_flat_input_is_dc_only() {
        let src = [8i16; 16];
        let mut dst = [0i32; 16];
        dct_c::<4, 8>(&src, &mut dst, 4);
        assert!(dst[0] > 0);
        assert!(dst[1..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_dct_idct_round_trip_4x4() {
        let src: [i16; 16] = [
            12, -7, 3, 0, 25, -14, 6, 1, -9, 4, 31, -2, 0, 17, -22, 5,
        ];
        let mut coeffs = [0i32; 16];
        let mut recon = [0i16; 16];
        dct_c::<4, 8>(&src, &mut coeffs, 4);
        idct_c::<4, 8>(&coeffs, &mut recon, 4);
        for i in 0..16 {
            assert!(
                (i32::from(src[i]) - i32::from(recon[i])).abs() <= 1,
                "pos {}: {} vs {}",
                i,
                src[i],
                recon[i]
            );
        }
    }

    #[test]
    fn test_dct_idct_round_trip_8x8() {
        let mut src = [0i16; 64];
        for (i, v) in src.iter_mut().enumerate() {
            *v = ((i as i32 * 37) % 101 - 50) as i16;
        }
        let mut coeffs = [0i32; 64];
        let mut recon = [0i16; 64];
        dct_c::<8, 8>(&src, &mut coeffs, 8);
        idct_c::<8, 8>(&coeffs, &mut recon, 8);
        for i in 0..64 {
            assert!((i32::from(src[i]) - i32::from(recon[i])).abs() <= 1);
        }
    }

    #[test]
    fn test_dct_idct_round_trip_32x32() {
        let mut src = [0i16; 1024];
        for (i, v) in src.iter_mut().enumerate() {
            *v = ((i as i32 * 53) % 255 - 127) as i16;
        }
        let mut coeffs = [0i32; 1024];
        let mut recon = [0i16; 1024];
        dct_c::<32, 8>(&src, &mut coeffs, 32);
        idct_c::<32, 8>(&coeffs, &mut recon, 32);
        for i in 0..1024 {
            assert!((i32::from(src[i]) - i32::from(recon[i])).abs() <= 2);
        }
    }

    #[test]
    fn test_dst_round_trip() {
        let src: [i16; 16] = [5, -3, 8, 2, -6, 9, 1, -4, 7, 0, -2, 6, 3, -8, 4, -1];
        let mut coeffs = [0i32; 16];
        let mut recon = [0i16; 16];
        dst_c::<8>(&src, &mut coeffs, 4);
        idst_c::<8>(&coeffs, &mut recon, 4);
        for i in 0..16 {
            assert!((i32::from(src[i]) - i32::from(recon[i])).abs() <= 1);
        }
    }

    #[test]
    fn test_forward_respects_stride() {
        // residual embedded in a wider buffer
        let mut src = [0i16; 8 * 4];
        for j in 0..4 {
            for i in 0..4 {
                src[j * 8 + i] = (j * 4 + i) as i16;
            }
        }
        let tight: Vec<i16> = (0..16).map(|v| v as i16).collect();
        let mut a = [0i32; 16];
        let mut b = [0i32; 16];
        dct_c::<4, 8>(&src, &mut a, 8);
        dct_c::<4, 8>(&tight, &mut b, 4);
        assert_eq!(a, b);
    }
}
