//! zquant - H.265/HEVC transform and quantization core
//!
//! zquant implements the block-level pipeline that turns prediction
//! residuals into entropy-ready quantized transform coefficients and back:
//!
//! - `transform`: integer DCT 4x4..32x32 and the 4x4 DST, as scalar
//!   reference kernels
//! - `primitives`: the kernel dispatch table (swap in SIMD per entry)
//! - `scan`: diagonal/horizontal/vertical coefficient scans and the 4x4
//!   coefficient-group layout
//! - `qp`: quantization parameter derivation, including chroma QP mapping
//! - `scaling`: per-size/list/remainder quantizer, dequantizer, and
//!   error-scale tables
//! - `nr`: running-average noise reduction on DCT coefficients
//! - `cabac`: CABAC bit-cost snapshots and significance context derivation
//! - `quant`: the [`Quant`] engine - forward/inverse pipeline, plain
//!   quantization, sign-bit hiding
//! - `rdoq`: rate-distortion optimized quantization over the CABAC cost
//!   model
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use zquant::{ChromaFormat, Quant, ScalingList, TuInfo};
//!
//! let mut quant = Quant::new(8).unwrap();
//! quant
//!     .init(false, 0.0, Arc::new(ScalingList::flat(8).unwrap()))
//!     .unwrap();
//! quant.set_qp_for_cu(27, ChromaFormat::I420, 0, 0);
//!
//! let residual = [4i16; 16];
//! let mut coeff = [0i16; 16];
//! let num_sig = quant
//!     .transform_nxn(&TuInfo::default(), &[], 0, &residual, 4, &mut coeff, 2)
//!     .unwrap();
//! assert_eq!(num_sig, coeff.iter().filter(|&&c| c != 0).count() as u32);
//! ```

pub mod cabac;
pub mod error;
pub mod nr;
pub mod primitives;
pub mod qp;
pub mod quant;
pub mod rdoq;
pub mod scaling;
pub mod scan;
pub mod transform;

pub use cabac::EstBits;
pub use error::{Error, Result};
pub use nr::NoiseReduction;
pub use primitives::Primitives;
pub use qp::{ChromaFormat, QpParam};
pub use quant::{Quant, SliceType, TextType, TuInfo};
pub use scaling::ScalingList;
pub use scan::ScanPattern;

/// zquant version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
