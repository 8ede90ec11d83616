//! Compact 4 to 8 bit quantization of embedding descriptors, with cosine
//! distances computed directly on the packed codes.

pub mod config;
pub mod correlation;
pub mod descr_int;
pub mod distance;
pub mod io;
pub mod math;
pub mod memory;
pub mod quantizer;
pub mod simd;
pub mod store;

mod tiles;
mod unpack;

pub use config::{CacheSizes, DescrIntConfig, DistanceStrategy};
pub use descr_int::DescrInt;
pub use distance::ZERO_NORM_DISTANCE;
pub use quantizer::{CodeSums, EncodedParams, HEADER_SIZE};
pub use store::EncodedSet;

// Re-export the half-precision type accepted by the f16 entry points.
pub use half::f16;


/// Errors reported when configuring an engine or persisting codes.
#[derive(thiserror::Error, Debug)]
pub enum DescrIntError {
    /// Returned when the descriptor size or code depth is unsupported.
    #[error("invalid configuration: size {size} must be a positive multiple of 8 and depth {depth} must be in 4..=8")]
    InvalidConfig { size: usize, depth: usize },
    /// Returned when cache sizes cannot drive the tiling.
    #[error("invalid cache sizes: {0}")]
    InvalidCache(&'static str),
    /// Returned when persistence encounters an I/O failure.
    #[error("i/o error while reading or writing codes: {0}")]
    Io(#[from] std::io::Error),
    /// Returned when the persisted bytes are inconsistent or corrupt.
    #[error("invalid persisted codes: {0}")]
    InvalidPersistence(&'static str),
}
