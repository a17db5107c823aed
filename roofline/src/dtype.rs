//! Element types the benchmark can sweep over

use std::{fmt::Display, str::FromStr};

use crate::error::RooflineError;

/// Floating point precision of the benchmark buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    /// 32 bit floating point, selected by `fp32`
    F32,
    /// 64 bit floating point, selected by `fp64`
    F64,
}

impl DType {
    /// Element width in bytes
    #[must_use]
    pub const fn byte_size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// C type used for `dfloat` in device kernel sources
    #[must_use]
    pub const fn c_name(&self) -> &'static str {
        match self {
            DType::F32 => "float",
            DType::F64 => "double",
        }
    }
}

impl Default for DType {
    fn default() -> Self {
        DType::F64
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DType::F32 => "fp32",
            DType::F64 => "fp64",
        })
    }
}

impl FromStr for DType {
    type Err = RooflineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp32" => Ok(DType::F32),
            "fp64" => Ok(DType::F64),
            _ => Err(RooflineError::config_error(
                format!("Unknown compute type {s:?}, expected fp64 or fp32").into(),
            )),
        }
    }
}

/// Scalar trait is implemented for element types host kernels run on
pub trait Scalar: Copy + Sized + std::fmt::Debug + 'static + PartialEq + Send + Sync {
    /// From f64, rounding when narrower
    fn from_f64(t: f64) -> Self;
    /// Multiply add, `self * a + b`, two flops
    #[must_use]
    fn madd(self, a: Self, b: Self) -> Self;
    /// Is this value neither infinite nor NaN?
    fn is_finite(self) -> bool;
    /// Append native endian bytes
    fn extend_ne_bytes(self, bytes: &mut Vec<u8>);
}

impl Scalar for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(t: f64) -> Self {
        t as f32
    }

    fn madd(self, a: Self, b: Self) -> Self {
        self * a + b
    }

    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }

    fn extend_ne_bytes(self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_ne_bytes());
    }
}

impl Scalar for f64 {
    fn from_f64(t: f64) -> Self {
        t
    }

    fn madd(self, a: Self, b: Self) -> Self {
        self * a + b
    }

    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }

    fn extend_ne_bytes(self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compute_type() -> Result<(), RooflineError> {
        assert_eq!("fp64".parse::<DType>()?, DType::F64);
        assert_eq!("fp32".parse::<DType>()?, DType::F32);
        assert_eq!(DType::F64.byte_size(), 8);
        assert_eq!(DType::F32.byte_size(), 4);
        assert!(matches!("fp16".parse::<DType>(), Err(RooflineError::ConfigError(_))));
        Ok(())
    }
}
