//! Detection of matrix fused multiply add support

use crate::{
    backend::{BuildOptions, Device, DeviceMode},
    dtype::DType,
};

/// Architectures with matrix cores for both fp64 and fp32
const MFMA_ARCHS: [&str; 4] = ["gfx90a", "gfx940", "gfx941", "gfx942"];

/// What the selected device can run, derived once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Architecture without feature qualifiers
    pub arch: String,
    pub dtype: DType,
    pub fast_mma: bool,
}

impl Capabilities {
    /// Queries architecture of a live device
    #[must_use]
    pub fn probe(device: &Device, dtype: DType) -> Capabilities {
        Capabilities::detect(device.mode(), device.arch(), dtype)
    }

    /// Derives capabilities from the raw architecture string reported by a backend
    #[must_use]
    pub fn detect(mode: DeviceMode, raw_arch: &str, dtype: DType) -> Capabilities {
        let arch = match mode {
            // gcnArchName carries feature qualifiers, gfx90a:sramecc+:xnack-
            DeviceMode::HIP => raw_arch.split(':').next().unwrap_or(raw_arch),
            _ => raw_arch,
        };
        // MFMA kernels exist only as HIP source
        let fast_mma = mode == DeviceMode::HIP && (has_fp64_mfma(arch, dtype) || has_fp32_mfma(arch, dtype));
        Capabilities { arch: arch.into(), dtype, fast_mma }
    }

    /// Kernel defines, `HAS_FP64_MFMA` or `HAS_FP32_MFMA` when matrix cores are used
    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        let options = BuildOptions::new(self.dtype);
        match (self.fast_mma, self.dtype) {
            (true, DType::F64) => options.define("HAS_FP64_MFMA", 1),
            (true, DType::F32) => options.define("HAS_FP32_MFMA", 1),
            (false, _) => options,
        }
    }
}

fn has_fp64_mfma(arch: &str, dtype: DType) -> bool {
    dtype.byte_size() == 8 && MFMA_ARCHS.contains(&arch)
}

fn has_fp32_mfma(arch: &str, dtype: DType) -> bool {
    dtype.byte_size() == 4 && MFMA_ARCHS.contains(&arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_hip_qualifiers() {
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx90a:sramecc+", DType::F64);
        assert_eq!(caps.arch, "gfx90a");
        assert!(caps.fast_mma);
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx90a:sramecc+:xnack-", DType::F32);
        assert_eq!(caps.arch, "gfx90a");
        assert!(caps.fast_mma);
        // Only HIP names carry qualifiers
        let caps = Capabilities::detect(DeviceMode::OpenCL, "gfx90a:sramecc+:xnack-", DType::F64);
        assert_eq!(caps.arch, "gfx90a:sramecc+:xnack-");
        assert!(!caps.fast_mma);
    }

    #[test]
    fn whitelist() {
        for arch in MFMA_ARCHS {
            for dtype in [DType::F32, DType::F64] {
                assert!(Capabilities::detect(DeviceMode::HIP, arch, dtype).fast_mma);
            }
        }
        for arch in ["gfx1030", "gfx908", "gfx9", "gfx90", "gfx942x", "", "sm_80"] {
            assert!(!Capabilities::detect(DeviceMode::HIP, arch, DType::F64).fast_mma, "{arch}");
        }
        assert!(!Capabilities::detect(DeviceMode::CUDA, "gfx942", DType::F64).fast_mma);
        assert!(!Capabilities::detect(DeviceMode::Serial, "gfx942", DType::F64).fast_mma);
    }

    #[test]
    fn mfma_defines() {
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx942", DType::F64);
        let options = caps.build_options();
        assert!(options.is_defined("HAS_FP64_MFMA"));
        assert!(!options.is_defined("HAS_FP32_MFMA"));
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx940", DType::F32);
        assert_eq!(caps.build_options().flags(), ["-Ddfloat=float", "-DHAS_FP32_MFMA=1"]);
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx1030", DType::F32);
        assert_eq!(caps.build_options().flags(), ["-Ddfloat=float"]);
    }
}
