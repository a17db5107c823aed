//! Catalog of benchmark kernels

use std::iter::successors;

use crate::{capability::Capabilities, dtype::DType};

/// Bound on arithmetic intensity from shared memory traffic, `flops / (loads * w)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedMemBound {
    pub flops: f64,
    pub loads: f64,
}

impl SharedMemBound {
    /// FLOP per byte of shared memory traffic
    #[must_use]
    pub fn ai(&self, dtype: DType) -> f64 {
        self.flops / (self.loads * dtype.byte_size() as f64)
    }
}

/// Benchmark kernel and its fixed parameters
#[derive(Debug, Clone, Copy)]
pub struct Variant {
    /// Name printed at the start of each report line
    pub label: &'static str,
    /// Kernel function name in device sources
    pub kernel: &'static str,
    /// Last intensity of the sweep, power of two
    pub intensity_max: u32,
    /// FLOP per element per unit of intensity
    pub flops_per_element: f64,
    pub shared_mem: Option<SharedMemBound>,
    include: fn(&Capabilities) -> bool,
}

impl Variant {
    /// Is this variant enabled on device with these capabilities?
    #[must_use]
    pub fn is_active(&self, caps: &Capabilities) -> bool {
        (self.include)(caps)
    }

    /// Sweep intensities 1, 2, 4, ..., `intensity_max`
    pub fn intensities(&self) -> impl Iterator<Item = u32> {
        intensities(self.intensity_max)
    }
}

const fn always(_: &Capabilities) -> bool {
    true
}

const fn fast_mma(caps: &Capabilities) -> bool {
    caps.fast_mma
}

const fn bound(flops: f64, loads: f64) -> Option<SharedMemBound> {
    Some(SharedMemBound { flops, loads })
}

/// All variants in report order
pub static VARIANTS: [Variant; 9] = [
    Variant {
        label: "FMA",
        kernel: "fma_rate",
        intensity_max: 4096,
        flops_per_element: 2.0,
        shared_mem: None,
        include: always,
    },
    Variant {
        label: "FMA SHMEM1",
        kernel: "shmem1_rate",
        intensity_max: 4096,
        flops_per_element: 2.0,
        shared_mem: bound(2.0, 1.0),
        include: always,
    },
    Variant {
        label: "FMA SHMEM2",
        kernel: "shmem2_rate",
        intensity_max: 4096,
        flops_per_element: 2.0,
        shared_mem: bound(2.0, 2.0),
        include: always,
    },
    Variant {
        label: "MFMA4",
        kernel: "mfma4_rate",
        intensity_max: 1024,
        flops_per_element: 512.0 / 64.0,
        shared_mem: bound(512.0, 64.0),
        include: fast_mma,
    },
    Variant {
        label: "MFMA4 SHMEM1",
        kernel: "shmem1_mfma4_rate",
        intensity_max: 1024,
        flops_per_element: 512.0 / 64.0,
        shared_mem: bound(512.0, 64.0),
        include: fast_mma,
    },
    Variant {
        label: "MFMA4 SHMEM2",
        kernel: "shmem2_mfma4_rate",
        intensity_max: 1024,
        flops_per_element: 512.0 / 64.0,
        shared_mem: bound(512.0, 2.0 * 64.0),
        include: fast_mma,
    },
    Variant {
        label: "MFMA16",
        kernel: "mfma16_rate",
        intensity_max: 256,
        flops_per_element: 2048.0 / 64.0,
        // Same tile as MFMA16 SHMEM1, reported so all three MFMA16 lines carry a bound
        shared_mem: bound(2048.0, 64.0),
        include: fast_mma,
    },
    Variant {
        label: "MFMA16 SHMEM1",
        kernel: "shmem1_mfma16_rate",
        intensity_max: 256,
        flops_per_element: 2048.0 / 64.0,
        shared_mem: bound(2048.0, 64.0),
        include: fast_mma,
    },
    Variant {
        label: "MFMA16 SHMEM2",
        kernel: "shmem2_mfma16_rate",
        intensity_max: 256,
        flops_per_element: 2048.0 / 64.0,
        shared_mem: bound(2048.0, 2.0 * 64.0),
        include: fast_mma,
    },
];

/// Variants enabled for these capabilities, in report order
pub fn active_variants(caps: &Capabilities) -> impl Iterator<Item = &'static Variant> + '_ {
    VARIANTS.iter().filter(move |variant| variant.is_active(caps))
}

/// Powers of two from 1 up to and including `max`
pub fn intensities(max: u32) -> impl Iterator<Item = u32> {
    successors(Some(1u32), |k| k.checked_mul(2)).take_while(move |&k| k <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceMode;

    #[test]
    fn intensity_sweep() {
        for variant in &VARIANTS {
            let ks: Vec<u32> = variant.intensities().collect();
            assert!(variant.intensity_max.is_power_of_two());
            assert_eq!(ks.len() as u32, variant.intensity_max.ilog2() + 1);
            assert_eq!(ks.first(), Some(&1));
            assert_eq!(ks.last(), Some(&variant.intensity_max));
            assert!(ks.windows(2).all(|w| w[1] == 2 * w[0]));
        }
        assert_eq!(intensities(1).collect::<Vec<_>>(), [1]);
        assert_eq!(intensities(8).collect::<Vec<_>>(), [1, 2, 4, 8]);
    }

    #[test]
    fn gated_by_fast_mma() {
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx1030", DType::F64);
        let labels: Vec<&str> = active_variants(&caps).map(|v| v.label).collect();
        assert_eq!(labels, ["FMA", "FMA SHMEM1", "FMA SHMEM2"]);
        let caps = Capabilities::detect(DeviceMode::HIP, "gfx942:sramecc+:xnack-", DType::F64);
        let labels: Vec<&str> = active_variants(&caps).map(|v| v.label).collect();
        assert_eq!(
            labels,
            [
                "FMA",
                "FMA SHMEM1",
                "FMA SHMEM2",
                "MFMA4",
                "MFMA4 SHMEM1",
                "MFMA4 SHMEM2",
                "MFMA16",
                "MFMA16 SHMEM1",
                "MFMA16 SHMEM2"
            ]
        );
    }

    #[test]
    fn shared_mem_bounds() {
        let ai = |label: &str, dtype| {
            VARIANTS.iter().find(|v| v.label == label).and_then(|v| v.shared_mem).map(|b| b.ai(dtype))
        };
        assert_eq!(ai("FMA", DType::F64), None);
        assert_eq!(ai("FMA SHMEM1", DType::F64), Some(0.25));
        assert_eq!(ai("FMA SHMEM2", DType::F32), Some(0.25));
        assert_eq!(ai("MFMA4", DType::F32), Some(2.0));
        assert_eq!(ai("MFMA4 SHMEM2", DType::F32), Some(1.0));
        assert_eq!(ai("MFMA16", DType::F64), Some(4.0));
        assert_eq!(ai("MFMA16 SHMEM1", DType::F32), Some(8.0));
        assert_eq!(ai("MFMA16 SHMEM2", DType::F64), Some(2.0));
    }
}
