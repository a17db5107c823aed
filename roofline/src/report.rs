//! Conversion of timed sweep points into roofline metrics

use std::fmt::Display;

use crate::{dtype::DType, error::RooflineError, variant::Variant};

/// One timed intensity of a sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub intensity: u32,
    /// Mean seconds per launch, strictly positive
    pub elapsed: f64,
}

/// Metrics derived from one sweep point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedMetrics {
    /// Bytes read and written by one launch
    pub bytes: f64,
    /// Floating point operations of one launch
    pub flops: f64,
    pub bandwidth_gbs: f64,
    pub arithmetic_intensity: f64,
    pub throughput_gflops: f64,
    pub shared_mem_ai: Option<f64>,
}

impl DerivedMetrics {
    /// Fails with timing error if elapsed time is not positive
    pub fn new(point: &SweepPoint, variant: &Variant, entries: usize, dtype: DType) -> Result<Self, RooflineError> {
        // Also rejects NaN
        if !(point.elapsed > 0.0) {
            return Err(RooflineError::timing_error(
                format!("{} at intensity {} took {} s", variant.label, point.intensity, point.elapsed).into(),
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        let n = entries as f64;
        #[allow(clippy::cast_precision_loss)]
        let bytes = 2.0 * n * dtype.byte_size() as f64;
        let flops = variant.flops_per_element * f64::from(point.intensity) * n;
        Ok(DerivedMetrics {
            bytes,
            flops,
            bandwidth_gbs: bytes / 1e9 / point.elapsed,
            arithmetic_intensity: flops / bytes,
            throughput_gflops: flops / 1e9 / point.elapsed,
            shared_mem_ai: variant.shared_mem.map(|bound| bound.ai(dtype)),
        })
    }
}

/// Single line of benchmark output
#[derive(Debug, Clone, Copy)]
pub struct ReportLine<'a> {
    pub label: &'a str,
    pub metrics: DerivedMetrics,
}

impl Display for ReportLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = &self.metrics;
        let label = format!("{}:", self.label);
        f.write_fmt(format_args!(
            "{label:<14} BW={:8.2} GB/s, AI={:8.2} FLOP/B, GFLOPS={:8.2}",
            m.bandwidth_gbs, m.arithmetic_intensity, m.throughput_gflops
        ))?;
        if let Some(shared_mem_ai) = m.shared_mem_ai {
            f.write_fmt(format_args!(", SHMEM AI={shared_mem_ai:8.2} FLOP/B"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VARIANTS;

    fn variant(label: &str) -> &'static Variant {
        VARIANTS.iter().find(|v| v.label == label).unwrap()
    }

    #[test]
    fn fma_metrics() -> Result<(), RooflineError> {
        let point = SweepPoint { intensity: 8, elapsed: 0.01 };
        let m = DerivedMetrics::new(&point, variant("FMA"), 134_217_728, DType::F64)?;
        assert_eq!(m.bytes, 2_147_483_648.0);
        assert_eq!(m.flops, 2_147_483_648.0);
        assert_eq!(m.arithmetic_intensity, 1.0);
        assert!((m.bandwidth_gbs * point.elapsed * 1e9 - m.bytes).abs() < 1e-3);
        assert!((m.throughput_gflops / m.bandwidth_gbs - m.arithmetic_intensity).abs() < 1e-12);
        assert_eq!(m.shared_mem_ai, None);
        Ok(())
    }

    #[test]
    fn ratio_holds_for_every_variant() -> Result<(), RooflineError> {
        for variant in &VARIANTS {
            for dtype in [DType::F32, DType::F64] {
                for k in variant.intensities() {
                    let point = SweepPoint { intensity: k, elapsed: 3.7e-4 };
                    let m = DerivedMetrics::new(&point, variant, 1 << 20, dtype)?;
                    let ratio = m.throughput_gflops / m.bandwidth_gbs;
                    assert!((ratio - m.arithmetic_intensity).abs() <= 1e-9 * m.arithmetic_intensity);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn non_positive_time_is_error() {
        for elapsed in [0.0, -1.0, f64::NAN] {
            let point = SweepPoint { intensity: 1, elapsed };
            assert!(matches!(
                DerivedMetrics::new(&point, variant("FMA"), 1024, DType::F64),
                Err(RooflineError::TimingError(_))
            ));
        }
    }

    #[test]
    fn line_format() -> Result<(), RooflineError> {
        let point = SweepPoint { intensity: 8, elapsed: 0.01 };
        let metrics = DerivedMetrics::new(&point, variant("FMA"), 134_217_728, DType::F64)?;
        assert_eq!(
            ReportLine { label: "FMA", metrics }.to_string(),
            "FMA:           BW=  214.75 GB/s, AI=    1.00 FLOP/B, GFLOPS=  214.75"
        );
        let point = SweepPoint { intensity: 1, elapsed: 0.5 };
        let metrics = DerivedMetrics::new(&point, variant("MFMA4 SHMEM2"), 1_000_000, DType::F32)?;
        assert_eq!(
            ReportLine { label: "MFMA4 SHMEM2", metrics }.to_string(),
            "MFMA4 SHMEM2:  BW=    0.02 GB/s, AI=    1.00 FLOP/B, GFLOPS=    0.02, SHMEM AI=    1.00 FLOP/B"
        );
        Ok(())
    }
}
