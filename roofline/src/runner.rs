//! Warmup and timed intensity sweeps over every active variant

use std::{io::Write, time::Instant};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    backend::{BufferId, Device, KernelArg, ProgramId},
    capability::Capabilities,
    config::{BenchConfig, DebugMask},
    dtype::{DType, Scalar},
    error::RooflineError,
    report::{DerivedMetrics, ReportLine, SweepPoint},
    variant::{active_variants, Variant},
};

/// Untimed launches before each sweep
pub const WARMUP_LAUNCHES: usize = 5;
/// Intensity used by warmup launches
pub const WARMUP_INTENSITY: u32 = 8;
/// Timed launches per sweep point
pub const REPETITIONS: u32 = 20;
/// Scalar multiplier passed to every kernel
pub const ALPHA: f64 = 0.5;

const SEED: u64 = 69420;
// Elements uploaded per host to device copy while filling input
const FILL_CHUNK: usize = 1 << 20;

/// Owns the device, both buffers and the compiled kernels
#[derive(Debug)]
pub struct Benchmark {
    device: Device,
    config: BenchConfig,
    caps: Capabilities,
    debug: DebugMask,
    x: BufferId,
    y: BufferId,
    programs: Vec<(&'static Variant, ProgramId)>,
}

impl Benchmark {
    /// Probes device, allocates and fills buffers and compiles kernels of all active variants.
    /// Compilation errors are returned before anything is measured.
    pub fn new(mut device: Device, config: BenchConfig, debug: DebugMask) -> Result<Benchmark, RooflineError> {
        let n = i32::try_from(config.entries).map_err(|e| {
            RooflineError::config_error(format!("Entries {} do not fit into kernel index, {e}", config.entries).into())
        })?;
        if n < 1 {
            return Err(RooflineError::config_error("Entries must be positive".into()));
        }
        let caps = Capabilities::probe(&device, config.dtype);
        if debug.debug_dev() {
            eprintln!(
                "Device {} arch {}, {} matrix cores {}",
                device.mode(),
                caps.arch,
                caps.dtype,
                if caps.fast_mma { "enabled" } else { "disabled" }
            );
        }
        let bytes = config.entries * config.dtype.byte_size();
        let x = device.allocate(bytes)?;
        let y = device.allocate(bytes)?;
        fill_uniform(&mut device, x, config.entries, config.dtype)?;

        let options = caps.build_options();
        let mut programs = Vec::new();
        for variant in active_variants(&caps) {
            let program = device.compile(variant.kernel, &options, debug.debug_asm())?;
            programs.push((variant, program));
        }
        Ok(Benchmark { device, config, caps, debug, x, y, programs })
    }

    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Variants that will be swept, in report order
    pub fn variants(&self) -> impl Iterator<Item = &'static Variant> + '_ {
        self.programs.iter().map(|(variant, _)| *variant)
    }

    /// Sweeps all variants, one report line per intensity
    pub fn run(&mut self, out: &mut impl Write) -> Result<(), RooflineError> {
        let (entries, dtype) = (self.config.entries, self.config.dtype);
        let variants: Vec<&'static Variant> = self.variants().collect();
        for variant in variants {
            self.sweep(variant, |point| {
                let metrics = DerivedMetrics::new(&point, variant, entries, dtype)?;
                writeln!(out, "{}", ReportLine { label: variant.label, metrics })?;
                Ok(())
            })?;
        }
        out.flush()?;
        Ok(())
    }

    /// Warmup, then one timed point per intensity passed to `sink` as soon as it is measured
    pub fn sweep(
        &mut self,
        variant: &Variant,
        mut sink: impl FnMut(SweepPoint) -> Result<(), RooflineError>,
    ) -> Result<(), RooflineError> {
        let Some(&(_, program)) = self.programs.iter().find(|(v, _)| v.kernel == variant.kernel) else {
            return Err(RooflineError::config_error(
                format!("Variant {} is not enabled on {} {}", variant.label, self.device.mode(), self.caps.arch).into(),
            ));
        };
        for _ in 0..WARMUP_LAUNCHES {
            self.launch(program, WARMUP_INTENSITY)?;
        }
        self.device.finish()?;

        for k in variant.intensities() {
            let begin = Instant::now();
            for _ in 0..REPETITIONS {
                self.launch(program, k)?;
            }
            self.device.finish()?;
            let total = begin.elapsed();
            if self.debug.debug_perf() {
                eprintln!("{} k={k}: {REPETITIONS} launches in {total:?}", variant.label);
            }
            sink(SweepPoint { intensity: k, elapsed: total.as_secs_f64() / f64::from(REPETITIONS) })?;
        }
        Ok(())
    }

    /// Releases compiled kernels and both buffers, later sweeps fail.
    /// Called on drop, calling it again does nothing.
    pub fn release(&mut self) {
        for (_, program) in self.programs.drain(..) {
            self.device.release(program);
        }
        self.device.deallocate(self.x);
        self.device.deallocate(self.y);
    }

    fn launch(&mut self, program: ProgramId, k: u32) -> Result<(), RooflineError> {
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_possible_wrap)]
        let args = [
            KernelArg::Int(self.config.entries as i32),
            KernelArg::Int(k as i32),
            KernelArg::float(self.config.dtype, ALPHA),
            KernelArg::Buffer(self.x),
            KernelArg::Buffer(self.y),
        ];
        self.device.launch(program, self.config.entries, &args)?;
        Ok(())
    }
}

impl Drop for Benchmark {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fills buffer with seeded uniform values in [0, 1)
fn fill_uniform(device: &mut Device, buffer: BufferId, entries: usize, dtype: DType) -> Result<(), RooflineError> {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let mut bytes = Vec::with_capacity(FILL_CHUNK.min(entries) * dtype.byte_size());
    let mut offset = 0;
    while offset < entries {
        let n = FILL_CHUNK.min(entries - offset);
        bytes.clear();
        for _ in 0..n {
            match dtype {
                DType::F32 => rng.gen::<f32>().extend_ne_bytes(&mut bytes),
                DType::F64 => rng.gen::<f64>().extend_ne_bytes(&mut bytes),
            }
        }
        device.host_to_device(&bytes, buffer, offset * dtype.byte_size())?;
        offset += n;
    }
    Ok(())
}
