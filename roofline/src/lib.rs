//! Empirical roofline benchmark.
//!
//! Measures memory bandwidth, arithmetic intensity and throughput of synthetic
//! kernels with growing compute per element. On AMD CDNA2/CDNA3 GPUs the sweep
//! also covers matrix fused multiply add instructions.
//!
//! ```no_run
//! use roofline::{initialize_device, load_device_config, BenchConfig, Benchmark, DebugMask};
//!
//! let debug = DebugMask::from_env();
//! let config = BenchConfig::new("OpenMP", 1 << 24, "fp32")?;
//! let device = initialize_device(config.mode, &load_device_config(debug.debug_dev()), debug.debug_dev())?;
//! Benchmark::new(device, config, debug)?.run(&mut std::io::stdout())?;
//! # Ok::<(), roofline::RooflineError>(())
//! ```

pub mod backend;
mod capability;
mod config;
mod dtype;
mod error;
mod report;
mod runner;
mod slab;
mod variant;

pub use backend::{initialize_device, Device, DeviceConfig, DeviceMode};
pub use capability::Capabilities;
pub use config::{load_device_config, parse_device_config, BenchConfig, DebugMask, DEFAULT_ENTRIES};
pub use dtype::{DType, Scalar};
pub use error::{BackendError, ErrorStatus, RooflineError};
pub use report::{DerivedMetrics, ReportLine, SweepPoint};
pub use runner::{Benchmark, ALPHA, REPETITIONS, WARMUP_INTENSITY, WARMUP_LAUNCHES};
pub use variant::{active_variants, intensities, SharedMemBound, Variant, VARIANTS};
