use clap::Parser;
use roofline::{initialize_device, load_device_config, BenchConfig, Benchmark, DebugMask, RooflineError};

/// Empirical roofline benchmark. Prints bandwidth, arithmetic intensity and
/// throughput of synthetic kernels for a sweep of intensities.
#[derive(Parser, Debug)]
#[command(name = "roofline-bench", version)]
struct Args {
    /// Device mode: Serial, OpenMP, OpenCL, CUDA, HIP or SYCL
    #[arg(short, long, default_value = "Serial")]
    device: String,

    /// Number of elements in each buffer
    #[arg(short = 'n', long, default_value_t = roofline::DEFAULT_ENTRIES)]
    entries: usize,

    /// Compute type: fp64 or fp32
    #[arg(short = 't', long = "type", default_value = "fp64")]
    r#type: String,
}

fn main() -> Result<(), RooflineError> {
    let args = Args::parse();
    let config = BenchConfig::new(&args.device, args.entries, &args.r#type)?;
    let debug = DebugMask::from_env();
    let device_config = load_device_config(debug.debug_dev());
    let device = initialize_device(config.mode, &device_config, debug.debug_dev())?;
    let mut bench = Benchmark::new(device, config, debug)?;
    bench.run(&mut std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() -> Result<(), clap::Error> {
        let args = Args::try_parse_from(["roofline-bench"])?;
        assert_eq!(args.device, "Serial");
        assert_eq!(args.entries, 134_217_728);
        assert_eq!(args.r#type, "fp64");
        Ok(())
    }

    #[test]
    fn short_flags() -> Result<(), clap::Error> {
        let args = Args::try_parse_from(["roofline-bench", "-d", "HIP", "-n", "1024", "-t", "fp32"])?;
        assert_eq!(args.device, "HIP");
        assert_eq!(args.entries, 1024);
        assert_eq!(args.r#type, "fp32");
        let args = Args::try_parse_from(["roofline-bench", "--device", "OpenCL", "--entries", "7", "--type", "fp64"])?;
        assert_eq!((args.device.as_str(), args.entries, args.r#type.as_str()), ("OpenCL", 7, "fp64"));
        Ok(())
    }

    #[test]
    fn invalid_entries() {
        assert!(Args::try_parse_from(["roofline-bench", "-n", "many"]).is_err());
        assert!(matches!(BenchConfig::new("Serial", 0, "fp64"), Err(RooflineError::ConfigError(_))));
    }
}
