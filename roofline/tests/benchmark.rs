use roofline::{
    backend::{DummyDevice, LaunchRecord},
    initialize_device, BenchConfig, Benchmark, DebugMask, Device, DeviceConfig, DeviceMode, RooflineError, VARIANTS,
    WARMUP_INTENSITY, WARMUP_LAUNCHES,
};

fn dummy(mode: &str, arch: &str) -> Result<Device, RooflineError> {
    let mut config = DeviceConfig::default();
    config.dummy.mode = Some(mode.into());
    config.dummy.arch = Some(arch.into());
    config.dummy.launch_nanos = Some(100);
    Ok(initialize_device(DeviceMode::Dummy, &config, false)?)
}

fn run(bench: &mut Benchmark) -> Result<Vec<String>, RooflineError> {
    let mut out = Vec::new();
    bench.run(&mut out)?;
    let out = String::from_utf8(out).map_err(|e| RooflineError::config_error(format!("{e}").into()))?;
    Ok(out.lines().map(String::from).collect())
}

fn dummy_device(bench: &Benchmark) -> &DummyDevice {
    let Device::Dummy(dev) = bench.device() else {
        panic!("expected dummy device");
    };
    dev
}

fn launches(bench: &Benchmark) -> (Vec<LaunchRecord>, usize) {
    let dev = dummy_device(bench);
    (dev.launches().to_vec(), dev.finishes())
}

#[test]
fn mfma_device_runs_all_variants() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 1 << 16, "fp64")?;
    let mut bench = Benchmark::new(dummy("HIP", "gfx942:sramecc+:xnack-")?, config, DebugMask::default())?;
    assert!(bench.capabilities().fast_mma);
    assert_eq!(bench.capabilities().arch, "gfx942");
    let lines = run(&mut bench)?;

    // 13 intensities of FMA variants, 11 of MFMA4 and 9 of MFMA16
    assert_eq!(lines.len(), 3 * 13 + 3 * 11 + 3 * 9);
    let mut lines = lines.iter();
    for variant in &VARIANTS {
        for _ in variant.intensities() {
            let Some(line) = lines.next() else { panic!("missing line for {}", variant.label) };
            assert!(line.starts_with(&format!("{}:", variant.label)), "{line}");
            assert_eq!(line.contains("SHMEM AI="), variant.shared_mem.is_some(), "{line}");
        }
    }
    Ok(())
}

#[test]
fn launch_protocol() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 1000, "fp32")?;
    let mut bench = Benchmark::new(dummy("HIP", "gfx90a:sramecc+:xnack-")?, config, DebugMask::default())?;
    let (before, finishes) = launches(&bench);
    assert!(before.is_empty());
    assert_eq!(finishes, 0);
    run(&mut bench)?;

    let (launches, finishes) = launches(&bench);
    let mut expected = Vec::new();
    let mut expected_finishes = 0;
    for variant in &VARIANTS {
        for _ in 0..WARMUP_LAUNCHES {
            expected.push((variant.kernel, WARMUP_INTENSITY));
        }
        expected_finishes += 1;
        for k in variant.intensities() {
            for _ in 0..20 {
                expected.push((variant.kernel, k));
            }
            expected_finishes += 1;
        }
    }
    let seen: Vec<(&str, u32)> = launches.iter().map(|l| (l.kernel.as_str(), l.intensity as u32)).collect();
    assert_eq!(seen, expected);
    assert_eq!(finishes, expected_finishes);
    assert!(launches.iter().all(|l| l.work_items == 1000));
    Ok(())
}

#[test]
fn no_mfma_on_rdna() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 4096, "fp64")?;
    let mut bench = Benchmark::new(dummy("HIP", "gfx1030")?, config, DebugMask::default())?;
    assert!(!bench.capabilities().fast_mma);
    assert_eq!(bench.variants().count(), 3);
    let lines = run(&mut bench)?;
    assert_eq!(lines.len(), 3 * 13);
    assert!(lines.iter().all(|line| !line.starts_with("MFMA")));

    // Sweeping a variant that was not compiled is an error
    let Some(mfma4) = VARIANTS.iter().find(|v| v.label == "MFMA4") else { panic!() };
    assert!(matches!(bench.sweep(mfma4, |_| Ok(())), Err(RooflineError::ConfigError(_))));
    Ok(())
}

#[test]
fn no_mfma_outside_hip() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 4096, "fp64")?;
    let bench = Benchmark::new(dummy("OpenCL", "gfx942:sramecc+:xnack-")?, config, DebugMask::default())?;
    assert!(!bench.capabilities().fast_mma);
    // Qualifiers are kept outside HIP
    assert_eq!(bench.capabilities().arch, "gfx942:sramecc+:xnack-");
    assert_eq!(bench.variants().count(), 3);
    Ok(())
}

#[test]
fn sweep_points_in_order() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 256, "fp64")?;
    let mut bench = Benchmark::new(dummy("HIP", "gfx1030")?, config, DebugMask::default())?;
    let mut points = Vec::new();
    bench.sweep(&VARIANTS[1], |point| {
        points.push(point);
        Ok(())
    })?;
    let ks: Vec<u32> = points.iter().map(|p| p.intensity).collect();
    assert_eq!(ks, roofline::intensities(4096).collect::<Vec<_>>());
    assert!(points.iter().all(|p| p.elapsed > 0.0));
    Ok(())
}

#[test]
fn release_frees_buffers_and_kernels() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 4096, "fp32")?;
    let mut bench = Benchmark::new(dummy("HIP", "gfx942")?, config, DebugMask::default())?;
    assert_eq!(dummy_device(&bench).allocations(), 2);
    // All nine variants are built from one module
    assert_eq!(bench.variants().count(), 9);
    assert_eq!(dummy_device(&bench).compilations(), 1);

    bench.release();
    assert_eq!(dummy_device(&bench).allocations(), 0);
    assert_eq!(bench.variants().count(), 0);
    assert!(matches!(bench.sweep(&VARIANTS[0], |_| Ok(())), Err(RooflineError::ConfigError(_))));
    bench.release();
    assert_eq!(dummy_device(&bench).allocations(), 0);
    Ok(())
}

#[test]
fn debug_messages_stay_out_of_report() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Dummy", 1024, "fp64")?;
    let device = initialize_device(DeviceMode::Dummy, &DeviceConfig::default(), true)?;
    let mut bench = Benchmark::new(device, config, DebugMask::from(0b111))?;
    let lines = run(&mut bench)?;
    assert_eq!(lines.len(), 3 * 13 + 3 * 11 + 3 * 9);
    assert!(lines.iter().all(|line| line.contains(" BW=") && line.contains("GFLOPS=")));
    Ok(())
}

#[test]
fn host_serial() -> Result<(), RooflineError> {
    let config = BenchConfig::new("Serial", 256, "fp32")?;
    let device = initialize_device(config.mode, &DeviceConfig::default(), false)?;
    let mut bench = Benchmark::new(device, config, DebugMask::default())?;
    assert!(!bench.capabilities().fast_mma);
    let lines = run(&mut bench)?;
    assert_eq!(lines.len(), 3 * 13);
    // fp32 FMA at k = 1 moves 8 bytes per 2 flops
    assert!(lines[0].starts_with("FMA:"));
    assert!(lines[0].contains("AI=    0.25 FLOP/B"), "{}", lines[0]);
    assert!(lines[12].contains("AI= 1024.00 FLOP/B"), "{}", lines[12]);
    Ok(())
}

#[test]
fn host_openmp() -> Result<(), RooflineError> {
    let config = BenchConfig::new("OpenMP", 512, "fp64")?;
    let mut device_config = DeviceConfig::default();
    device_config.openmp.num_threads = Some(2);
    let device = initialize_device(config.mode, &device_config, false)?;
    assert_eq!(device.mode(), DeviceMode::OpenMP);
    let mut bench = Benchmark::new(device, config, DebugMask::default())?;
    let lines = run(&mut bench)?;
    assert_eq!(lines.len(), 3 * 13);
    assert!(lines[13].starts_with("FMA SHMEM1:"));
    assert!(lines[13].ends_with("SHMEM AI=    0.25 FLOP/B"), "{}", lines[13]);
    Ok(())
}
