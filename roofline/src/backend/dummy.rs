//! Dummy device used for testing. It accepts every kernel, records every
//! launch and sleeps for the configured latency per launch on finish.

use std::time::Duration;

use nanoserde::DeJson;

use super::{BufferId, BuildOptions, DeviceMode, KernelArg, ModuleCache, ProgramId};
use crate::{
    error::{BackendError, ErrorStatus},
    slab::Slab,
};

#[derive(Debug, Default, Clone, DeJson)]
pub struct DummyConfig {
    /// Device mode the dummy device reports, default HIP
    pub mode: Option<String>,
    /// Raw architecture string, default `gfx90a:sramecc+:xnack-`
    pub arch: Option<String>,
    /// Simulated duration of one launch in nanoseconds, default 1000
    pub launch_nanos: Option<u64>,
}

/// One kernel launch as seen by the dummy device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: String,
    pub intensity: i32,
    pub work_items: usize,
}

#[derive(Debug)]
struct DummyProgram {
    kernel: String,
    module: usize,
}

#[derive(Debug)]
pub struct DummyDevice {
    mode: DeviceMode,
    arch: String,
    launch_time: Duration,
    buffers: Slab<BufferId, usize>,
    programs: Slab<ProgramId, DummyProgram>,
    modules: ModuleCache<usize>,
    compilations: usize,
    queued: u32,
    launches: Vec<LaunchRecord>,
    finishes: usize,
}

pub(super) fn initialize_device(config: &DummyConfig, debug_dev: bool) -> Result<DummyDevice, BackendError> {
    let mode = match config.mode.as_deref().unwrap_or("HIP").parse() {
        Ok(DeviceMode::Dummy) | Err(_) => {
            return Err(BackendError {
                status: ErrorStatus::Initialization,
                context: format!("Dummy device can not emulate mode {:?}", config.mode).into(),
            })
        }
        Ok(mode) => mode,
    };
    let arch = config.arch.clone().unwrap_or_else(|| "gfx90a:sramecc+:xnack-".into());
    if debug_dev {
        eprintln!("Using dummy device, emulating {mode} {arch}");
    }
    Ok(DummyDevice {
        mode,
        arch,
        launch_time: Duration::from_nanos(config.launch_nanos.unwrap_or(1000)),
        buffers: Slab::new(),
        programs: Slab::new(),
        modules: ModuleCache::new(),
        compilations: 0,
        queued: 0,
        launches: Vec::new(),
        finishes: 0,
    })
}

impl DummyDevice {
    pub(super) const fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub(super) fn arch(&self) -> &str {
        &self.arch
    }

    /// All launches so far, in submission order
    #[must_use]
    pub fn launches(&self) -> &[LaunchRecord] {
        &self.launches
    }

    /// Number of blocking synchronizations so far
    #[must_use]
    pub const fn finishes(&self) -> usize {
        self.finishes
    }

    /// Number of source compilations, kernels built with equal flags share one
    #[must_use]
    pub const fn compilations(&self) -> usize {
        self.compilations
    }

    /// Number of live allocations
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.buffers.len()
    }

    #[allow(clippy::unnecessary_wraps)]
    pub(super) fn allocate(&mut self, bytes: usize) -> Result<BufferId, BackendError> {
        Ok(self.buffers.push(bytes))
    }

    pub(super) fn deallocate(&mut self, buffer_id: BufferId) {
        self.buffers.remove(buffer_id);
    }

    pub(super) fn host_to_device(&mut self, src: &[u8], dst: BufferId, offset: usize) -> Result<(), BackendError> {
        match self.buffers.get(dst) {
            Some(&bytes) if offset + src.len() <= bytes => Ok(()),
            _ => Err(BackendError {
                status: ErrorStatus::MemoryCopyH2D,
                context: format!("Copy of {} B at offset {offset} out of bounds", src.len()).into(),
            }),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub(super) fn compile(
        &mut self,
        name: &str,
        options: &BuildOptions,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let flags = options.flags();
        let module = if let Some(module) = self.modules.acquire(&flags) {
            module
        } else {
            if debug_asm {
                eprintln!("Dummy module {}, {}", self.compilations, flags.join(" "));
            }
            self.compilations += 1;
            self.modules.insert(flags, self.compilations);
            self.compilations
        };
        Ok(self.programs.push(DummyProgram { kernel: name.into(), module }))
    }

    pub(super) fn release(&mut self, program_id: ProgramId) {
        if let Some(program) = self.programs.remove(program_id) {
            self.modules.release(program.module);
        }
    }

    pub(super) fn launch(
        &mut self,
        program_id: ProgramId,
        work_items: usize,
        args: &[KernelArg],
    ) -> Result<(), BackendError> {
        let Some(DummyProgram { kernel, .. }) = self.programs.get(program_id) else {
            return Err(BackendError { status: ErrorStatus::KernelLaunch, context: "Unknown program".into() });
        };
        let [KernelArg::Int(_), KernelArg::Int(intensity), _, KernelArg::Buffer(x), KernelArg::Buffer(y)] = args else {
            return Err(BackendError {
                status: ErrorStatus::IncorrectKernelArg,
                context: format!("Expected (N, k, a, x, y), got {args:?}").into(),
            });
        };
        if self.buffers.get(*x).is_none() || self.buffers.get(*y).is_none() {
            return Err(BackendError { status: ErrorStatus::IncorrectKernelArg, context: "Unknown buffer".into() });
        }
        self.launches.push(LaunchRecord { kernel: kernel.clone(), intensity: *intensity, work_items });
        self.queued += 1;
        Ok(())
    }

    #[allow(clippy::unnecessary_wraps)]
    pub(super) fn finish(&mut self) -> Result<(), BackendError> {
        std::thread::sleep(self.queued_time());
        self.queued = 0;
        self.finishes += 1;
        Ok(())
    }

    /// Simulated duration of all launches since the last finish
    fn queued_time(&self) -> Duration {
        self.launch_time.checked_mul(self.queued).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_time_saturates() -> Result<(), BackendError> {
        let config = DummyConfig { launch_nanos: Some(u64::MAX), ..DummyConfig::default() };
        let mut dev = initialize_device(&config, false)?;
        assert_eq!(dev.queued_time(), Duration::ZERO);
        dev.queued = 2;
        assert_eq!(dev.queued_time(), Duration::from_nanos(u64::MAX) * 2);
        dev.queued = u32::MAX;
        assert_eq!(dev.queued_time(), Duration::MAX);
        Ok(())
    }

    #[test]
    fn kernels_share_modules() -> Result<(), BackendError> {
        let mut dev = initialize_device(&DummyConfig::default(), false)?;
        let fp64 = BuildOptions::new(crate::dtype::DType::F64);
        let a = dev.compile("fma_rate", &fp64, false)?;
        let b = dev.compile("shmem1_rate", &fp64, false)?;
        let c = dev.compile("fma_rate", &BuildOptions::new(crate::dtype::DType::F32), false)?;
        assert_eq!(dev.compilations(), 2);
        dev.release(a);
        dev.release(b);
        // Module of a and b is gone, next fp64 kernel compiles again
        dev.compile("shmem2_rate", &fp64, false)?;
        assert_eq!(dev.compilations(), 3);
        dev.release(c);
        Ok(())
    }
}
