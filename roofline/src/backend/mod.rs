//! This file creates backend agnostic API to backends
//! That is it contains enums that dispatch function calls to appropriate backends.
//! Each process drives exactly one device with one in order queue,
//! launches are asynchronous and `finish` is the only blocking call.

use std::{fmt::Display, str::FromStr};

use cuda::CUDADevice;
use hip::HIPDevice;
use host::HostDevice;
use libloading::Library;
use nanoserde::DeJson;
use opencl::OpenCLDevice;

use crate::{
    dtype::DType,
    error::{BackendError, ErrorStatus, RooflineError},
    slab::SlabId,
};

mod cuda;
pub mod dummy;
mod hip;
mod host;
mod opencl;

pub use dummy::{DummyConfig, DummyDevice, LaunchRecord};
pub use cuda::CUDAConfig;
pub use hip::HIPConfig;
pub use host::HostConfig;
pub use opencl::OpenCLConfig;

/// Work items per work group for every kernel, also the shared memory tile length
pub const LOCAL_SIZE: usize = 256;

pub(crate) const OPENCL_SOURCE: &str = include_str!("../../kernels/roofline.cl");
pub(crate) const CUDA_SOURCE: &str = include_str!("../../kernels/roofline.cu");
pub(crate) const MFMA_SOURCE: &str = include_str!("../../kernels/mfma.hip");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u32);

impl From<usize> for BufferId {
    #[allow(clippy::cast_possible_truncation)]
    fn from(value: usize) -> Self {
        BufferId(value as u32)
    }
}

impl From<BufferId> for usize {
    fn from(value: BufferId) -> Self {
        value.0 as usize
    }
}

impl SlabId for BufferId {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(u32);

impl From<usize> for ProgramId {
    #[allow(clippy::cast_possible_truncation)]
    fn from(value: usize) -> Self {
        ProgramId(value as u32)
    }
}

impl From<ProgramId> for usize {
    fn from(value: ProgramId) -> Self {
        value.0 as usize
    }
}

impl SlabId for ProgramId {}

/// Device modes selectable from the command line
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceMode {
    /// Host kernels on the calling thread
    Serial,
    /// Host kernels on a thread pool
    OpenMP,
    OpenCL,
    CUDA,
    HIP,
    /// Recognized, but there is no SYCL runtime to load
    SYCL,
    /// Fake device with configurable architecture, used for testing
    Dummy,
}

impl FromStr for DeviceMode {
    type Err = RooflineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Serial" => DeviceMode::Serial,
            "OpenMP" => DeviceMode::OpenMP,
            "OpenCL" => DeviceMode::OpenCL,
            "CUDA" => DeviceMode::CUDA,
            "HIP" => DeviceMode::HIP,
            "SYCL" => DeviceMode::SYCL,
            "Dummy" => DeviceMode::Dummy,
            _ => {
                return Err(RooflineError::config_error(
                    format!("Unknown device mode {s:?}, expected Serial, OpenMP, OpenCL, CUDA, HIP or SYCL")
                        .into(),
                ))
            }
        })
    }
}

impl Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeviceMode::Serial => "Serial",
            DeviceMode::OpenMP => "OpenMP",
            DeviceMode::OpenCL => "OpenCL",
            DeviceMode::CUDA => "CUDA",
            DeviceMode::HIP => "HIP",
            DeviceMode::SYCL => "SYCL",
            DeviceMode::Dummy => "Dummy",
        })
    }
}

impl DeviceMode {
    /// Device selection string, platform and device index default to 0
    #[must_use]
    pub fn selection(&self, config: &DeviceConfig) -> String {
        match self {
            DeviceMode::Serial | DeviceMode::Dummy => format!("{{mode: '{self}'}}"),
            DeviceMode::OpenMP => match config.openmp.num_threads {
                Some(threads) => format!("{{mode: 'OpenMP', threads: {threads}}}"),
                None => "{mode: 'OpenMP'}".into(),
            },
            DeviceMode::OpenCL => format!(
                "{{mode: 'OpenCL', platform_id: {}, device_id: {}}}",
                config.opencl.platform_id(),
                config.opencl.device_id()
            ),
            DeviceMode::CUDA => format!("{{mode: 'CUDA', device_id: {}}}", config.cuda.device_id()),
            DeviceMode::HIP => format!("{{mode: 'HIP', device_id: {}}}", config.hip.device_id()),
            DeviceMode::SYCL => "{mode: 'SYCL', device_id: 0}".into(),
        }
    }
}

/// Device configuration, read from `roofline/device_config.json`
#[derive(DeJson, Debug, Default)]
pub struct DeviceConfig {
    /// Configuration of dummy device for testing
    #[nserde(default)]
    pub dummy: DummyConfig,
    /// OpenMP thread pool configuration
    #[nserde(default)]
    pub openmp: HostConfig,
    /// CUDA configuration
    #[nserde(default)]
    pub cuda: CUDAConfig,
    /// HIP configuration
    #[nserde(default)]
    pub hip: HIPConfig,
    /// `OpenCL` configuration
    #[nserde(default)]
    pub opencl: OpenCLConfig,
}

/// Defines passed to the kernel compiler, `dfloat` is always set from dtype
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub dtype: DType,
    pub defines: Vec<(&'static str, String)>,
}

impl BuildOptions {
    #[must_use]
    pub fn new(dtype: DType) -> Self {
        Self { dtype, defines: Vec::new() }
    }

    #[must_use]
    pub fn define(mut self, name: &'static str, value: impl Display) -> Self {
        self.defines.push((name, value.to_string()));
        self
    }

    /// Compiler flags in `-Dname=value` form
    #[must_use]
    pub fn flags(&self) -> Vec<String> {
        let mut flags = vec![format!("-Ddfloat={}", self.dtype.c_name())];
        flags.extend(self.defines.iter().map(|(name, value)| format!("-D{name}={value}")));
        flags
    }

    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.iter().any(|(n, _)| *n == name)
    }
}

/// Kernel argument passed by value, buffers are passed as device pointers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Int(i32),
    F32(f32),
    F64(f64),
    Buffer(BufferId),
}

impl KernelArg {
    /// Scalar argument of given precision
    #[must_use]
    pub fn float(dtype: DType, x: f64) -> KernelArg {
        match dtype {
            #[allow(clippy::cast_possible_truncation)]
            DType::F32 => KernelArg::F32(x as f32),
            DType::F64 => KernelArg::F64(x),
        }
    }

    /// Bit pattern of a by value argument, stored at offset 0 of an 8 byte slot
    pub(crate) fn slot(&self, buffer_ptr: impl Fn(BufferId) -> u64) -> u64 {
        let mut bytes = [0u8; 8];
        match *self {
            KernelArg::Int(x) => bytes[..4].copy_from_slice(&x.to_ne_bytes()),
            KernelArg::F32(x) => bytes[..4].copy_from_slice(&x.to_ne_bytes()),
            KernelArg::F64(x) => bytes.copy_from_slice(&x.to_ne_bytes()),
            KernelArg::Buffer(id) => bytes.copy_from_slice(&buffer_ptr(id).to_ne_bytes()),
        }
        u64::from_ne_bytes(bytes)
    }

    /// Size in bytes of by value argument
    pub(crate) const fn size(&self) -> usize {
        match self {
            KernelArg::Int(_) | KernelArg::F32(_) => 4,
            KernelArg::F64(_) => 8,
            KernelArg::Buffer(_) => std::mem::size_of::<u64>(),
        }
    }
}

pub(crate) fn load_library(paths: &[&str], name: &str) -> Result<Library, BackendError> {
    let library = paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
    library.ok_or_else(|| BackendError {
        status: ErrorStatus::DyLibNotFound,
        context: format!("{name} not found.").into(),
    })
}

pub(crate) fn load_symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, BackendError> {
    match unsafe { library.get::<T>(name) } {
        Ok(symbol) => Ok(*symbol),
        Err(e) => Err(BackendError {
            status: ErrorStatus::DyLibNotFound,
            context: format!("Missing symbol {}, {e}", String::from_utf8_lossy(name)).into(),
        }),
    }
}

/// Initializes the device selected by mode
pub fn initialize_device(
    mode: DeviceMode,
    config: &DeviceConfig,
    debug_dev: bool,
) -> Result<Device, BackendError> {
    if debug_dev {
        eprintln!("Initializing device {}", mode.selection(config));
    }
    Ok(match mode {
        DeviceMode::Serial => Device::Host(host::initialize_device(&config.openmp, false, debug_dev)?),
        DeviceMode::OpenMP => Device::Host(host::initialize_device(&config.openmp, true, debug_dev)?),
        DeviceMode::OpenCL => Device::OpenCL(opencl::initialize_device(&config.opencl, debug_dev)?),
        DeviceMode::CUDA => Device::CUDA(cuda::initialize_device(&config.cuda, debug_dev)?),
        DeviceMode::HIP => Device::HIP(hip::initialize_device(&config.hip, debug_dev)?),
        DeviceMode::SYCL => {
            return Err(BackendError {
                status: ErrorStatus::Initialization,
                context: "SYCL runtime is not supported, use OpenCL on the same device.".into(),
            })
        }
        DeviceMode::Dummy => Device::Dummy(dummy::initialize_device(&config.dummy, debug_dev)?),
    })
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug)]
pub enum Device {
    Host(HostDevice),
    OpenCL(OpenCLDevice),
    CUDA(CUDADevice),
    HIP(HIPDevice),
    Dummy(DummyDevice),
}

impl Device {
    /// Backend this device belongs to. Dummy reports the mode it emulates.
    #[must_use]
    pub fn mode(&self) -> DeviceMode {
        match self {
            Device::Host(dev) => dev.mode(),
            Device::OpenCL(_) => DeviceMode::OpenCL,
            Device::CUDA(_) => DeviceMode::CUDA,
            Device::HIP(_) => DeviceMode::HIP,
            Device::Dummy(dev) => dev.mode(),
        }
    }

    /// Raw architecture string, HIP devices include feature qualifiers
    #[must_use]
    pub fn arch(&self) -> &str {
        match self {
            Device::Host(dev) => dev.arch(),
            Device::OpenCL(dev) => dev.arch(),
            Device::CUDA(dev) => dev.arch(),
            Device::HIP(dev) => dev.arch(),
            Device::Dummy(dev) => dev.arch(),
        }
    }

    pub fn allocate(&mut self, bytes: usize) -> Result<BufferId, BackendError> {
        match self {
            Device::Host(dev) => dev.allocate(bytes),
            Device::OpenCL(dev) => dev.allocate(bytes),
            Device::CUDA(dev) => dev.allocate(bytes),
            Device::HIP(dev) => dev.allocate(bytes),
            Device::Dummy(dev) => dev.allocate(bytes),
        }
    }

    pub fn deallocate(&mut self, buffer_id: BufferId) {
        match self {
            Device::Host(dev) => dev.deallocate(buffer_id),
            Device::OpenCL(dev) => dev.deallocate(buffer_id),
            Device::CUDA(dev) => dev.deallocate(buffer_id),
            Device::HIP(dev) => dev.deallocate(buffer_id),
            Device::Dummy(dev) => dev.deallocate(buffer_id),
        }
    }

    /// Blocking copy of `src` into `dst` starting at byte `offset`
    pub fn host_to_device(&mut self, src: &[u8], dst: BufferId, offset: usize) -> Result<(), BackendError> {
        match self {
            Device::Host(dev) => dev.host_to_device(src, dst, offset),
            Device::OpenCL(dev) => dev.host_to_device(src, dst, offset),
            Device::CUDA(dev) => dev.host_to_device(src, dst, offset),
            Device::HIP(dev) => dev.host_to_device(src, dst, offset),
            Device::Dummy(dev) => dev.host_to_device(src, dst, offset),
        }
    }

    pub fn compile(
        &mut self,
        name: &str,
        options: &BuildOptions,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        match self {
            Device::Host(dev) => dev.compile(name, options, debug_asm),
            Device::OpenCL(dev) => dev.compile(name, options, debug_asm),
            Device::CUDA(dev) => dev.compile(name, options, debug_asm),
            Device::HIP(dev) => dev.compile(name, options, debug_asm),
            Device::Dummy(dev) => dev.compile(name, options, debug_asm),
        }
    }

    pub fn release(&mut self, program_id: ProgramId) {
        match self {
            Device::Host(dev) => dev.release(program_id),
            Device::OpenCL(dev) => dev.release(program_id),
            Device::CUDA(dev) => dev.release(program_id),
            Device::HIP(dev) => dev.release(program_id),
            Device::Dummy(dev) => dev.release(program_id),
        }
    }

    /// Enqueues kernel over `work_items` work items, does not wait for completion
    pub fn launch(
        &mut self,
        program_id: ProgramId,
        work_items: usize,
        args: &[KernelArg],
    ) -> Result<(), BackendError> {
        match self {
            Device::Host(dev) => dev.launch(program_id, work_items, args),
            Device::OpenCL(dev) => dev.launch(program_id, work_items, args),
            Device::CUDA(dev) => dev.launch(program_id, work_items, args),
            Device::HIP(dev) => dev.launch(program_id, work_items, args),
            Device::Dummy(dev) => dev.launch(program_id, work_items, args),
        }
    }

    /// Blocks until all enqueued work completed
    pub fn finish(&mut self) -> Result<(), BackendError> {
        match self {
            Device::Host(_) => Ok(()),
            Device::OpenCL(dev) => dev.finish(),
            Device::CUDA(dev) => dev.finish(),
            Device::HIP(dev) => dev.finish(),
            Device::Dummy(dev) => dev.finish(),
        }
    }
}

/// Number of work groups covering `work_items`
pub(crate) const fn num_groups(work_items: usize) -> usize {
    work_items.div_ceil(LOCAL_SIZE)
}

/// Compiled modules shared by every kernel built with the same flags.
/// Each kernel holds one use of its module, a module is handed back for
/// unloading once its last kernel is released.
#[derive(Debug)]
pub(crate) struct ModuleCache<M> {
    modules: Vec<CachedModule<M>>,
}

#[derive(Debug)]
struct CachedModule<M> {
    flags: Vec<String>,
    module: M,
    users: usize,
}

impl<M: Copy + PartialEq> ModuleCache<M> {
    pub(crate) const fn new() -> Self {
        ModuleCache { modules: Vec::new() }
    }

    /// Takes one more use of module built with `flags`, if there is one
    pub(crate) fn acquire(&mut self, flags: &[String]) -> Option<M> {
        let cached = self.modules.iter_mut().find(|cached| cached.flags == flags)?;
        cached.users += 1;
        Some(cached.module)
    }

    /// Stores freshly compiled module with one use
    pub(crate) fn insert(&mut self, flags: Vec<String>, module: M) {
        self.modules.push(CachedModule { flags, module, users: 1 });
    }

    /// Gives up one use of module, returns it when nothing uses it anymore
    pub(crate) fn release(&mut self, module: M) -> Option<M> {
        let idx = self.modules.iter().position(|cached| cached.module == module)?;
        self.modules[idx].users -= 1;
        if self.modules[idx].users == 0 {
            Some(self.modules.remove(idx).module)
        } else {
            None
        }
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = M> + '_ {
        self.modules.drain(..).map(|cached| cached.module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_mode() -> Result<(), RooflineError> {
        for mode in ["Serial", "OpenMP", "OpenCL", "CUDA", "HIP", "SYCL", "Dummy"] {
            assert_eq!(mode.parse::<DeviceMode>()?.to_string(), mode);
        }
        assert!(matches!("Vulkan".parse::<DeviceMode>(), Err(RooflineError::ConfigError(_))));
        assert!(matches!("serial".parse::<DeviceMode>(), Err(RooflineError::ConfigError(_))));
        Ok(())
    }

    #[test]
    fn device_selection_defaults_to_index_zero() {
        let config = DeviceConfig::default();
        assert_eq!(DeviceMode::Serial.selection(&config), "{mode: 'Serial'}");
        assert_eq!(
            DeviceMode::OpenCL.selection(&config),
            "{mode: 'OpenCL', platform_id: 0, device_id: 0}"
        );
        assert_eq!(DeviceMode::CUDA.selection(&config), "{mode: 'CUDA', device_id: 0}");
        assert_eq!(DeviceMode::HIP.selection(&config), "{mode: 'HIP', device_id: 0}");
    }

    #[test]
    fn sycl_is_not_available() {
        let Err(err) = initialize_device(DeviceMode::SYCL, &DeviceConfig::default(), false) else {
            panic!("SYCL device must not initialize");
        };
        assert_eq!(err.status, ErrorStatus::Initialization);
    }

    #[test]
    fn build_flags() {
        let options = BuildOptions::new(DType::F32).define("HAS_FP32_MFMA", 1);
        assert_eq!(options.flags(), vec!["-Ddfloat=float".to_string(), "-DHAS_FP32_MFMA=1".into()]);
        assert!(options.is_defined("HAS_FP32_MFMA"));
        assert!(!options.is_defined("HAS_FP64_MFMA"));
    }

    #[test]
    fn kernel_arg_slots() {
        let ptr = |_| 0xdead_beef_u64;
        let a = KernelArg::F32(0.5);
        assert_eq!(a.size(), 4);
        let slot = a.slot(ptr).to_ne_bytes();
        assert_eq!(f32::from_ne_bytes([slot[0], slot[1], slot[2], slot[3]]), 0.5);
        assert_eq!(KernelArg::F64(0.5).slot(ptr), 0.5f64.to_bits());
        assert_eq!(KernelArg::Buffer(BufferId(3)).slot(ptr), 0xdead_beef);
        assert_eq!(num_groups(257), 2);
        assert_eq!(num_groups(256), 1);
    }

    #[test]
    fn modules_shared_per_flags() {
        let fp64 = BuildOptions::new(DType::F64).flags();
        let fp32 = BuildOptions::new(DType::F32).flags();
        let mut cache = ModuleCache::new();
        assert_eq!(cache.acquire(&fp64), None);
        cache.insert(fp64.clone(), 1u32);
        assert_eq!(cache.acquire(&fp64), Some(1));
        assert_eq!(cache.acquire(&fp32), None);
        cache.insert(fp32, 2);
        // Two kernels use module 1
        assert_eq!(cache.release(1), None);
        assert_eq!(cache.release(1), Some(1));
        assert_eq!(cache.release(1), None);
        assert_eq!(cache.drain().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn device_config_partial_json() -> Result<(), nanoserde::DeJsonErr> {
        let config = DeviceConfig::deserialize_json(r#"{"hip": {"device_id": 1}, "openmp": {"num_threads": 4}}"#)?;
        assert_eq!(config.hip.device_id(), 1);
        assert_eq!(config.cuda.device_id(), 0);
        assert_eq!(config.openmp.num_threads, Some(4));
        assert_eq!(DeviceMode::HIP.selection(&config), "{mode: 'HIP', device_id: 1}");
        Ok(())
    }
}
