//! CUDA backend, kernels are compiled at runtime with nvrtc

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::{
    ffi::{c_char, c_int, c_uint, c_void, CString},
    ptr,
};

use libloading::Library;
use nanoserde::DeJson;

use super::{
    load_library, load_symbol, num_groups, BufferId, BuildOptions, KernelArg, ModuleCache, ProgramId, CUDA_SOURCE,
    LOCAL_SIZE,
};
use crate::{
    error::{BackendError, ErrorStatus},
    slab::Slab,
};

/// CUDA configuration
#[derive(Debug, Default, DeJson)]
pub struct CUDAConfig {
    /// Device ordinal, default 0
    pub device_id: Option<i32>,
}

impl CUDAConfig {
    #[must_use]
    pub fn device_id(&self) -> i32 {
        self.device_id.unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct CUDADevice {
    // Just to keep the driver loaded
    #[allow(unused)]
    cuda: Library,
    nvrtc: Library,
    context: CUcontext,
    stream: CUstream,
    compute_capability: [c_int; 2],
    arch: String,
    buffers: Slab<BufferId, CUDABuffer>,
    programs: Slab<ProgramId, CUDAProgram>,
    modules: ModuleCache<CUmodule>,
    cuMemAlloc: unsafe extern "C" fn(*mut CUdeviceptr, usize) -> CUDAStatus,
    cuMemFree: unsafe extern "C" fn(CUdeviceptr) -> CUDAStatus,
    cuMemcpyHtoD: unsafe extern "C" fn(CUdeviceptr, *const c_void, usize) -> CUDAStatus,
    cuModuleLoadDataEx: unsafe extern "C" fn(
        *mut CUmodule,
        *const c_void,
        c_uint,
        *mut CUjit_option,
        *mut *mut c_void,
    ) -> CUDAStatus,
    cuModuleGetFunction: unsafe extern "C" fn(*mut CUfunction, CUmodule, *const c_char) -> CUDAStatus,
    cuModuleUnload: unsafe extern "C" fn(CUmodule) -> CUDAStatus,
    cuLaunchKernel: unsafe extern "C" fn(
        CUfunction,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        CUstream,
        *mut *mut c_void,
        *mut *mut c_void,
    ) -> CUDAStatus,
    cuStreamSynchronize: unsafe extern "C" fn(CUstream) -> CUDAStatus,
    cuStreamDestroy: unsafe extern "C" fn(CUstream) -> CUDAStatus,
    cuCtxDestroy: unsafe extern "C" fn(CUcontext) -> CUDAStatus,
}

#[derive(Debug)]
struct CUDABuffer {
    ptr: CUdeviceptr,
    bytes: usize,
}

#[derive(Debug)]
struct CUDAProgram {
    module: CUmodule,
    function: CUfunction,
}

pub(super) fn initialize_device(config: &CUDAConfig, debug_dev: bool) -> Result<CUDADevice, BackendError> {
    let cuda_paths = [
        "libcuda.so.1",
        "libcuda.so",
        "/lib/x86_64-linux-gnu/libcuda.so",
        "/lib64/libcuda.so",
        "/usr/lib/x86_64-linux-gnu/libcuda.so.1",
        "/usr/lib64/libcuda.so",
    ];
    let cuda = load_library(&cuda_paths, "CUDA driver")?;
    let nvrtc_paths = [
        "libnvrtc.so",
        "libnvrtc.so.12",
        "libnvrtc.so.11.2",
        "/usr/local/cuda/lib64/libnvrtc.so",
        "/opt/cuda/lib64/libnvrtc.so",
        "/lib/x86_64-linux-gnu/libnvrtc.so",
    ];
    let nvrtc = load_library(&nvrtc_paths, "CUDA runtime compiler (nvrtc)")?;

    let cuInit: unsafe extern "C" fn(c_uint) -> CUDAStatus = load_symbol(&cuda, b"cuInit\0")?;
    let cuDriverGetVersion: unsafe extern "C" fn(*mut c_int) -> CUDAStatus =
        load_symbol(&cuda, b"cuDriverGetVersion\0")?;
    let cuDeviceGetCount: unsafe extern "C" fn(*mut c_int) -> CUDAStatus = load_symbol(&cuda, b"cuDeviceGetCount\0")?;
    let cuDeviceGet: unsafe extern "C" fn(*mut CUdevice, c_int) -> CUDAStatus = load_symbol(&cuda, b"cuDeviceGet\0")?;
    let cuDeviceGetName: unsafe extern "C" fn(*mut c_char, c_int, CUdevice) -> CUDAStatus =
        load_symbol(&cuda, b"cuDeviceGetName\0")?;
    let cuDeviceGetAttribute: unsafe extern "C" fn(*mut c_int, CUdevice_attribute, CUdevice) -> CUDAStatus =
        load_symbol(&cuda, b"cuDeviceGetAttribute\0")?;
    let cuCtxCreate: unsafe extern "C" fn(*mut CUcontext, c_uint, CUdevice) -> CUDAStatus =
        load_symbol(&cuda, b"cuCtxCreate_v2\0")?;
    let cuStreamCreate: unsafe extern "C" fn(*mut CUstream, c_uint) -> CUDAStatus =
        load_symbol(&cuda, b"cuStreamCreate\0")?;

    unsafe { cuInit(0) }.check(ErrorStatus::Initialization)?;
    let mut driver_version = 0;
    unsafe { cuDriverGetVersion(&mut driver_version) }.check(ErrorStatus::Initialization)?;
    let mut num_devices = 0;
    unsafe { cuDeviceGetCount(&mut num_devices) }.check(ErrorStatus::DeviceEnumeration)?;
    if config.device_id() < 0 || config.device_id() >= num_devices {
        return Err(BackendError {
            status: ErrorStatus::DeviceEnumeration,
            context: format!("CUDA device {} not found, {num_devices} available.", config.device_id()).into(),
        });
    }
    let mut device: CUdevice = 0;
    unsafe { cuDeviceGet(&mut device, config.device_id()) }.check(ErrorStatus::DeviceEnumeration)?;
    let mut major = 0;
    let mut minor = 0;
    unsafe {
        cuDeviceGetAttribute(&mut major, CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR, device)
    }
    .check(ErrorStatus::DeviceQuery)?;
    unsafe {
        cuDeviceGetAttribute(&mut minor, CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR, device)
    }
    .check(ErrorStatus::DeviceQuery)?;
    if debug_dev {
        let mut device_name = [0 as c_char; 100];
        unsafe { cuDeviceGetName(device_name.as_mut_ptr(), 100, device) }.check(ErrorStatus::DeviceQuery)?;
        eprintln!(
            "Using CUDA driver, driver version: {}.{}, device {:?}, compute capability: {major}.{minor}",
            driver_version / 1000,
            (driver_version % 1000) / 10,
            unsafe { std::ffi::CStr::from_ptr(device_name.as_ptr()) },
        );
    }
    let mut context: CUcontext = ptr::null_mut();
    unsafe { cuCtxCreate(&mut context, 0, device) }.check(ErrorStatus::Initialization)?;
    let mut stream: CUstream = ptr::null_mut();
    unsafe { cuStreamCreate(&mut stream, 0) }.check(ErrorStatus::Initialization)?;

    Ok(CUDADevice {
        context,
        stream,
        compute_capability: [major, minor],
        arch: format!("sm_{major}{minor}"),
        buffers: Slab::new(),
        programs: Slab::new(),
        modules: ModuleCache::new(),
        cuMemAlloc: load_symbol(&cuda, b"cuMemAlloc_v2\0")?,
        cuMemFree: load_symbol(&cuda, b"cuMemFree_v2\0")?,
        cuMemcpyHtoD: load_symbol(&cuda, b"cuMemcpyHtoD_v2\0")?,
        cuModuleLoadDataEx: load_symbol(&cuda, b"cuModuleLoadDataEx\0")?,
        cuModuleGetFunction: load_symbol(&cuda, b"cuModuleGetFunction\0")?,
        cuModuleUnload: load_symbol(&cuda, b"cuModuleUnload\0")?,
        cuLaunchKernel: load_symbol(&cuda, b"cuLaunchKernel\0")?,
        cuStreamSynchronize: load_symbol(&cuda, b"cuStreamSynchronize\0")?,
        cuStreamDestroy: load_symbol(&cuda, b"cuStreamDestroy_v2\0")?,
        cuCtxDestroy: load_symbol(&cuda, b"cuCtxDestroy_v2\0")?,
        cuda,
        nvrtc,
    })
}

impl CUDADevice {
    pub(super) fn arch(&self) -> &str {
        &self.arch
    }

    pub(super) fn allocate(&mut self, bytes: usize) -> Result<BufferId, BackendError> {
        let mut ptr: CUdeviceptr = 0;
        unsafe { (self.cuMemAlloc)(&mut ptr, bytes) }.check(ErrorStatus::MemoryAllocation)?;
        Ok(self.buffers.push(CUDABuffer { ptr, bytes }))
    }

    pub(super) fn deallocate(&mut self, buffer_id: BufferId) {
        if let Some(buffer) = self.buffers.remove(buffer_id) {
            let _ = unsafe { (self.cuMemFree)(buffer.ptr) };
        }
    }

    pub(super) fn host_to_device(&mut self, src: &[u8], dst: BufferId, offset: usize) -> Result<(), BackendError> {
        let Some(dst) = self.buffers.get(dst) else {
            return Err(BackendError { status: ErrorStatus::MemoryCopyH2D, context: "Unknown buffer".into() });
        };
        debug_assert!(offset + src.len() <= dst.bytes);
        unsafe { (self.cuMemcpyHtoD)(dst.ptr + offset as u64, src.as_ptr().cast(), src.len()) }
            .check(ErrorStatus::MemoryCopyH2D)
    }

    pub(super) fn compile(
        &mut self,
        name: &str,
        options: &BuildOptions,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let mut flags = vec![format!(
            "--gpu-architecture=compute_{}{}",
            self.compute_capability[0], self.compute_capability[1]
        )];
        flags.extend(options.flags());
        let kernel_name = nul_terminated(name, ErrorStatus::KernelCompilation)?;
        let module = if let Some(module) = self.modules.acquire(&flags) {
            module
        } else {
            if debug_asm {
                eprintln!("{CUDA_SOURCE}\nBuild options: {}", flags.join(" "));
            }
            let ptx = self.compile_ptx(&flags)?;
            let mut module: CUmodule = ptr::null_mut();
            unsafe {
                (self.cuModuleLoadDataEx)(&mut module, ptx.as_ptr().cast(), 0, ptr::null_mut(), ptr::null_mut())
            }
            .check(ErrorStatus::KernelCompilation)?;
            self.modules.insert(flags, module);
            module
        };
        let mut function: CUfunction = ptr::null_mut();
        if let Err(e) = unsafe { (self.cuModuleGetFunction)(&mut function, module, kernel_name.as_ptr()) }
            .check(ErrorStatus::KernelCompilation)
        {
            self.unload(module);
            return Err(BackendError { status: e.status, context: format!("{name}, {}", e.context).into() });
        }
        Ok(self.programs.push(CUDAProgram { module, function }))
    }

    fn unload(&mut self, module: CUmodule) {
        if let Some(module) = self.modules.release(module) {
            let _ = unsafe { (self.cuModuleUnload)(module) };
        }
    }

    fn compile_ptx(&self, flags: &[String]) -> Result<Vec<u8>, BackendError> {
        let nvrtcCreateProgram: unsafe extern "C" fn(
            *mut nvrtcProgram,
            *const c_char,
            *const c_char,
            c_int,
            *const *const c_char,
            *const *const c_char,
        ) -> nvrtcResult = load_symbol(&self.nvrtc, b"nvrtcCreateProgram\0")?;
        let nvrtcCompileProgram: unsafe extern "C" fn(nvrtcProgram, c_int, *const *const c_char) -> nvrtcResult =
            load_symbol(&self.nvrtc, b"nvrtcCompileProgram\0")?;
        let nvrtcGetPTXSize: unsafe extern "C" fn(nvrtcProgram, *mut usize) -> nvrtcResult =
            load_symbol(&self.nvrtc, b"nvrtcGetPTXSize\0")?;
        let nvrtcGetPTX: unsafe extern "C" fn(nvrtcProgram, *mut c_char) -> nvrtcResult =
            load_symbol(&self.nvrtc, b"nvrtcGetPTX\0")?;
        let nvrtcGetProgramLogSize: unsafe extern "C" fn(nvrtcProgram, *mut usize) -> nvrtcResult =
            load_symbol(&self.nvrtc, b"nvrtcGetProgramLogSize\0")?;
        let nvrtcGetProgramLog: unsafe extern "C" fn(nvrtcProgram, *mut c_char) -> nvrtcResult =
            load_symbol(&self.nvrtc, b"nvrtcGetProgramLog\0")?;
        let nvrtcDestroyProgram: unsafe extern "C" fn(*mut nvrtcProgram) -> nvrtcResult =
            load_symbol(&self.nvrtc, b"nvrtcDestroyProgram\0")?;

        let source = nul_terminated(CUDA_SOURCE, ErrorStatus::KernelCompilation)?;
        let flags = flags
            .iter()
            .map(|flag| nul_terminated(flag, ErrorStatus::KernelCompilation))
            .collect::<Result<Vec<CString>, BackendError>>()?;
        let flag_ptrs: Vec<*const c_char> = flags.iter().map(|flag| flag.as_ptr()).collect();

        let mut program: nvrtcProgram = ptr::null_mut();
        unsafe {
            nvrtcCreateProgram(
                &mut program,
                source.as_ptr(),
                c"roofline.cu".as_ptr(),
                0,
                ptr::null(),
                ptr::null(),
            )
        }
        .check(ErrorStatus::KernelCompilation)?;
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_possible_wrap)]
        let compiled = unsafe { nvrtcCompileProgram(program, flag_ptrs.len() as c_int, flag_ptrs.as_ptr()) }
            .check(ErrorStatus::KernelCompilation);
        if let Err(e) = compiled {
            let mut log_size: usize = 0;
            let mut log: Vec<u8> = Vec::new();
            if unsafe { nvrtcGetProgramLogSize(program, &mut log_size) } == nvrtcResult::NVRTC_SUCCESS {
                log = vec![0; log_size];
                let _ = unsafe { nvrtcGetProgramLog(program, log.as_mut_ptr().cast()) };
            }
            let _ = unsafe { nvrtcDestroyProgram(&mut program) };
            return Err(BackendError {
                status: e.status,
                context: format!("{} {}", e.context, String::from_utf8_lossy(&log).trim_end_matches('\0')).into(),
            });
        }
        let mut ptx_size: usize = 0;
        unsafe { nvrtcGetPTXSize(program, &mut ptx_size) }.check(ErrorStatus::KernelCompilation)?;
        let mut ptx: Vec<u8> = vec![0; ptx_size];
        unsafe { nvrtcGetPTX(program, ptx.as_mut_ptr().cast()) }.check(ErrorStatus::KernelCompilation)?;
        unsafe { nvrtcDestroyProgram(&mut program) }.check(ErrorStatus::KernelCompilation)?;
        Ok(ptx)
    }

    pub(super) fn release(&mut self, program_id: ProgramId) {
        if let Some(program) = self.programs.remove(program_id) {
            self.unload(program.module);
        }
    }

    pub(super) fn launch(
        &mut self,
        program_id: ProgramId,
        work_items: usize,
        args: &[KernelArg],
    ) -> Result<(), BackendError> {
        let Some(program) = self.programs.get(program_id) else {
            return Err(BackendError { status: ErrorStatus::KernelLaunch, context: "Unknown program".into() });
        };
        if let Some(id) = args.iter().find_map(|arg| match arg {
            KernelArg::Buffer(id) if self.buffers.get(*id).is_none() => Some(id),
            _ => None,
        }) {
            return Err(BackendError {
                status: ErrorStatus::IncorrectKernelArg,
                context: format!("Unknown buffer {id:?}").into(),
            });
        }
        let mut slots: Vec<u64> = args.iter().map(|arg| arg.slot(|id| self.buffers[id].ptr)).collect();
        let mut kernel_params: Vec<*mut c_void> = slots.iter_mut().map(|slot| ptr::from_mut(slot).cast()).collect();
        let grid = u32::try_from(num_groups(work_items)).map_err(|e| BackendError {
            status: ErrorStatus::KernelLaunch,
            context: format!("{e}").into(),
        })?;
        #[allow(clippy::cast_possible_truncation)]
        unsafe {
            (self.cuLaunchKernel)(
                program.function,
                grid,
                1,
                1,
                LOCAL_SIZE as c_uint,
                1,
                1,
                0,
                self.stream,
                kernel_params.as_mut_ptr(),
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::KernelLaunch)
    }

    pub(super) fn finish(&mut self) -> Result<(), BackendError> {
        unsafe { (self.cuStreamSynchronize)(self.stream) }.check(ErrorStatus::KernelSync)
    }
}

impl Drop for CUDADevice {
    fn drop(&mut self) {
        let _ = unsafe { (self.cuStreamSynchronize)(self.stream) };
        for module in self.modules.drain() {
            let _ = unsafe { (self.cuModuleUnload)(module) };
        }
        for buffer in self.buffers.drain() {
            let _ = unsafe { (self.cuMemFree)(buffer.ptr) };
        }
        let _ = unsafe { (self.cuStreamDestroy)(self.stream) };
        let _ = unsafe { (self.cuCtxDestroy)(self.context) };
    }
}

fn nul_terminated(s: &str, status: ErrorStatus) -> Result<CString, BackendError> {
    CString::new(s).map_err(|e| BackendError { status, context: format!("{e}").into() })
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUctx_st {
    _unused: [u8; 0],
}
type CUcontext = *mut CUctx_st;
type CUdevice = c_int;
type CUdeviceptr = u64;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUmod_st {
    _unused: [u8; 0],
}
type CUmodule = *mut CUmod_st;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUfunc_st {
    _unused: [u8; 0],
}
type CUfunction = *mut CUfunc_st;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUstream_st {
    _unused: [u8; 0],
}
type CUstream = *mut CUstream_st;

#[allow(unused)]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CUjit_option {
    CU_JIT_MAX_REGISTERS = 0,
    CU_JIT_THREADS_PER_BLOCK = 1,
    CU_JIT_WALL_TIME = 2,
    CU_JIT_INFO_LOG_BUFFER = 3,
    CU_JIT_INFO_LOG_BUFFER_SIZE_BYTES = 4,
    CU_JIT_ERROR_LOG_BUFFER = 5,
    CU_JIT_ERROR_LOG_BUFFER_SIZE_BYTES = 6,
    CU_JIT_OPTIMIZATION_LEVEL = 7,
}

#[allow(unused)]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CUdevice_attribute {
    CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK = 1,
    CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK = 8,
    CU_DEVICE_ATTRIBUTE_WARP_SIZE = 10,
    CU_DEVICE_ATTRIBUTE_CLOCK_RATE = 13,
    CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT = 16,
    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR = 75,
    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR = 76,
}

#[repr(C)]
#[derive(Debug)]
struct _nvrtcProgram {
    _unused: [u8; 0],
}
type nvrtcProgram = *mut _nvrtcProgram;

#[allow(unused)]
#[derive(Debug, PartialEq, Eq)]
#[repr(C)]
enum nvrtcResult {
    NVRTC_SUCCESS = 0,
    NVRTC_ERROR_OUT_OF_MEMORY = 1,
    NVRTC_ERROR_PROGRAM_CREATION_FAILURE = 2,
    NVRTC_ERROR_INVALID_INPUT = 3,
    NVRTC_ERROR_INVALID_PROGRAM = 4,
    NVRTC_ERROR_INVALID_OPTION = 5,
    NVRTC_ERROR_COMPILATION = 6,
    NVRTC_ERROR_BUILTIN_OPERATION_FAILURE = 7,
    NVRTC_ERROR_NO_NAME_EXPRESSIONS_AFTER_COMPILATION = 8,
    NVRTC_ERROR_NO_LOWERED_NAMES_BEFORE_COMPILATION = 9,
    NVRTC_ERROR_NAME_EXPRESSION_NOT_VALID = 10,
    NVRTC_ERROR_INTERNAL_ERROR = 11,
    NVRTC_ERROR_TIME_FILE_WRITE_FAILED = 12,
}

impl nvrtcResult {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::NVRTC_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}

#[allow(unused)]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CUDAStatus {
    CUDA_SUCCESS = 0,
    CUDA_ERROR_INVALID_VALUE = 1,
    CUDA_ERROR_OUT_OF_MEMORY = 2,
    CUDA_ERROR_NOT_INITIALIZED = 3,
    CUDA_ERROR_DEINITIALIZED = 4,
    CUDA_ERROR_PROFILER_DISABLED = 5,
    CUDA_ERROR_NO_DEVICE = 100,
    CUDA_ERROR_INVALID_DEVICE = 101,
    CUDA_ERROR_INVALID_IMAGE = 200,
    CUDA_ERROR_INVALID_CONTEXT = 201,
    CUDA_ERROR_NO_BINARY_FOR_GPU = 209,
    CUDA_ERROR_UNSUPPORTED_LIMIT = 215,
    CUDA_ERROR_INVALID_PTX = 218,
    CUDA_ERROR_JIT_COMPILER_NOT_FOUND = 221,
    CUDA_ERROR_UNSUPPORTED_PTX_VERSION = 222,
    CUDA_ERROR_INVALID_SOURCE = 300,
    CUDA_ERROR_FILE_NOT_FOUND = 301,
    CUDA_ERROR_SHARED_OBJECT_SYMBOL_NOT_FOUND = 302,
    CUDA_ERROR_SHARED_OBJECT_INIT_FAILED = 303,
    CUDA_ERROR_OPERATING_SYSTEM = 304,
    CUDA_ERROR_INVALID_HANDLE = 400,
    CUDA_ERROR_ILLEGAL_STATE = 401,
    CUDA_ERROR_NOT_FOUND = 500,
    CUDA_ERROR_NOT_READY = 600,
    CUDA_ERROR_ILLEGAL_ADDRESS = 700,
    CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES = 701,
    CUDA_ERROR_LAUNCH_TIMEOUT = 702,
    CUDA_ERROR_ASSERT = 710,
    CUDA_ERROR_HARDWARE_STACK_ERROR = 714,
    CUDA_ERROR_ILLEGAL_INSTRUCTION = 715,
    CUDA_ERROR_MISALIGNED_ADDRESS = 716,
    CUDA_ERROR_INVALID_ADDRESS_SPACE = 717,
    CUDA_ERROR_INVALID_PC = 718,
    CUDA_ERROR_LAUNCH_FAILED = 719,
    CUDA_ERROR_NOT_PERMITTED = 800,
    CUDA_ERROR_NOT_SUPPORTED = 801,
    CUDA_ERROR_SYSTEM_NOT_READY = 802,
    CUDA_ERROR_SYSTEM_DRIVER_MISMATCH = 803,
    CUDA_ERROR_TIMEOUT = 909,
    CUDA_ERROR_UNKNOWN = 999,
}

impl CUDAStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::CUDA_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}
