//! HIP backend, kernels are compiled at runtime with hiprtc

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use std::{
    ffi::{c_char, c_int, c_uint, c_void, CString},
    ptr,
};

use libloading::Library;
use nanoserde::DeJson;

use super::{
    load_library, load_symbol, num_groups, BufferId, BuildOptions, KernelArg, ModuleCache, ProgramId, CUDA_SOURCE,
    LOCAL_SIZE, MFMA_SOURCE,
};
use crate::{
    error::{BackendError, ErrorStatus},
    slab::Slab,
};

#[derive(Debug, Default, DeJson)]
pub struct HIPConfig {
    /// Device ordinal, default 0
    pub device_id: Option<i32>,
}

impl HIPConfig {
    #[must_use]
    pub fn device_id(&self) -> i32 {
        self.device_id.unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct HIPDevice {
    #[allow(unused)]
    hip: Library,
    hiprtc: Library,
    stream: HIPstream,
    // Full gcnArchName including feature qualifiers, e.g. gfx90a:sramecc+:xnack-
    arch: String,
    buffers: Slab<BufferId, HIPBuffer>,
    programs: Slab<ProgramId, HIPProgram>,
    modules: ModuleCache<HIPmodule>,
    hipMalloc: unsafe extern "C" fn(*mut HIPdeviceptr, usize) -> HIPStatus,
    hipFree: unsafe extern "C" fn(HIPdeviceptr) -> HIPStatus,
    hipMemcpyHtoD: unsafe extern "C" fn(HIPdeviceptr, *const c_void, usize) -> HIPStatus,
    hipModuleLoadData: unsafe extern "C" fn(*mut HIPmodule, *const c_void) -> HIPStatus,
    hipModuleGetFunction: unsafe extern "C" fn(*mut HIPfunction, HIPmodule, *const c_char) -> HIPStatus,
    hipModuleUnload: unsafe extern "C" fn(HIPmodule) -> HIPStatus,
    hipModuleLaunchKernel: unsafe extern "C" fn(
        HIPfunction,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        HIPstream,
        *mut *mut c_void,
        *mut *mut c_void,
    ) -> HIPStatus,
    hipStreamSynchronize: unsafe extern "C" fn(HIPstream) -> HIPStatus,
    hipStreamDestroy: unsafe extern "C" fn(HIPstream) -> HIPStatus,
}

#[derive(Debug)]
struct HIPBuffer {
    ptr: HIPdeviceptr,
    bytes: usize,
}

#[derive(Debug)]
struct HIPProgram {
    module: HIPmodule,
    function: HIPfunction,
}

pub(super) fn initialize_device(config: &HIPConfig, debug_dev: bool) -> Result<HIPDevice, BackendError> {
    let hip_paths = [
        "libamdhip64.so",
        "/opt/rocm/lib/libamdhip64.so",
        "/lib64/libamdhip64.so",
        "/lib/x86_64-linux-gnu/libamdhip64.so",
    ];
    let hip = load_library(&hip_paths, "HIP runtime")?;
    let hiprtc_paths = ["libhiprtc.so", "/opt/rocm/lib/libhiprtc.so", "/lib64/libhiprtc.so"];
    let hiprtc = load_library(&hiprtc_paths, "HIP runtime compiler (hiprtc)")?;

    let hipInit: unsafe extern "C" fn(c_uint) -> HIPStatus = load_symbol(&hip, b"hipInit\0")?;
    let hipDriverGetVersion: unsafe extern "C" fn(*mut c_int) -> HIPStatus =
        load_symbol(&hip, b"hipDriverGetVersion\0")?;
    let hipGetDeviceCount: unsafe extern "C" fn(*mut c_int) -> HIPStatus = load_symbol(&hip, b"hipGetDeviceCount\0")?;
    let hipSetDevice: unsafe extern "C" fn(c_int) -> HIPStatus = load_symbol(&hip, b"hipSetDevice\0")?;
    let hipDeviceGetName: unsafe extern "C" fn(*mut c_char, c_int, c_int) -> HIPStatus =
        load_symbol(&hip, b"hipDeviceGetName\0")?;
    // hipDeviceProp_t layout changed in ROCm 6, both versions carry gcnArchName
    let hipGetDeviceProperties: unsafe extern "C" fn(*mut c_void, c_int) -> HIPStatus =
        load_symbol(&hip, b"hipGetDevicePropertiesR0600\0")
            .or_else(|_| load_symbol(&hip, b"hipGetDeviceProperties\0"))?;
    let hipStreamCreate: unsafe extern "C" fn(*mut HIPstream) -> HIPStatus = load_symbol(&hip, b"hipStreamCreate\0")?;

    unsafe { hipInit(0) }.check(ErrorStatus::Initialization)?;
    let mut driver_version = 0;
    unsafe { hipDriverGetVersion(&mut driver_version) }.check(ErrorStatus::Initialization)?;
    let mut num_devices = 0;
    unsafe { hipGetDeviceCount(&mut num_devices) }.check(ErrorStatus::DeviceEnumeration)?;
    let device_id = config.device_id();
    if device_id < 0 || device_id >= num_devices {
        return Err(BackendError {
            status: ErrorStatus::DeviceEnumeration,
            context: format!("HIP device {device_id} not found, {num_devices} available.").into(),
        });
    }
    unsafe { hipSetDevice(device_id) }.check(ErrorStatus::Initialization)?;

    // Larger than any published hipDeviceProp_t, u64 for alignment
    let mut properties = vec![0u64; 1024];
    unsafe { hipGetDeviceProperties(properties.as_mut_ptr().cast(), device_id) }.check(ErrorStatus::DeviceQuery)?;
    let bytes: Vec<u8> = properties.iter().flat_map(|x| x.to_ne_bytes()).collect();
    let Some(arch) = gcn_arch_name(&bytes) else {
        return Err(BackendError {
            status: ErrorStatus::DeviceQuery,
            context: "HIP device properties have no gcnArchName".into(),
        });
    };
    if debug_dev {
        let mut device_name = [0 as c_char; 256];
        unsafe { hipDeviceGetName(device_name.as_mut_ptr(), 256, device_id) }.check(ErrorStatus::DeviceQuery)?;
        eprintln!(
            "Using HIP runtime, driver version: {}.{}, device {:?}, arch {arch}",
            driver_version / 10_000_000,
            (driver_version / 100_000) % 100,
            unsafe { std::ffi::CStr::from_ptr(device_name.as_ptr()) },
        );
    }
    let mut stream: HIPstream = ptr::null_mut();
    unsafe { hipStreamCreate(&mut stream) }.check(ErrorStatus::Initialization)?;

    Ok(HIPDevice {
        stream,
        arch,
        buffers: Slab::new(),
        programs: Slab::new(),
        modules: ModuleCache::new(),
        hipMalloc: load_symbol(&hip, b"hipMalloc\0")?,
        hipFree: load_symbol(&hip, b"hipFree\0")?,
        hipMemcpyHtoD: load_symbol(&hip, b"hipMemcpyHtoD\0")?,
        hipModuleLoadData: load_symbol(&hip, b"hipModuleLoadData\0")?,
        hipModuleGetFunction: load_symbol(&hip, b"hipModuleGetFunction\0")?,
        hipModuleUnload: load_symbol(&hip, b"hipModuleUnload\0")?,
        hipModuleLaunchKernel: load_symbol(&hip, b"hipModuleLaunchKernel\0")?,
        hipStreamSynchronize: load_symbol(&hip, b"hipStreamSynchronize\0")?,
        hipStreamDestroy: load_symbol(&hip, b"hipStreamDestroy\0")?,
        hip,
        hiprtc,
    })
}

/// First NUL terminated string beginning with `gfx` at the start of a char array
fn gcn_arch_name(properties: &[u8]) -> Option<String> {
    let start = properties
        .windows(3)
        .enumerate()
        .find(|(i, w)| *w == b"gfx" && (*i == 0 || properties[i - 1] == 0))?
        .0;
    let len = properties[start..].iter().position(|&b| b == 0)?;
    String::from_utf8(properties[start..start + len].to_vec()).ok()
}

impl HIPDevice {
    pub(super) fn arch(&self) -> &str {
        &self.arch
    }

    pub(super) fn allocate(&mut self, bytes: usize) -> Result<BufferId, BackendError> {
        let mut ptr: HIPdeviceptr = 0;
        unsafe { (self.hipMalloc)(&mut ptr, bytes) }.check(ErrorStatus::MemoryAllocation)?;
        Ok(self.buffers.push(HIPBuffer { ptr, bytes }))
    }

    pub(super) fn deallocate(&mut self, buffer_id: BufferId) {
        if let Some(buffer) = self.buffers.remove(buffer_id) {
            let _ = unsafe { (self.hipFree)(buffer.ptr) };
        }
    }

    pub(super) fn host_to_device(&mut self, src: &[u8], dst: BufferId, offset: usize) -> Result<(), BackendError> {
        let Some(dst) = self.buffers.get(dst) else {
            return Err(BackendError { status: ErrorStatus::MemoryCopyH2D, context: "Unknown buffer".into() });
        };
        debug_assert!(offset + src.len() <= dst.bytes);
        unsafe { (self.hipMemcpyHtoD)(dst.ptr + offset as u64, src.as_ptr().cast(), src.len()) }
            .check(ErrorStatus::MemoryCopyH2D)
    }

    pub(super) fn compile(
        &mut self,
        name: &str,
        options: &BuildOptions,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let offload_arch = self.arch.split(':').next().unwrap_or(&self.arch);
        let mut flags = vec![format!("--offload-arch={offload_arch}"), "-O3".into()];
        flags.extend(options.flags());
        let kernel_name = nul_terminated(name)?;
        let module = if let Some(module) = self.modules.acquire(&flags) {
            module
        } else {
            let source = format!("{CUDA_SOURCE}\n{MFMA_SOURCE}");
            if debug_asm {
                eprintln!("{source}\nBuild options: {}", flags.join(" "));
            }
            let code = self.compile_code(&source, &flags)?;
            let mut module: HIPmodule = ptr::null_mut();
            unsafe { (self.hipModuleLoadData)(&mut module, code.as_ptr().cast()) }
                .check(ErrorStatus::KernelCompilation)?;
            self.modules.insert(flags, module);
            module
        };
        let mut function: HIPfunction = ptr::null_mut();
        if let Err(e) = unsafe { (self.hipModuleGetFunction)(&mut function, module, kernel_name.as_ptr()) }
            .check(ErrorStatus::KernelCompilation)
        {
            self.unload(module);
            return Err(BackendError { status: e.status, context: format!("{name}, {}", e.context).into() });
        }
        Ok(self.programs.push(HIPProgram { module, function }))
    }

    fn unload(&mut self, module: HIPmodule) {
        if let Some(module) = self.modules.release(module) {
            let _ = unsafe { (self.hipModuleUnload)(module) };
        }
    }

    fn compile_code(&self, source: &str, flags: &[String]) -> Result<Vec<u8>, BackendError> {
        let hiprtcCreateProgram: unsafe extern "C" fn(
            *mut hiprtcProgram,
            *const c_char,
            *const c_char,
            c_int,
            *const *const c_char,
            *const *const c_char,
        ) -> hiprtcResult = load_symbol(&self.hiprtc, b"hiprtcCreateProgram\0")?;
        let hiprtcCompileProgram: unsafe extern "C" fn(hiprtcProgram, c_int, *const *const c_char) -> hiprtcResult =
            load_symbol(&self.hiprtc, b"hiprtcCompileProgram\0")?;
        let hiprtcGetCodeSize: unsafe extern "C" fn(hiprtcProgram, *mut usize) -> hiprtcResult =
            load_symbol(&self.hiprtc, b"hiprtcGetCodeSize\0")?;
        let hiprtcGetCode: unsafe extern "C" fn(hiprtcProgram, *mut c_char) -> hiprtcResult =
            load_symbol(&self.hiprtc, b"hiprtcGetCode\0")?;
        let hiprtcGetProgramLogSize: unsafe extern "C" fn(hiprtcProgram, *mut usize) -> hiprtcResult =
            load_symbol(&self.hiprtc, b"hiprtcGetProgramLogSize\0")?;
        let hiprtcGetProgramLog: unsafe extern "C" fn(hiprtcProgram, *mut c_char) -> hiprtcResult =
            load_symbol(&self.hiprtc, b"hiprtcGetProgramLog\0")?;
        let hiprtcDestroyProgram: unsafe extern "C" fn(*mut hiprtcProgram) -> hiprtcResult =
            load_symbol(&self.hiprtc, b"hiprtcDestroyProgram\0")?;

        let source = nul_terminated(source)?;
        let flags = flags.iter().map(|flag| nul_terminated(flag)).collect::<Result<Vec<CString>, BackendError>>()?;
        let flag_ptrs: Vec<*const c_char> = flags.iter().map(|flag| flag.as_ptr()).collect();

        let mut program: hiprtcProgram = ptr::null_mut();
        unsafe {
            hiprtcCreateProgram(&mut program, source.as_ptr(), c"roofline.hip".as_ptr(), 0, ptr::null(), ptr::null())
        }
        .check(ErrorStatus::KernelCompilation)?;
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_possible_wrap)]
        let compiled = unsafe { hiprtcCompileProgram(program, flag_ptrs.len() as c_int, flag_ptrs.as_ptr()) }
            .check(ErrorStatus::KernelCompilation);
        if let Err(e) = compiled {
            let mut log_size: usize = 0;
            let mut log: Vec<u8> = Vec::new();
            if unsafe { hiprtcGetProgramLogSize(program, &mut log_size) } == hiprtcResult::HIPRTC_SUCCESS {
                log = vec![0; log_size];
                let _ = unsafe { hiprtcGetProgramLog(program, log.as_mut_ptr().cast()) };
            }
            let _ = unsafe { hiprtcDestroyProgram(&mut program) };
            return Err(BackendError {
                status: e.status,
                context: format!("{} {}", e.context, String::from_utf8_lossy(&log).trim_end_matches('\0')).into(),
            });
        }
        let mut code_size: usize = 0;
        unsafe { hiprtcGetCodeSize(program, &mut code_size) }.check(ErrorStatus::KernelCompilation)?;
        let mut code: Vec<u8> = vec![0; code_size];
        unsafe { hiprtcGetCode(program, code.as_mut_ptr().cast()) }.check(ErrorStatus::KernelCompilation)?;
        unsafe { hiprtcDestroyProgram(&mut program) }.check(ErrorStatus::KernelCompilation)?;
        Ok(code)
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
            (self.hipModuleLaunchKernel)(
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
        unsafe { (self.hipStreamSynchronize)(self.stream) }.check(ErrorStatus::KernelSync)
    }
}

impl Drop for HIPDevice {
    fn drop(&mut self) {
        let _ = unsafe { (self.hipStreamSynchronize)(self.stream) };
        for module in self.modules.drain() {
            let _ = unsafe { (self.hipModuleUnload)(module) };
        }
        for buffer in self.buffers.drain() {
            let _ = unsafe { (self.hipFree)(buffer.ptr) };
        }
        let _ = unsafe { (self.hipStreamDestroy)(self.stream) };
    }
}

fn nul_terminated(s: &str) -> Result<CString, BackendError> {
    CString::new(s).map_err(|e| BackendError { status: ErrorStatus::KernelCompilation, context: format!("{e}").into() })
}

type HIPdeviceptr = u64;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct ihipModule_t {
    _unused: [u8; 0],
}
type HIPmodule = *mut ihipModule_t;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct ihipModuleSymbol_t {
    _unused: [u8; 0],
}
type HIPfunction = *mut ihipModuleSymbol_t;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct ihipStream_t {
    _unused: [u8; 0],
}
type HIPstream = *mut ihipStream_t;

#[repr(C)]
#[derive(Debug)]
struct _hiprtcProgram {
    _unused: [u8; 0],
}
type hiprtcProgram = *mut _hiprtcProgram;

#[allow(unused)]
#[derive(Debug, PartialEq, Eq)]
#[repr(C)]
enum hiprtcResult {
    HIPRTC_SUCCESS = 0,
    HIPRTC_ERROR_OUT_OF_MEMORY = 1,
    HIPRTC_ERROR_PROGRAM_CREATION_FAILURE = 2,
    HIPRTC_ERROR_INVALID_INPUT = 3,
    HIPRTC_ERROR_INVALID_PROGRAM = 4,
    HIPRTC_ERROR_INVALID_OPTION = 5,
    HIPRTC_ERROR_COMPILATION = 6,
    HIPRTC_ERROR_BUILTIN_OPERATION_FAILURE = 7,
    HIPRTC_ERROR_NO_NAME_EXPRESSIONS_AFTER_COMPILATION = 8,
    HIPRTC_ERROR_NO_LOWERED_NAMES_BEFORE_COMPILATION = 9,
    HIPRTC_ERROR_NAME_EXPRESSION_NOT_VALID = 10,
    HIPRTC_ERROR_INTERNAL_ERROR = 11,
    HIPRTC_ERROR_LINKING = 100,
}

impl hiprtcResult {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::HIPRTC_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}

#[allow(unused)]
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum HIPStatus {
    hipSuccess = 0,
    hipErrorInvalidValue = 1,
    hipErrorOutOfMemory = 2,
    hipErrorNotInitialized = 3,
    hipErrorDeinitialized = 4,
    hipErrorInvalidConfiguration = 9,
    hipErrorInvalidSymbol = 13,
    hipErrorInvalidDevicePointer = 17,
    hipErrorInsufficientDriver = 35,
    hipErrorPriorLaunchFailure = 53,
    hipErrorInvalidDeviceFunction = 98,
    hipErrorNoDevice = 100,
    hipErrorInvalidDevice = 101,
    hipErrorInvalidImage = 200,
    hipErrorInvalidContext = 201,
    hipErrorNoBinaryForGpu = 209,
    hipErrorInvalidSource = 300,
    hipErrorFileNotFound = 301,
    hipErrorSharedObjectSymbolNotFound = 302,
    hipErrorSharedObjectInitFailed = 303,
    hipErrorOperatingSystem = 304,
    hipErrorInvalidHandle = 400,
    hipErrorNotFound = 500,
    hipErrorNotReady = 600,
    hipErrorIllegalAddress = 700,
    hipErrorLaunchOutOfResources = 701,
    hipErrorLaunchTimeOut = 702,
    hipErrorAssert = 710,
    hipErrorLaunchFailure = 719,
    hipErrorNotSupported = 801,
    hipErrorUnknown = 999,
}

impl HIPStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::hipSuccess {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::gcn_arch_name;

    #[test]
    fn arch_from_device_properties() {
        let mut properties = vec![0u8; 512];
        properties[..19].copy_from_slice(b"AMD Instinct MI250X");
        let arch = b"gfx90a:sramecc+:xnack-";
        properties[300..300 + arch.len()].copy_from_slice(arch);
        assert_eq!(gcn_arch_name(&properties).as_deref(), Some("gfx90a:sramecc+:xnack-"));
        // gfx in the middle of a string does not count
        let mut properties = vec![0u8; 64];
        properties[..9].copy_from_slice(b"Radeongfx");
        assert_eq!(gcn_arch_name(&properties), None);
    }
}
