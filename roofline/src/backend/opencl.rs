//! `OpenCL` backend

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::{
    ffi::{c_void, CString},
    ptr,
};

use libloading::Library;
use nanoserde::DeJson;

use super::{
    load_library, load_symbol, num_groups, BufferId, BuildOptions, KernelArg, ModuleCache, ProgramId,
    LOCAL_SIZE, OPENCL_SOURCE,
};
use crate::{
    error::{BackendError, ErrorStatus},
    slab::Slab,
};

#[derive(Debug, Default, DeJson)]
pub struct OpenCLConfig {
    /// Index of the platform to use, default 0
    pub platform_id: Option<usize>,
    /// Index of the device within the platform, default 0
    pub device_id: Option<usize>,
}

impl OpenCLConfig {
    #[must_use]
    pub fn platform_id(&self) -> usize {
        self.platform_id.unwrap_or(0)
    }

    #[must_use]
    pub fn device_id(&self) -> usize {
        self.device_id.unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct OpenCLDevice {
    // Just to keep the runtime loaded
    #[allow(unused)]
    library: Library,
    device: *mut c_void,
    context: *mut c_void,
    queue: *mut c_void,
    name: String,
    buffers: Slab<BufferId, OpenCLBuffer>,
    programs: Slab<ProgramId, OpenCLProgram>,
    modules: ModuleCache<*mut c_void>,
    // Functions
    clCreateBuffer: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        usize,
        *mut c_void,
        *mut OpenCLStatus,
    ) -> *mut c_void,
    clReleaseMemObject: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clEnqueueWriteBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *const c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> OpenCLStatus,
    clCreateProgramWithSource: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *const i8,
        *const usize,
        *mut OpenCLStatus,
    ) -> *mut c_void,
    clBuildProgram: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *const i8,
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
        *mut c_void,
    ) -> OpenCLStatus,
    clGetProgramBuildInfo: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        *mut c_void,
        *mut usize,
    ) -> OpenCLStatus,
    clCreateKernel: unsafe extern "C" fn(*mut c_void, *const i8, *mut OpenCLStatus) -> *mut c_void,
    clReleaseKernel: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clReleaseProgram: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clGetDeviceInfo:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> OpenCLStatus,
    clSetKernelArg: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> OpenCLStatus,
    clEnqueueNDRangeKernel: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        *const usize,
        *const usize,
        *const usize,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> OpenCLStatus,
    clFinish: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clReleaseCommandQueue: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clReleaseContext: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
}

#[derive(Debug)]
struct OpenCLBuffer {
    buffer: *mut c_void,
    bytes: usize,
}

#[derive(Debug)]
struct OpenCLProgram {
    program: *mut c_void,
    kernel: *mut c_void,
}

pub(super) fn initialize_device(config: &OpenCLConfig, debug_dev: bool) -> Result<OpenCLDevice, BackendError> {
    let opencl_paths = [
        "libOpenCL.so.1",
        "libOpenCL.so",
        "/lib/libOpenCL.so",
        "/lib64/libOpenCL.so",
        "/lib/x86_64-linux-gnu/libOpenCL.so.1",
        "/usr/lib/libOpenCL.so",
        "/usr/lib64/libOpenCL.so",
        "/usr/lib/x86_64-linux-gnu/libOpenCL.so.1",
    ];
    let opencl = load_library(&opencl_paths, "OpenCL runtime")?;
    let clGetPlatformIDs: unsafe extern "C" fn(cl_uint, *mut *mut c_void, *mut cl_uint) -> OpenCLStatus =
        load_symbol(&opencl, b"clGetPlatformIDs\0")?;
    let clGetPlatformInfo: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        usize,
        *mut c_void,
        *mut usize,
    ) -> OpenCLStatus = load_symbol(&opencl, b"clGetPlatformInfo\0")?;
    let clGetDeviceIDs: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        cl_uint,
        *mut *mut c_void,
        *mut cl_uint,
    ) -> OpenCLStatus = load_symbol(&opencl, b"clGetDeviceIDs\0")?;
    let clCreateContext: unsafe extern "C" fn(
        *const isize,
        cl_uint,
        *const *mut c_void,
        Option<unsafe extern "C" fn(*const i8, *const c_void, usize, *mut c_void)>,
        *mut c_void,
        *mut OpenCLStatus,
    ) -> *mut c_void = load_symbol(&opencl, b"clCreateContext\0")?;
    let clCreateCommandQueue: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_bitfield,
        *mut OpenCLStatus,
    ) -> *mut c_void = load_symbol(&opencl, b"clCreateCommandQueue\0")?;

    let platforms = {
        let mut count: cl_uint = 0;
        unsafe { clGetPlatformIDs(0, ptr::null_mut(), &mut count) }.check(ErrorStatus::DeviceEnumeration)?;
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            unsafe { clGetPlatformIDs(count, ids.as_mut_ptr(), ptr::null_mut()) }
                .check(ErrorStatus::DeviceEnumeration)?;
        }
        ids
    };
    let Some(&platform) = platforms.get(config.platform_id()) else {
        return Err(BackendError {
            status: ErrorStatus::DeviceEnumeration,
            context: format!("OpenCL platform {} not found, {} available.", config.platform_id(), platforms.len())
                .into(),
        });
    };
    let devices = {
        let mut count: cl_uint = 0;
        let status = unsafe { clGetDeviceIDs(platform, CL_DEVICE_TYPE_ALL, 0, ptr::null_mut(), &mut count) };
        if status != OpenCLStatus::CL_DEVICE_NOT_FOUND {
            status.check(ErrorStatus::DeviceEnumeration)?;
        }
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            unsafe { clGetDeviceIDs(platform, CL_DEVICE_TYPE_ALL, count, ids.as_mut_ptr(), ptr::null_mut()) }
                .check(ErrorStatus::DeviceEnumeration)?;
        }
        ids
    };
    let Some(&device) = devices.get(config.device_id()) else {
        return Err(BackendError {
            status: ErrorStatus::DeviceEnumeration,
            context: format!("OpenCL device {} not found, {} available.", config.device_id(), devices.len()).into(),
        });
    };
    if debug_dev {
        let mut size: usize = 0;
        unsafe { clGetPlatformInfo(platform, CL_PLATFORM_NAME, 0, ptr::null_mut(), &mut size) }
            .check(ErrorStatus::DeviceQuery)?;
        let mut data: Vec<u8> = vec![0; size];
        unsafe { clGetPlatformInfo(platform, CL_PLATFORM_NAME, size, data.as_mut_ptr().cast(), ptr::null_mut()) }
            .check(ErrorStatus::DeviceQuery)?;
        eprintln!(
            "Using OpenCL platform, platform id {}, name {}",
            config.platform_id(),
            String::from_utf8_lossy(&data).trim_end_matches('\0')
        );
    }
    let mut status = OpenCLStatus::CL_SUCCESS;
    let context = unsafe { clCreateContext(ptr::null(), 1, &device, None, ptr::null_mut(), &mut status) };
    status.check(ErrorStatus::Initialization)?;
    let queue = unsafe { clCreateCommandQueue(context, device, 0, &mut status) };
    status.check(ErrorStatus::Initialization)?;

    let mut dev = OpenCLDevice {
        device,
        context,
        queue,
        name: String::new(),
        buffers: Slab::new(),
        programs: Slab::new(),
        modules: ModuleCache::new(),
        clCreateBuffer: load_symbol(&opencl, b"clCreateBuffer\0")?,
        clReleaseMemObject: load_symbol(&opencl, b"clReleaseMemObject\0")?,
        clEnqueueWriteBuffer: load_symbol(&opencl, b"clEnqueueWriteBuffer\0")?,
        clCreateProgramWithSource: load_symbol(&opencl, b"clCreateProgramWithSource\0")?,
        clBuildProgram: load_symbol(&opencl, b"clBuildProgram\0")?,
        clGetProgramBuildInfo: load_symbol(&opencl, b"clGetProgramBuildInfo\0")?,
        clCreateKernel: load_symbol(&opencl, b"clCreateKernel\0")?,
        clReleaseKernel: load_symbol(&opencl, b"clReleaseKernel\0")?,
        clReleaseProgram: load_symbol(&opencl, b"clReleaseProgram\0")?,
        clGetDeviceInfo: load_symbol(&opencl, b"clGetDeviceInfo\0")?,
        clSetKernelArg: load_symbol(&opencl, b"clSetKernelArg\0")?,
        clEnqueueNDRangeKernel: load_symbol(&opencl, b"clEnqueueNDRangeKernel\0")?,
        clFinish: load_symbol(&opencl, b"clFinish\0")?,
        clReleaseCommandQueue: load_symbol(&opencl, b"clReleaseCommandQueue\0")?,
        clReleaseContext: load_symbol(&opencl, b"clReleaseContext\0")?,
        library: opencl,
    };
    let name = dev.get_device_data(CL_DEVICE_NAME)?;
    dev.name = String::from_utf8_lossy(&name).trim_end_matches('\0').trim().into();
    if debug_dev {
        let global_mem = dev.get_device_data(CL_DEVICE_GLOBAL_MEM_SIZE)?;
        let global_mem = global_mem.try_into().map(u64::from_ne_bytes).unwrap_or(0);
        eprintln!("{}, {} MiB global memory", dev.name, global_mem / 1024 / 1024);
    }
    Ok(dev)
}

impl OpenCLDevice {
    pub(super) fn arch(&self) -> &str {
        &self.name
    }

    pub(super) fn allocate(&mut self, bytes: usize) -> Result<BufferId, BackendError> {
        let mut status = OpenCLStatus::CL_SUCCESS;
        let buffer =
            unsafe { (self.clCreateBuffer)(self.context, CL_MEM_READ_WRITE, bytes, ptr::null_mut(), &mut status) };
        status.check(ErrorStatus::MemoryAllocation)?;
        Ok(self.buffers.push(OpenCLBuffer { buffer, bytes }))
    }

    pub(super) fn deallocate(&mut self, buffer_id: BufferId) {
        if let Some(buffer) = self.buffers.remove(buffer_id) {
            let _ = unsafe { (self.clReleaseMemObject)(buffer.buffer) };
        }
    }

    pub(super) fn host_to_device(&mut self, src: &[u8], dst: BufferId, offset: usize) -> Result<(), BackendError> {
        let Some(dst) = self.buffers.get(dst) else {
            return Err(BackendError { status: ErrorStatus::MemoryCopyH2D, context: "Unknown buffer".into() });
        };
        debug_assert!(offset + src.len() <= dst.bytes);
        unsafe {
            (self.clEnqueueWriteBuffer)(
                self.queue,
                dst.buffer,
                CL_BLOCKING,
                offset,
                src.len(),
                src.as_ptr().cast(),
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::MemoryCopyH2D)
    }

    pub(super) fn compile(
        &mut self,
        name: &str,
        options: &BuildOptions,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let kernel_name = CString::new(name).map_err(|e| BackendError {
            status: ErrorStatus::KernelCompilation,
            context: format!("{e}").into(),
        })?;
        let flags = options.flags();
        let program = if let Some(program) = self.modules.acquire(&flags) {
            program
        } else {
            let program = self.build_program(&flags.join(" "), debug_asm)?;
            self.modules.insert(flags, program);
            program
        };
        let mut status = OpenCLStatus::CL_SUCCESS;
        let kernel = unsafe { (self.clCreateKernel)(program, kernel_name.as_ptr().cast(), &mut status) };
        if let Err(e) = status.check(ErrorStatus::KernelCompilation) {
            self.unload(program);
            return Err(BackendError { status: e.status, context: format!("{name}, {}", e.context).into() });
        }
        Ok(self.programs.push(OpenCLProgram { program, kernel }))
    }

    fn build_program(&self, flags: &str, debug_asm: bool) -> Result<*mut c_void, BackendError> {
        if debug_asm {
            eprintln!("{OPENCL_SOURCE}\nBuild options: {flags}");
        }
        let source_ptr: *const i8 = OPENCL_SOURCE.as_ptr().cast();
        let source_len = OPENCL_SOURCE.len();
        let mut status = OpenCLStatus::CL_SUCCESS;
        let program =
            unsafe { (self.clCreateProgramWithSource)(self.context, 1, &source_ptr, &source_len, &mut status) };
        status.check(ErrorStatus::KernelCompilation)?;
        let flags = CString::new(flags).map_err(|e| BackendError {
            status: ErrorStatus::KernelCompilation,
            context: format!("{e}").into(),
        })?;
        if let Err(e) = unsafe {
            (self.clBuildProgram)(program, 1, [self.device].as_ptr(), flags.as_ptr().cast(), None, ptr::null_mut())
        }
        .check(ErrorStatus::KernelCompilation)
        {
            let build_log = self.get_program_build_data(program, CL_PROGRAM_BUILD_LOG);
            let _ = unsafe { (self.clReleaseProgram)(program) };
            return Err(match build_log {
                Ok(build_log) => BackendError {
                    status: e.status,
                    context: format!("{} {}", e.context, String::from_utf8_lossy(&build_log)).into(),
                },
                Err(_) => e,
            });
        }
        Ok(program)
    }

    fn unload(&mut self, program: *mut c_void) {
        if let Some(program) = self.modules.release(program) {
            let _ = unsafe { (self.clReleaseProgram)(program) };
        }
    }

    pub(super) fn release(&mut self, program_id: ProgramId) {
        if let Some(program) = self.programs.remove(program_id) {
            let _ = unsafe { (self.clReleaseKernel)(program.kernel) };
            self.unload(program.program);
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
        for (i, arg) in args.iter().enumerate() {
            if let KernelArg::Buffer(id) = arg {
                if self.buffers.get(*id).is_none() {
                    return Err(BackendError {
                        status: ErrorStatus::IncorrectKernelArg,
                        context: format!("Argument {i} is unknown buffer {id:?}").into(),
                    });
                }
            }
            let slot = arg.slot(|id| self.buffers[id].buffer as u64);
            let ptr: *const u64 = &slot;
            unsafe { (self.clSetKernelArg)(program.kernel, i as cl_uint, arg.size(), ptr.cast()) }
                .check(ErrorStatus::IncorrectKernelArg)?;
        }
        let global_work_size = [num_groups(work_items) * LOCAL_SIZE];
        let local_work_size = [LOCAL_SIZE];
        unsafe {
            (self.clEnqueueNDRangeKernel)(
                self.queue,
                program.kernel,
                1,
                ptr::null(),
                global_work_size.as_ptr(),
                local_work_size.as_ptr(),
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::KernelLaunch)
    }

    pub(super) fn finish(&mut self) -> Result<(), BackendError> {
        unsafe { (self.clFinish)(self.queue) }.check(ErrorStatus::KernelSync)
    }

    fn get_device_data(&self, param_name: cl_uint) -> Result<Vec<u8>, BackendError> {
        let mut size: usize = 0;
        let status = unsafe { (self.clGetDeviceInfo)(self.device, param_name, 0, ptr::null_mut(), &mut size) };
        if status != OpenCLStatus::CL_SUCCESS {
            return Err(BackendError {
                status: ErrorStatus::DeviceQuery,
                context: format!("Failed to get device info {param_name}, {status:?}").into(),
            });
        }
        let mut data: Vec<u8> = vec![0; size];
        if size > 0 {
            unsafe {
                (self.clGetDeviceInfo)(self.device, param_name, size, data.as_mut_ptr().cast(), ptr::null_mut())
            }
            .check(ErrorStatus::DeviceQuery)?;
        }
        Ok(data)
    }

    fn get_program_build_data(&self, program: *mut c_void, param_name: cl_uint) -> Result<Vec<u8>, OpenCLStatus> {
        let mut size: usize = 0;
        let status = unsafe {
            (self.clGetProgramBuildInfo)(program, self.device, param_name, 0, ptr::null_mut(), &mut size)
        };
        if status != OpenCLStatus::CL_SUCCESS {
            return Err(status);
        }
        let mut data: Vec<u8> = vec![0; size];
        if size > 0 {
            let status = unsafe {
                (self.clGetProgramBuildInfo)(
                    program,
                    self.device,
                    param_name,
                    size,
                    data.as_mut_ptr().cast(),
                    ptr::null_mut(),
                )
            };
            if status != OpenCLStatus::CL_SUCCESS {
                return Err(status);
            }
        }
        Ok(data)
    }
}

impl Drop for OpenCLDevice {
    fn drop(&mut self) {
        let _ = unsafe { (self.clFinish)(self.queue) };
        for program in self.programs.drain() {
            let _ = unsafe { (self.clReleaseKernel)(program.kernel) };
        }
        for program in self.modules.drain() {
            let _ = unsafe { (self.clReleaseProgram)(program) };
        }
        for buffer in self.buffers.drain() {
            let _ = unsafe { (self.clReleaseMemObject)(buffer.buffer) };
        }
        let _ = unsafe { (self.clReleaseCommandQueue)(self.queue) };
        let _ = unsafe { (self.clReleaseContext)(self.context) };
    }
}

impl OpenCLStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::CL_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}

type cl_uint = u32;
type cl_bitfield = u64;

const CL_PLATFORM_NAME: cl_uint = 0x0902; // 2306
const CL_DEVICE_NAME: cl_uint = 0x102B; // 4139
const CL_DEVICE_GLOBAL_MEM_SIZE: cl_uint = 0x101F; // 4127
const CL_DEVICE_TYPE_ALL: cl_bitfield = 0xFFFF_FFFF;
const CL_MEM_READ_WRITE: cl_bitfield = 1;
const CL_BLOCKING: cl_uint = 1;
const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183; // 4483

#[allow(clippy::upper_case_acronyms)]
#[allow(unused)]
#[derive(Copy, Clone, PartialEq, Debug, Eq)]
#[repr(C)]
enum OpenCLStatus {
    CL_DEVICE_NOT_FOUND = -1,
    CL_SUCCESS = 0,
    CL_DEVICE_NOT_AVAILABLE = -2,
    CL_COMPILER_NOT_AVAILABLE = -3,
    CL_MEM_OBJECT_ALLOCATION_FAILURE = -4,
    CL_OUT_OF_RESOURCES = -5,
    CL_OUT_OF_HOST_MEMORY = -6,
    CL_PROFILING_INFO_NOT_AVAILABLE = -7,
    CL_MEM_COPY_OVERLAP = -8,
    CL_IMAGE_FORMAT_MISMATCH = -9,
    CL_IMAGE_FORMAT_NOT_SUPPORTED = -10,
    CL_BUILD_PROGRAM_FAILURE = -11,
    CL_MAP_FAILURE = -12,
    CL_MISALIGNED_SUB_BUFFER_OFFSET = -13,
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14,
    CL_COMPILE_PROGRAM_FAILURE = -15,
    CL_LINKER_NOT_AVAILABLE = -16,
    CL_LINK_PROGRAM_FAILURE = -17,
    CL_DEVICE_PARTITION_FAILED = -18,
    CL_KERNEL_ARG_INFO_NOT_AVAILABLE = -19,
    CL_INVALID_VALUE = -30,
    CL_INVALID_DEVICE_TYPE = -31,
    CL_INVALID_PLATFORM = -32,
    CL_INVALID_DEVICE = -33,
    CL_INVALID_CONTEXT = -34,
    CL_INVALID_QUEUE_PROPERTIES = -35,
    CL_INVALID_COMMAND_QUEUE = -36,
    CL_INVALID_HOST_PTR = -37,
    CL_INVALID_MEM_OBJECT = -38,
    CL_INVALID_IMAGE_FORMAT_DESCRIPTOR = -39,
    CL_INVALID_IMAGE_SIZE = -40,
    CL_INVALID_SAMPLER = -41,
    CL_INVALID_BINARY = -42,
    CL_INVALID_BUILD_OPTIONS = -43,
    CL_INVALID_PROGRAM = -44,
    CL_INVALID_PROGRAM_EXECUTABLE = -45,
    CL_INVALID_KERNEL_NAME = -46,
    CL_INVALID_KERNEL_DEFINITION = -47,
    CL_INVALID_KERNEL = -48,
    CL_INVALID_ARG_INDEX = -49,
    CL_INVALID_ARG_VALUE = -50,
    CL_INVALID_ARG_SIZE = -51,
    CL_INVALID_KERNEL_ARGS = -52,
    CL_INVALID_WORK_DIMENSION = -53,
    CL_INVALID_WORK_GROUP_SIZE = -54,
    CL_INVALID_WORK_ITEM_SIZE = -55,
    CL_INVALID_GLOBAL_OFFSET = -56,
    CL_INVALID_EVENT_WAIT_LIST = -57,
    CL_INVALID_EVENT = -58,
    CL_INVALID_OPERATION = -59,
    CL_INVALID_GL_OBJECT = -60,
    CL_INVALID_BUFFER_SIZE = -61,
    CL_INVALID_MIP_LEVEL = -62,
    CL_INVALID_GLOBAL_WORK_SIZE = -63,
    CL_INVALID_PROPERTY = -64,
    CL_INVALID_IMAGE_DESCRIPTOR = -65,
    CL_INVALID_COMPILER_OPTIONS = -66,
    CL_INVALID_LINKER_OPTIONS = -67,
    CL_INVALID_DEVICE_PARTITION_COUNT = -68,
    CL_INVALID_PIPE_SIZE = -69,
    CL_INVALID_DEVICE_QUEUE = -70,
    CL_INVALID_SPEC_ID = -71,
    CL_MAX_SIZE_RESTRICTION_EXCEEDED = -72,
}
