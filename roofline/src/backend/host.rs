//! Host backend, `Serial` runs kernels on the calling thread,
//! `OpenMP` splits each launch across a rayon thread pool.
//! Launches complete before returning, so finish is a no-op.

use nanoserde::DeJson;
use rayon::prelude::*;

use super::{BufferId, BuildOptions, DeviceMode, KernelArg, ProgramId, LOCAL_SIZE};
use crate::{
    dtype::{DType, Scalar},
    error::{BackendError, ErrorStatus},
    slab::Slab,
};

#[derive(Debug, Default, DeJson)]
pub struct HostConfig {
    /// Number of threads used by OpenMP mode.
    /// If set to None, uses rayon's default of one thread per core.
    pub num_threads: Option<usize>,
}

#[derive(Debug)]
pub struct HostDevice {
    parallel: bool,
    pool: Option<rayon::ThreadPool>,
    // Stored as u64 so buffers are aligned for both f32 and f64 views
    buffers: Slab<BufferId, Vec<u64>>,
    programs: Slab<ProgramId, HostProgram>,
}

#[derive(Debug, Clone, Copy)]
struct HostProgram {
    kernel: HostKernel,
    dtype: DType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostKernel {
    Fma,
    Shmem1,
    Shmem2,
}

pub(super) fn initialize_device(
    config: &HostConfig,
    parallel: bool,
    debug_dev: bool,
) -> Result<HostDevice, BackendError> {
    let pool = match (parallel, config.num_threads) {
        (true, Some(num_threads)) => Some(
            rayon::ThreadPoolBuilder::new().num_threads(num_threads).build().map_err(|e| {
                BackendError { status: ErrorStatus::Initialization, context: format!("{e}").into() }
            })?,
        ),
        _ => None,
    };
    if debug_dev {
        if parallel {
            let threads = pool.as_ref().map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads);
            eprintln!("Using host device {}, {threads} threads", std::env::consts::ARCH);
        } else {
            eprintln!("Using host device {}, serial", std::env::consts::ARCH);
        }
    }
    Ok(HostDevice { parallel, pool, buffers: Slab::new(), programs: Slab::new() })
}

impl HostDevice {
    pub(super) const fn mode(&self) -> DeviceMode {
        if self.parallel {
            DeviceMode::OpenMP
        } else {
            DeviceMode::Serial
        }
    }

    #[allow(clippy::unused_self)]
    pub(super) const fn arch(&self) -> &str {
        std::env::consts::ARCH
    }

    pub(super) fn allocate(&mut self, bytes: usize) -> Result<BufferId, BackendError> {
        let len = bytes.div_ceil(size_of::<u64>());
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).map_err(|e| BackendError {
            status: ErrorStatus::MemoryAllocation,
            context: format!("Failed to allocate {bytes} B, {e}").into(),
        })?;
        buffer.resize(len, 0);
        Ok(self.buffers.push(buffer))
    }

    pub(super) fn deallocate(&mut self, buffer_id: BufferId) {
        self.buffers.remove(buffer_id);
    }

    pub(super) fn host_to_device(&mut self, src: &[u8], dst: BufferId, offset: usize) -> Result<(), BackendError> {
        let Some(buffer) = self.buffers.get(dst) else {
            return Err(BackendError { status: ErrorStatus::MemoryCopyH2D, context: "Unknown buffer".into() });
        };
        if offset + src.len() > buffer.len() * size_of::<u64>() {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyH2D,
                context: format!("Copy of {} B at offset {offset} out of bounds", src.len()).into(),
            });
        }
        let buffer = &mut self.buffers[dst];
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(buffer.as_mut_ptr().cast::<u8>(), buffer.len() * size_of::<u64>())
        };
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    pub(super) fn compile(
        &mut self,
        name: &str,
        options: &BuildOptions,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let kernel = match name {
            "fma_rate" => HostKernel::Fma,
            "shmem1_rate" => HostKernel::Shmem1,
            "shmem2_rate" => HostKernel::Shmem2,
            _ => {
                return Err(BackendError {
                    status: ErrorStatus::KernelCompilation,
                    context: format!("Kernel {name} has no host implementation").into(),
                })
            }
        };
        if debug_asm {
            eprintln!("Host kernel {name} {kernel:?}, {}", options.flags().join(" "));
        }
        Ok(self.programs.push(HostProgram { kernel, dtype: options.dtype }))
    }

    pub(super) fn release(&mut self, program_id: ProgramId) {
        self.programs.remove(program_id);
    }

    pub(super) fn launch(
        &mut self,
        program_id: ProgramId,
        work_items: usize,
        args: &[KernelArg],
    ) -> Result<(), BackendError> {
        let program = *self.programs.get(program_id).ok_or_else(|| BackendError {
            status: ErrorStatus::KernelLaunch,
            context: "Unknown program".into(),
        })?;
        let &[KernelArg::Int(n), KernelArg::Int(k), a, KernelArg::Buffer(x), KernelArg::Buffer(y)] = args else {
            return Err(incorrect_args(args));
        };
        let n = usize::try_from(n).map_err(|_| incorrect_args(args))?;
        if n > work_items || k < 0 || x == y {
            return Err(incorrect_args(args));
        }
        match (program.dtype, a) {
            (DType::F32, KernelArg::F32(a)) => self.run::<f32>(program.kernel, n, k, a, x, y),
            (DType::F64, KernelArg::F64(a)) => self.run::<f64>(program.kernel, n, k, a, x, y),
            _ => Err(incorrect_args(args)),
        }
    }

    fn run<T: Scalar>(
        &mut self,
        kernel: HostKernel,
        n: usize,
        k: i32,
        a: T,
        x: BufferId,
        y: BufferId,
    ) -> Result<(), BackendError> {
        let bytes = n * size_of::<T>();
        for id in [x, y] {
            if self.buffers.get(id).map_or(true, |buffer| buffer.len() * size_of::<u64>() < bytes) {
                return Err(BackendError {
                    status: ErrorStatus::IncorrectKernelArg,
                    context: format!("Buffer {id:?} is smaller than {bytes} B").into(),
                });
            }
        }
        // x and y are distinct slab entries, the slab does not move them while both are borrowed
        let x_ptr = self.buffers[x].as_ptr().cast::<T>();
        let y_ptr = self.buffers[y].as_mut_ptr().cast::<T>();
        let x = unsafe { std::slice::from_raw_parts(x_ptr, n) };
        let y = unsafe { std::slice::from_raw_parts_mut(y_ptr, n) };
        let tile = move |x: &[T], y: &mut [T]| match kernel {
            HostKernel::Fma => fma_tile(k, a, x, y),
            HostKernel::Shmem1 => shmem1_tile(k, a, x, y),
            HostKernel::Shmem2 => shmem2_tile(k, a, x, y),
        };
        if !self.parallel {
            y.chunks_mut(LOCAL_SIZE).zip(x.chunks(LOCAL_SIZE)).for_each(|(y, x)| tile(x, y));
        } else if let Some(pool) = &self.pool {
            pool.install(|| {
                y.par_chunks_mut(LOCAL_SIZE).zip(x.par_chunks(LOCAL_SIZE)).for_each(|(y, x)| tile(x, y));
            });
        } else {
            y.par_chunks_mut(LOCAL_SIZE).zip(x.par_chunks(LOCAL_SIZE)).for_each(|(y, x)| tile(x, y));
        }
        Ok(())
    }
}

fn incorrect_args(args: &[KernelArg]) -> BackendError {
    BackendError {
        status: ErrorStatus::IncorrectKernelArg,
        context: format!("Expected (N, k, a, x, y), got {args:?}").into(),
    }
}

fn fma_tile<T: Scalar>(k: i32, a: T, x: &[T], y: &mut [T]) {
    for (y, &x) in y.iter_mut().zip(x) {
        let mut v = x;
        for _ in 0..k {
            v = v.madd(a, a);
        }
        *y = v;
    }
}

// Stack copy of the tile stands in for shared memory
fn shmem1_tile<T: Scalar>(k: i32, a: T, x: &[T], y: &mut [T]) {
    let mut s_x = [T::from_f64(0.0); LOCAL_SIZE];
    s_x[..x.len()].copy_from_slice(x);
    let len = x.len();
    for (t, y) in y.iter_mut().enumerate() {
        let mut v = s_x[t];
        for j in 0..k.unsigned_abs() as usize {
            v = s_x[(t + j) % len].madd(a, v);
        }
        *y = v;
    }
}

fn shmem2_tile<T: Scalar>(k: i32, a: T, x: &[T], y: &mut [T]) {
    let mut s_x = [T::from_f64(0.0); LOCAL_SIZE];
    s_x[..x.len()].copy_from_slice(x);
    let len = x.len();
    for (t, y) in y.iter_mut().enumerate() {
        let mut v = a;
        for j in 0..k.unsigned_abs() as usize {
            v = s_x[(t + j) % len].madd(s_x[(t + j + 1) % len], v);
        }
        *y = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RooflineError;

    fn upload<T: Scalar>(dev: &mut HostDevice, values: &[T]) -> Result<BufferId, BackendError> {
        let buffer = dev.allocate(values.len() * size_of::<T>())?;
        let mut bytes = Vec::new();
        values.iter().for_each(|v| v.extend_ne_bytes(&mut bytes));
        dev.host_to_device(&bytes, buffer, 0)?;
        Ok(buffer)
    }

    fn read<T: Scalar>(dev: &HostDevice, buffer: BufferId, n: usize) -> Vec<T> {
        let buffer = &dev.buffers[buffer];
        unsafe { std::slice::from_raw_parts(buffer.as_ptr().cast::<T>(), n) }.to_vec()
    }

    #[test]
    fn fma_rate_f64() -> Result<(), RooflineError> {
        let mut dev = initialize_device(&HostConfig::default(), false, false)?;
        let x = upload(&mut dev, &[0.0f64, 1.0, 2.0])?;
        let y = dev.allocate(3 * 8)?;
        let program = dev.compile("fma_rate", &BuildOptions::new(DType::F64), false)?;
        let args = [KernelArg::Int(3), KernelArg::Int(2), KernelArg::F64(0.5), KernelArg::Buffer(x), KernelArg::Buffer(y)];
        dev.launch(program, LOCAL_SIZE, &args)?;
        // v -> v/2 + 1/2 applied twice
        assert_eq!(read::<f64>(&dev, y, 3), vec![0.75, 1.0, 1.25]);
        Ok(())
    }

    #[test]
    fn shmem_rates_are_finite() -> Result<(), RooflineError> {
        let mut dev = initialize_device(&HostConfig { num_threads: Some(2) }, true, false)?;
        let n = LOCAL_SIZE * 3 + 17;
        let values: Vec<f32> = (0..n).map(|i| (i % 7) as f32 / 7.0).collect();
        let x = upload(&mut dev, &values)?;
        let y = dev.allocate(n * 4)?;
        for name in ["shmem1_rate", "shmem2_rate"] {
            let program = dev.compile(name, &BuildOptions::new(DType::F32), false)?;
            let args = [
                KernelArg::Int(i32::try_from(n).unwrap()),
                KernelArg::Int(64),
                KernelArg::F32(0.5),
                KernelArg::Buffer(x),
                KernelArg::Buffer(y),
            ];
            dev.launch(program, n.next_multiple_of(LOCAL_SIZE), &args)?;
            assert!(read::<f32>(&dev, y, n).into_iter().all(Scalar::is_finite));
        }
        Ok(())
    }

    #[test]
    fn rejects_mismatched_args() -> Result<(), RooflineError> {
        let mut dev = initialize_device(&HostConfig::default(), false, false)?;
        let x = dev.allocate(16)?;
        let y = dev.allocate(16)?;
        let program = dev.compile("fma_rate", &BuildOptions::new(DType::F64), false)?;
        let args = [KernelArg::Int(2), KernelArg::Int(1), KernelArg::F32(0.5), KernelArg::Buffer(x), KernelArg::Buffer(y)];
        let err = dev.launch(program, LOCAL_SIZE, &args).unwrap_err();
        assert_eq!(err.status, ErrorStatus::IncorrectKernelArg);
        let args = [KernelArg::Int(4), KernelArg::Int(1), KernelArg::F64(0.5), KernelArg::Buffer(x), KernelArg::Buffer(y)];
        let err = dev.launch(program, LOCAL_SIZE, &args).unwrap_err();
        assert_eq!(err.status, ErrorStatus::IncorrectKernelArg);
        let err = dev.compile("mfma4_rate", &BuildOptions::new(DType::F64), false).unwrap_err();
        assert_eq!(err.status, ErrorStatus::KernelCompilation);
        Ok(())
    }
}
