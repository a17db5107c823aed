use std::fmt::Display;

/// Enumeration representing the various errors that can occur while benchmarking.
#[derive(Debug)]
pub enum RooflineError {
    /// Unknown device mode, dtype or out of range problem size
    ConfigError(Box<str>),
    /// Device returned a non positive elapsed time
    TimingError(Box<str>),
    /// Error from file or stdout operations
    IOError(std::io::Error),
    /// Error returned by backends
    BackendError(BackendError),
}

impl RooflineError {
    /// Config error
    #[track_caller]
    pub fn config_error(e: Box<str>) -> Self {
        let location = std::panic::Location::caller();
        let mut e: String = e.into();
        e += &format!(", {}:{}:{}", location.file(), location.line(), location.column());
        Self::ConfigError(e.into())
    }

    /// Timing error
    #[track_caller]
    pub fn timing_error(e: Box<str>) -> Self {
        let location = std::panic::Location::caller();
        let mut e: String = e.into();
        e += &format!(", {}:{}:{}", location.file(), location.line(), location.column());
        Self::TimingError(e.into())
    }
}

impl std::fmt::Display for RooflineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RooflineError::ConfigError(e) => f.write_fmt(format_args!("Config {e}")),
            RooflineError::TimingError(e) => f.write_fmt(format_args!("Timing {e}")),
            RooflineError::IOError(e) => f.write_fmt(format_args!("IO {e}")),
            RooflineError::BackendError(e) => f.write_fmt(format_args!("Backend {e}")),
        }
    }
}

impl std::error::Error for RooflineError {}

impl From<std::io::Error> for RooflineError {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

/// Failure reported by a device runtime, build logs included in context.
#[derive(Debug)]
pub struct BackendError {
    pub status: ErrorStatus,
    pub context: Box<str>,
}

impl From<BackendError> for RooflineError {
    fn from(value: BackendError) -> Self {
        RooflineError::BackendError(value)
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}: {}", self.status, self.context))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Backend initialization failure
    Initialization,
    /// Failed to enumerate devices
    DeviceEnumeration,
    /// Failed to query device for information
    DeviceQuery,
    /// Failed to allocate memory
    MemoryAllocation,
    /// Failed to copy memory to device
    MemoryCopyH2D,
    /// Kernel argument was not correct
    IncorrectKernelArg,
    /// Failed to compile kernel
    KernelCompilation,
    /// Failed to launch kernel
    KernelLaunch,
    /// Failed to synchronize kernel
    KernelSync,
}
