pub mod adapter;
pub mod error;
pub mod noop;
pub mod posix;

pub use adapter::{ExitStatus, LaunchCommand, PlatformAdapter, ProcessHandle, ResourceLimits, Signal};
pub use error::PlatformError;
pub use noop::NoopAdapter;
pub use posix::PosixAdapter;
