/* 📖 # What is the backend layer?

The backend is the only part of dynlib that talks to the operating system's loader. It is a
trait with four capabilities (open, close, symbol lookup, describe last error); the library
handle is written against the trait alone.

One native implementation is compiled in per target: `PosixBackend` on unix, `WindowsBackend`
on Windows. `MockBackend` implements the same trait in memory for tests.
*/

pub mod mock;
#[cfg(unix)]
pub mod posix;
mod traits;
#[cfg(windows)]
pub mod windows;

pub use mock::MockBackend;
#[cfg(unix)]
pub use posix::PosixBackend;
pub use traits::{Backend, BackendHandle, RawModule, RawSymbol};
#[cfg(windows)]
pub use windows::WindowsBackend;

/// The loader backend for the target this crate was built for.
#[cfg(unix)]
pub type NativeBackend = PosixBackend;

/// The loader backend for the target this crate was built for.
#[cfg(windows)]
pub type NativeBackend = WindowsBackend;

#[cfg(not(any(unix, windows)))]
compile_error!("dynlib supports unix and windows targets only");
