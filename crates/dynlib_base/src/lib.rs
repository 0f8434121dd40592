/* 📖 # What lives in dynlib_base?
dynlib_base holds the error types, the tracing setup and the platform backends that the
library handle in the `dynlib` crate is written against.
*/

pub mod backend;
pub mod error;
pub mod tracing;

// Re-export commonly used types for convenience
pub use backend::{Backend, BackendHandle, MockBackend, NativeBackend, RawModule, RawSymbol};
pub use error::{DynlibError, DynlibResult, ErrorKind, ResultExt};
