//! Cross-platform loading of shared libraries and lookup of their exported functions.
//!
//! ```no_run
//! use dynlib::Library;
//!
//! # fn main() -> dynlib::DynlibResult<()> {
//! let library = Library::load(format!("./libplugin{}", Library::platform_suffix()))?;
//! let init = unsafe { library.get::<unsafe extern "C" fn() -> i32>("plugin_init")? };
//! let status = unsafe { init() };
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

pub mod library;
pub mod symbol;

pub use dynlib_base::{BackendHandle, DynlibError, DynlibResult, ErrorKind};
pub use library::Library;
pub use symbol::Symbol;
