use std::ffi::{CStr, c_void};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use super::NativeBackend;

/// Opaque reference to a module loaded by a [`Backend`].
///
/// This is the value returned by `dlopen` or `LoadLibraryW`; it is never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawModule(NonNull<c_void>);

impl RawModule {
    /// Wraps a loader handle, returning `None` for null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// Module handles are process-wide loader identifiers, not thread-bound data.
unsafe impl Send for RawModule {}
unsafe impl Sync for RawModule {}

/// Address of an exported symbol; never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSymbol(NonNull<c_void>);

impl RawSymbol {
    /// Wraps a symbol address, returning `None` for null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

/// The capabilities a platform loader provides.
///
/// Implementations report failure through their return value and keep the diagnostic for
/// [`Backend::last_error`], mirroring `dlerror`/`GetLastError`. Callers must fetch the
/// diagnostic right after the failing call, on the same thread.
pub trait Backend: std::fmt::Debug + Send + Sync + 'static {
    /// Loads the module at `path`, returning a fresh reference the caller must release.
    ///
    /// Loading runs the module's initializers.
    fn open(&self, path: &Path) -> Option<RawModule>;

    /// Releases a reference obtained from [`Backend::open`]. Returns false if the loader
    /// reported a failure.
    fn close(&self, module: RawModule) -> bool;

    /// Looks up the exported symbol `name` in `module`.
    fn symbol(&self, module: RawModule, name: &CStr) -> Option<RawSymbol>;

    /// Describes the most recent failure on the calling thread.
    fn last_error(&self) -> String;
}

/// Shared handle to a backend implementation.
///
/// Wraps `Arc<dyn Backend>` so library handles and their copies can use the same backend.
#[derive(Debug, Clone)]
pub struct BackendHandle(Arc<dyn Backend>);

impl BackendHandle {
    /// Create a new BackendHandle from a Backend implementation.
    pub fn new(backend: impl Backend) -> Self {
        Self(Arc::new(backend))
    }

    /// Handle to the operating system's loader.
    pub fn native() -> Self {
        Self::new(NativeBackend::default())
    }
}

impl Default for BackendHandle {
    fn default() -> Self {
        Self::native()
    }
}

impl std::ops::Deref for BackendHandle {
    type Target = dyn Backend;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
