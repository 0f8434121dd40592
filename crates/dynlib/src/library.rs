use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};

use dynlib_base::{
    BackendHandle, DynlibError, DynlibResult, ErrorKind, RawModule, RawSymbol, ResultExt,
};
use tracing::{debug, instrument, warn};

use crate::symbol::{Symbol, cast_address};

/* 📖 # How does a Library own its module?

A `Library` is either Closed (no module) or Open (one module reference plus the path it was
opened from). The reference is owned by exactly one `Library` at a time:

- `try_clone` asks the backend to open the same path again. The copy gets its own reference
  that it closes independently; the OS shares the mapping and counts references itself.
- `take` and ordinary Rust moves transfer the reference. `take` leaves the source Closed.
- `close` always forgets the reference, even when the backend reports a failure, so a
  released module is never used or released again.
- `Drop` closes on a best-effort basis. A failure there is logged at warn level and
  dropped; call `close` explicitly to observe it.
*/

#[derive(Debug)]
struct Loaded {
    module: RawModule,
    origin: PathBuf,
}

/// Owning handle to a shared library loaded at runtime.
///
/// # Examples
///
/// ```no_run
/// use dynlib::Library;
///
/// # fn main() -> dynlib::DynlibResult<()> {
/// let mut library = Library::new();
/// library.open("./libtest.so")?;
/// let test = unsafe { library.get::<unsafe extern "C" fn()>("test")? };
/// unsafe { test() };
/// library.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Library {
    backend: BackendHandle,
    loaded: Option<Loaded>,
}

impl Library {
    /// Creates a Closed handle using the native loader.
    pub fn new() -> Self {
        Self::with_backend(BackendHandle::native())
    }

    /// Creates a Closed handle using `backend`.
    pub fn with_backend(backend: BackendHandle) -> Self {
        Self {
            backend,
            loaded: None,
        }
    }

    /// Opens the library at `path` with the native loader.
    pub fn load(path: impl AsRef<Path>) -> DynlibResult<Self> {
        Self::load_with(BackendHandle::native(), path)
    }

    /// Opens the library at `path` with `backend`.
    pub fn load_with(backend: BackendHandle, path: impl AsRef<Path>) -> DynlibResult<Self> {
        let mut library = Self::with_backend(backend);
        library.open(path)?;
        Ok(library)
    }

    /// Loads the library at `path`, closing the currently open one first.
    ///
    /// A failure to close the previous library is returned before anything is loaded.
    /// On any failure the handle is left Closed. Loading runs the library's initializers.
    pub fn open(&mut self, path: impl AsRef<Path>) -> DynlibResult<()> {
        self.open_path(path.as_ref())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn open_path(&mut self, path: &Path) -> DynlibResult<()> {
        self.close()?;

        if path.as_os_str().is_empty() {
            return Err(ErrorKind::OpenLibrary {
                path: PathBuf::new(),
                message: "library path is empty".to_string(),
            }
            .into());
        }

        let Some(module) = self.backend.open(path) else {
            let message = self.backend.last_error();
            debug!(%message, "loader rejected library");
            return Err(ErrorKind::OpenLibrary {
                path: path.to_path_buf(),
                message,
            }
            .into());
        };

        debug!("library opened");
        self.loaded = Some(Loaded {
            module,
            origin: path.to_path_buf(),
        });
        Ok(())
    }

    /// Releases the open library. Does nothing when Closed.
    ///
    /// The handle is Closed afterwards even if the loader reports a failure.
    #[instrument(skip_all)]
    pub fn close(&mut self) -> DynlibResult<()> {
        let Some(loaded) = self.loaded.take() else {
            return Ok(());
        };

        if self.backend.close(loaded.module) {
            debug!(path = %loaded.origin.display(), "library closed");
            return Ok(());
        }

        let message = self.backend.last_error();
        Err(ErrorKind::CloseLibrary {
            path: loaded.origin,
            message,
        }
        .into())
    }

    /// Returns a second handle with its own reference to the same library.
    ///
    /// The copy is made by opening the origin path again; a Closed handle yields a Closed
    /// copy.
    #[instrument(skip_all)]
    pub fn try_clone(&self) -> DynlibResult<Self> {
        let mut copy = Self::with_backend(self.backend.clone());
        if let Some(loaded) = &self.loaded {
            copy.open_path(&loaded.origin).with_context(|| {
                format!(
                    "Failed to duplicate handle to '{}'",
                    loaded.origin.display()
                )
            })?;
        }
        Ok(copy)
    }

    /// Moves the open library into a new handle, leaving this one Closed.
    pub fn take(&mut self) -> Self {
        Self {
            backend: self.backend.clone(),
            loaded: self.loaded.take(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.loaded.is_some()
    }

    /// Path the open library was loaded from; `None` when Closed.
    pub fn path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|loaded| loaded.origin.as_path())
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Resolves the exported symbol `name` as a `T`.
    ///
    /// Fails with `NoLibraryOpen` when Closed and `NoSuchFunction` when the library has no
    /// such export.
    ///
    /// # Safety
    ///
    /// `T` must be a pointer-sized type matching the export exactly: for functions, the
    /// calling convention, parameter types and return type. A mismatch is undefined
    /// behaviour when the value is used.
    pub unsafe fn get<T: Copy>(&self, name: &str) -> DynlibResult<Symbol<'_, T>> {
        let address = self.lookup(name)?;
        Ok(Symbol::new(unsafe { cast_address::<T>(address) }))
    }

    /// Like [`Library::get`], but stores the value in `dest`. `dest` is untouched on failure.
    ///
    /// # Safety
    ///
    /// Same contract as [`Library::get`]. In addition, the stored value must not be used
    /// after every handle to the library has been closed.
    pub unsafe fn get_into<T: Copy>(&self, name: &str, dest: &mut T) -> DynlibResult<()> {
        let symbol = unsafe { self.get::<T>(name)? };
        *dest = symbol.into_raw();
        Ok(())
    }

    #[instrument(skip(self))]
    fn lookup(&self, name: &str) -> DynlibResult<RawSymbol> {
        let Some(loaded) = &self.loaded else {
            return Err(ErrorKind::NoLibraryOpen {
                name: name.to_string(),
            }
            .into());
        };

        let Ok(c_name) = CString::new(name) else {
            return Err(ErrorKind::NoSuchFunction {
                name: name.to_string(),
                message: "symbol name contains an interior nul byte".to_string(),
            }
            .into());
        };

        self.backend.symbol(loaded.module, &c_name).ok_or_else(|| {
            Box::new(DynlibError::new(ErrorKind::NoSuchFunction {
                name: name.to_string(),
                message: self.backend.last_error(),
            }))
        })
    }

    /// File-name suffix of loadable modules on this platform: `.so`, `.dylib` or `.dll`.
    pub fn platform_suffix() -> &'static str {
        std::env::consts::DLL_SUFFIX
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(%error, "failed to release library on drop");
        }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use dynlib_base::MockBackend;
    use expect_test::expect;

    use super::*;

    extern "C" fn answer() -> i32 {
        42
    }

    unsafe extern "C" fn mean(values: *const i32, len: usize) -> f64 {
        let values = unsafe { std::slice::from_raw_parts(values, len) };
        values.iter().map(|&v| f64::from(v)).sum::<f64>() / len as f64
    }

    static GREETING: &[u8] = b"hello\0";

    type AnswerFn = extern "C" fn() -> i32;
    type MeanFn = unsafe extern "C" fn(*const i32, usize) -> f64;

    fn math_backend() -> (MockBackend, BackendHandle) {
        let mock = MockBackend::new();
        mock.add_symbol("libmath.so", "answer", answer as *const ());
        mock.add_symbol("libmath.so", "mean", mean as *const ());
        mock.add_symbol("libmath.so", "greeting", GREETING.as_ptr() as *const ());
        mock.add_symbol("libother.so", "answer", answer as *const ());
        let handle = BackendHandle::new(mock.clone());
        (mock, handle)
    }

    fn assert_no_library_open(library: &Library) {
        let err = unsafe { library.get::<AnswerFn>("answer") }.unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::NoLibraryOpen { name } if name == "answer"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_new_library_is_closed() {
        let (_, backend) = math_backend();
        let library = Library::with_backend(backend);
        assert!(!library.is_open());
        assert_eq!(library.path(), None);
        assert_no_library_open(&library);
    }

    #[test]
    fn test_load_and_call() {
        let (_, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        assert!(library.is_open());
        assert_eq!(library.path(), Some(Path::new("libmath.so")));

        let answer = unsafe { library.get::<AnswerFn>("answer") }.unwrap();
        assert_eq!(answer(), 42);

        let mean = unsafe { library.get::<MeanFn>("mean") }.unwrap();
        let values = [1, 2, 3];
        assert_eq!(unsafe { mean(values.as_ptr(), values.len()) }, 2.0);
    }

    #[test]
    fn test_get_data_symbol() {
        let (_, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        let greeting = unsafe { library.get::<*const u8>("greeting") }.unwrap();
        assert_eq!(*greeting, GREETING.as_ptr());
    }

    #[test]
    fn test_get_into() {
        let (_, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();

        let mut slot: Option<AnswerFn> = None;
        unsafe { library.get_into("answer", &mut slot) }.unwrap();
        assert_eq!(slot.map(|f| f()), Some(42));

        let mut untouched: *const c_void = std::ptr::null();
        let err = unsafe { library.get_into("missing", &mut untouched) }.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoSuchFunction { .. }));
        assert!(untouched.is_null());
    }

    #[test]
    fn test_missing_symbol() {
        let (_, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        let err = unsafe { library.get::<AnswerFn>("invalid_function_name") }.unwrap_err();

        expect![[r#"
            No function 'invalid_function_name' in library: libmath.so: undefined symbol: invalid_function_name

        "#]]
        .assert_debug_eq(&err);
        assert!(library.is_open());
    }

    #[test]
    fn test_symbol_name_with_nul_byte() {
        let (_, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        let err = unsafe { library.get::<AnswerFn>("ans\0wer") }.unwrap_err();
        assert_eq!(
            err.kind().native_message(),
            Some("symbol name contains an interior nul byte")
        );
    }

    #[test]
    fn test_open_missing_library_leaves_closed() {
        let (mock, backend) = math_backend();
        let mut library = Library::with_backend(backend);
        let err = library.open("libmissing.so").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to open library 'libmissing.so': libmissing.so: cannot open shared object file: No such file or directory"
        );
        assert!(!library.is_open());
        assert_no_library_open(&library);
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn test_failed_open_releases_previous_library() {
        let (mock, backend) = math_backend();
        let mut library = Library::load_with(backend, "libmath.so").unwrap();
        assert!(library.open("libmissing.so").is_err());
        assert!(!library.is_open());
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn test_open_empty_path() {
        let (mock, backend) = math_backend();
        let mut library = Library::with_backend(backend);
        let err = library.open("").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OpenLibrary { .. }));
        assert_eq!(mock.open_calls(), 0);
    }

    #[test]
    fn test_open_replaces_current_library() {
        let (mock, backend) = math_backend();
        let mut library = Library::load_with(backend, "libmath.so").unwrap();
        library.open(PathBuf::from("libother.so")).unwrap();
        assert_eq!(library.path(), Some(Path::new("libother.so")));
        assert_eq!(mock.live_handles(), 1);
        assert!(unsafe { library.get::<AnswerFn>("mean") }.is_err());
    }

    #[test]
    fn test_open_propagates_close_failure() {
        let (mock, backend) = math_backend();
        mock.set_fail_close("libmath.so", true);
        let mut library = Library::load_with(backend, "libmath.so").unwrap();

        let err = library.open("libother.so").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CloseLibrary { .. }));
        assert!(!library.is_open());
        assert_eq!(mock.open_calls(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mock, backend) = math_backend();
        let mut library = Library::load_with(backend, "libmath.so").unwrap();
        library.close().unwrap();
        library.close().unwrap();
        assert!(!library.is_open());
        assert_eq!(mock.live_handles(), 0);
        assert_no_library_open(&library);
    }

    #[test]
    fn test_failed_close_still_clears_handle() {
        let (mock, backend) = math_backend();
        mock.set_fail_close("libmath.so", true);
        let mut library = Library::load_with(backend, "libmath.so").unwrap();

        let err = library.close().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to close library 'libmath.so': libmath.so: failed to unload module"
        );
        assert!(!library.is_open());
        assert_no_library_open(&library);
        library.close().unwrap();
    }

    #[test]
    fn test_try_clone_is_independent() {
        let (mock, backend) = math_backend();
        let mut original = Library::load_with(backend, "libmath.so").unwrap();
        let copy = original.try_clone().unwrap();
        assert_eq!(mock.live_handles(), 2);
        assert_eq!(copy.path(), original.path());

        original.close().unwrap();
        assert_eq!(mock.live_handles(), 1);
        let answer = unsafe { copy.get::<AnswerFn>("answer") }.unwrap();
        assert_eq!(answer(), 42);

        drop(copy);
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn test_try_clone_of_closed_library() {
        let (mock, backend) = math_backend();
        let library = Library::with_backend(backend);
        let copy = library.try_clone().unwrap();
        assert!(!copy.is_open());
        assert_eq!(mock.open_calls(), 0);
    }

    #[test]
    fn test_try_clone_fails_when_library_vanished() {
        let (mock, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        mock.remove_library("libmath.so");

        let err = library.try_clone().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OpenLibrary { .. }));
        assert_eq!(
            err.get_context(),
            ["Failed to duplicate handle to 'libmath.so'".to_string()]
        );
        assert!(library.is_open());
    }

    #[test]
    fn test_take_leaves_source_closed() {
        let (mock, backend) = math_backend();
        let mut source = Library::load_with(backend, "libmath.so").unwrap();
        let target = source.take();

        assert!(!source.is_open());
        assert_no_library_open(&source);
        assert_eq!(target.path(), Some(Path::new("libmath.so")));
        let answer = unsafe { target.get::<AnswerFn>("answer") }.unwrap();
        assert_eq!(answer(), 42);

        drop(source);
        assert_eq!(mock.live_handles(), 1);
        drop(target);
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn test_move_transfers_ownership() {
        let (mock, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        let moved = vec![library];
        assert_eq!(mock.live_handles(), 1);
        drop(moved);
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn test_drop_swallows_close_failure() {
        let (mock, backend) = math_backend();
        mock.set_fail_close("libmath.so", true);
        let library = Library::load_with(backend, "libmath.so").unwrap();
        drop(library);
        assert_eq!(mock.live_handles(), 1);
    }

    #[test]
    fn test_debug_output() {
        let (_, backend) = math_backend();
        let library = Library::load_with(backend, "libmath.so").unwrap();
        assert_eq!(
            format!("{:?}", library),
            r#"Library { path: Some("libmath.so"), open: true }"#
        );
    }

    #[test]
    fn test_platform_suffix() {
        let suffix = Library::platform_suffix();
        assert!(suffix.starts_with('.'));
        assert_eq!(suffix, Library::platform_suffix());
        if cfg!(windows) {
            assert_eq!(suffix, ".dll");
        } else if cfg!(target_vendor = "apple") {
            assert_eq!(suffix, ".dylib");
        } else {
            assert_eq!(suffix, ".so");
        }
    }

    #[test]
    fn test_library_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Library>();
    }
}
