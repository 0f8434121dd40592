use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;

use dynlib_base::RawSymbol;

use crate::Library;

/// A value resolved from a [`Library`], usually a function pointer.
///
/// The symbol borrows the library it came from, so the library cannot be closed, reopened
/// or dropped while the symbol is in use. Use [`Symbol::into_raw`] to detach the value and
/// take over that responsibility.
pub struct Symbol<'lib, T> {
    value: T,
    _library: PhantomData<&'lib Library>,
}

impl<T: Copy> Symbol<'_, T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value,
            _library: PhantomData,
        }
    }

    /// Detaches the value from the library borrow.
    ///
    /// The value dangles once every handle to the module is closed; calling it after that
    /// is undefined behaviour.
    pub fn into_raw(self) -> T {
        self.value
    }
}

impl<T> Deref for Symbol<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> fmt::Debug for Symbol<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("type", &format_args!("{}", std::any::type_name::<T>()))
            .finish()
    }
}

/// Reinterprets a resolved address as `T`.
///
/// This is the only place dynlib turns an address into a typed value. `T` must be
/// pointer-sized, which is checked at compile time.
///
/// # Safety
///
/// `T` must match what the module exports under that name: for functions, the calling
/// convention, parameter types and return type. Nothing at runtime can verify this.
pub(crate) unsafe fn cast_address<T: Copy>(address: RawSymbol) -> T {
    const {
        assert!(
            size_of::<T>() == size_of::<*mut c_void>(),
            "symbol type must be pointer-sized"
        )
    };
    let raw = address.as_ptr();
    unsafe { std::mem::transmute_copy::<*mut c_void, T>(&raw) }
}
