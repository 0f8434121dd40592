use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use tracing_error::{SpanTrace, SpanTraceStatus};

/* 📖 # How are loader failures represented?

Every failing library operation produces a `DynlibError` whose `ErrorKind` names what went
wrong. The four loader kinds (open, close, missing function, no library open) carry the
platform's diagnostic text verbatim; the remaining kinds cover configuration and file access
in the tooling around the loader.

`DynlibError` adds the runtime context on top of the kind: context strings pushed while the
error propagates, an optional causing error, and the span trace captured at construction.
*/

/// Error variants that can occur in dynlib operations.
#[derive(Debug)]
pub enum ErrorKind {
    /// The loader could not load the module at `path`.
    OpenLibrary { path: PathBuf, message: String },

    /// The loader reported a failure while releasing the module opened from `path`.
    CloseLibrary { path: PathBuf, message: String },

    /// The open module exports no symbol called `name`.
    NoSuchFunction { name: String, message: String },

    /// A symbol lookup for `name` was attempted while no module is open.
    NoLibraryOpen { name: String },

    /// File system operation failed
    FileError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Catch-all for other errors with a message
    Message { message: String },
}

impl ErrorKind {
    /// Returns true for the failures raised by the library handle itself.
    pub fn is_library_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::OpenLibrary { .. }
                | ErrorKind::CloseLibrary { .. }
                | ErrorKind::NoSuchFunction { .. }
                | ErrorKind::NoLibraryOpen { .. }
        )
    }

    /// The platform diagnostic carried by the loader kinds, if any.
    pub fn native_message(&self) -> Option<&str> {
        match self {
            ErrorKind::OpenLibrary { message, .. }
            | ErrorKind::CloseLibrary { message, .. }
            | ErrorKind::NoSuchFunction { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::OpenLibrary { path, message } => {
                write!(f, "Failed to open library '{}': {}", path.display(), message)
            }
            ErrorKind::CloseLibrary { path, message } => {
                write!(f, "Failed to close library '{}': {}", path.display(), message)
            }
            ErrorKind::NoSuchFunction { name, message } => {
                write!(f, "No function '{}' in library: {}", name, message)
            }
            ErrorKind::NoLibraryOpen { name } => {
                write!(
                    f,
                    "Cannot resolve '{}': no library is open, call open() first",
                    name
                )
            }
            ErrorKind::FileError { path, source } => {
                write!(f, "File error at {}: {}", path.display(), source)
            }
            ErrorKind::Message { message } => write!(f, "{}", message),
        }
    }
}

/// Error type wrapping an `ErrorKind` with context, an optional cause and a span trace.
pub struct DynlibError {
    kind: ErrorKind,
    context: Vec<String>,
    cause: Option<Box<DynlibError>>,
    span_trace: SpanTrace,
}

impl DynlibError {
    /// Creates a new error from an ErrorKind, capturing the current span trace.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: vec![],
            cause: None,
            span_trace: SpanTrace::capture(),
        }
    }

    /// Creates a `Message` error.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Message {
            message: message.into(),
        })
    }

    /// Attaches context to an error.
    /// Context is displayed before the error message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Attaches context using lazy evaluation.
    pub fn with_context<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.context.push(f());
        self
    }

    /// Records the error that led to this one.
    pub fn caused_by(mut self, cause: impl Into<Box<DynlibError>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Returns a reference to the underlying ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn get_context(&self) -> &[String] {
        &self.context
    }

    pub fn cause(&self) -> Option<&DynlibError> {
        self.cause.as_deref()
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// See [`ErrorKind::is_library_error`].
    pub fn is_library_error(&self) -> bool {
        self.kind.is_library_error()
    }

    /// Returns the innermost error in the chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: &str) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        let item_count = self.context.len() + usize::from(self.cause.is_some());
        for (i, ctx) in self.context.iter().enumerate() {
            let connector = if i + 1 == item_count { "└─" } else { "├─" };
            writeln!(f, "{}{} {}", indent, connector, ctx)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "{}└─ cause: ", indent)?;
            cause.fmt_tree(f, &format!("{}   ", indent))?;
        }
        Ok(())
    }
}

impl From<ErrorKind> for DynlibError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<ErrorKind> for Box<DynlibError> {
    fn from(kind: ErrorKind) -> Self {
        Box::new(DynlibError::new(kind))
    }
}

impl StdError for DynlibError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.kind {
            ErrorKind::FileError { source, .. } => Some(source),
            _ => self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static)),
        }
    }
}

impl fmt::Display for DynlibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ctx in &self.context {
            write!(f, "{}: ", ctx)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl fmt::Debug for DynlibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, "")?;
        if self.span_trace.status() == SpanTraceStatus::CAPTURED {
            writeln!(f, "Trace: {}", self.span_trace)?;
        }
        Ok(())
    }
}

/// Standard result type for dynlib operations.
pub type DynlibResult<T> = std::result::Result<T, Box<DynlibError>>;

/// Extension trait for attaching context to Results.
pub trait ResultExt<T> {
    /// Attaches context to an error, consuming and re-wrapping it.
    fn context(self, context: impl Into<String>) -> DynlibResult<T>;

    /// Attaches context using lazy evaluation.
    /// Context is only evaluated if the result is an error.
    fn with_context<F>(self, f: F) -> DynlibResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for DynlibResult<T> {
    fn context(self, context: impl Into<String>) -> DynlibResult<T> {
        self.map_err(|err| Box::new(err.context(context)))
    }

    fn with_context<F>(self, f: F) -> DynlibResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| Box::new(err.with_context(f)))
    }
}

/// Builds a boxed `Message` error from format arguments.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        ::std::boxed::Box::new($crate::DynlibError::message(format!($($arg)*)))
    };
}
