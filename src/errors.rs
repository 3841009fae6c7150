//! Error handling for the tracer supervisor.
//!
//! Shaped like a small `anyhow`: a single `Error` struct carries the `errno`
//! that should be reported to the tracee (when relevant), a `kind` that the
//! supervisor switches on for control flow, an optional human message and an
//! optional boxed source. See `ErrorKind` for the taxonomy the supervisor
//! actually distinguishes.

pub use nix::errno::Errno::{self, *};
use nix::Error as NixError;
use std::io::Error as IOError;
use std::{
    fmt::{self, Display},
    result,
};

pub type Result<T> = result::Result<T, Error>;

/// The handful of outcomes the supervisor treats differently from a plain
/// "something went wrong". Most library-internal errors don't bother setting
/// this and fall back to `Unspecified`, which the supervisor treats as fatal
/// unless the call site says otherwise.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An unexpected tracing-control failure (EPERM, EINVAL, ...). Aborts the run.
    FatalTracing,
    /// ESRCH hit while operating on a tracee that has just exited. Swallowed.
    TraceeVanished,
    /// A value-mapper lookup missed. Callers decide locally whether that's
    /// expected (first sighting) or a bug.
    LookupMissing,
    /// Not really an error: a control-flow signal from a handler's `post`
    /// back to the supervisor, asking it to replay the syscall.
    HandlerRetryRequested,
    /// The tracee was killed by a signal. Not an internal error; becomes the
    /// process exit code (128 + signum).
    TraceeCrash(i32),
    Unspecified,
}

pub struct Error {
    errno: Errno,
    kind: ErrorKind,
    msg: Option<Box<dyn Display + Send + Sync + 'static>>,
    source: Option<Box<dyn std::error::Error>>,
}

#[allow(dead_code)]
impl Error {
    pub fn unknown() -> Self {
        Error::errno(Errno::UnknownErrno)
    }

    pub fn errno(errno: Errno) -> Self {
        Error {
            errno,
            kind: ErrorKind::Unspecified,
            msg: None,
            source: None,
        }
    }

    pub fn kind(kind: ErrorKind) -> Self {
        let errno = match kind {
            ErrorKind::TraceeVanished => Errno::ESRCH,
            _ => Errno::UnknownErrno,
        };
        Error {
            errno,
            kind,
            msg: None,
            source: None,
        }
    }

    pub fn msg<M>(msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        Error::errno_with_msg(Errno::UnknownErrno, msg)
    }

    pub fn errno_with_msg<M>(errno: Errno, msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        Error {
            errno,
            kind: ErrorKind::Unspecified,
            msg: Some(Box::new(msg)),
            source: None,
        }
    }

    pub fn with_errno(mut self, errno: Errno) -> Self {
        self.errno = errno;
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_msg<M>(mut self, msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        self.msg = Some(Box::new(msg));
        self
    }

    pub fn get_errno(&self) -> Errno {
        self.errno
    }

    pub fn get_kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether this error is the expected "ptrace call raced the tracee's
    /// own exit" case, which the supervisor swallows rather than aborts on.
    pub fn is_tracee_vanished(&self) -> bool {
        self.kind == ErrorKind::TraceeVanished || self.errno == Errno::ESRCH
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error with {}({})", self.errno, self.errno as i32)?;
        if let Some(msg) = &self.msg {
            write!(f, ", msg: {}", msg)?;
        }
        if let Some(source) = &self.source {
            write!(f, ", source: {}", source)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Error");
        d.field("errno", &self.errno);
        d.field("kind", &self.kind);
        match self.msg.as_ref() {
            Some(msg) => d.field("msg", &Some(format_args!("{}", msg))),
            None => d.field("msg", &Option::<()>::None),
        };
        d.field("source", &self.source).finish()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.errno == other.errno && self.kind == other.kind
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Error {
        let kind = if errno == Errno::ESRCH {
            ErrorKind::TraceeVanished
        } else {
            ErrorKind::Unspecified
        };
        Error {
            errno,
            kind,
            msg: None,
            source: None,
        }
    }
}

impl From<IOError> for Error {
    fn from(error: IOError) -> Error {
        let errno = match error.raw_os_error() {
            Some(errno) => Errno::from_i32(errno),
            None => Errno::UnknownErrno,
        };
        let kind = if errno == Errno::ESRCH {
            ErrorKind::TraceeVanished
        } else {
            ErrorKind::Unspecified
        };
        Error {
            errno,
            kind,
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

impl From<NixError> for Error {
    fn from(error: NixError) -> Error {
        let errno = match error {
            NixError::Sys(errno) => errno,
            _ => Errno::UnknownErrno,
        };
        let kind = if errno == Errno::ESRCH {
            ErrorKind::TraceeVanished
        } else {
            ErrorKind::Unspecified
        };
        Error {
            errno,
            kind,
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

/// `.context(...)`/`.errno(...)` chaining on any `Result<T, E>` where `E`
/// converts into our `Error`, mirroring `anyhow::Context`.
#[allow(dead_code)]
pub trait WithContext<T> {
    fn errno(self, errno: Errno) -> Result<T>;
    fn kind(self, kind: ErrorKind) -> Result<T>;

    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;
}

#[allow(dead_code)]
impl<T, E> WithContext<T> for result::Result<T, E>
where
    Error: From<E>,
{
    fn errno(self, errno: Errno) -> Result<T> {
        self.map_err(|error| Into::<Error>::into(error).with_errno(errno))
    }

    fn kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|error| Into::<Error>::into(error).with_kind(kind))
    }

    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|error| Into::<Error>::into(error).with_msg(context))
    }
}
