use std::borrow::Cow;
use std::error::Error;

/// Error type returned by error-returning listeners.
///
/// Any `std::error::Error + Send + Sync` converts into it with `?` or `.into()`.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors that can occur while registering listeners or emitting signals.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The emission context was cancelled.
    #[error("Context canceled{}", format_context(.context))]
    Canceled { context: Option<Cow<'static, str>> },

    /// The emission context passed its deadline.
    #[error("Context deadline exceeded{}", format_context(.context))]
    DeadlineExceeded { context: Option<Cow<'static, str>> },

    /// An error-returning listener failed and halted `try_emit`.
    ///
    /// The listener's own error is kept as the `source` and can be recovered
    /// with [`SignalError::listener_error`] or by downcasting.
    #[error("Listener failed{}: {source}", format_context(.context))]
    Listener { source: BoxError, context: Option<Cow<'static, str>> },

    /// A keyed listener is already registered under this key.
    #[error("Duplicate listener key{}: {key:?}", format_context(.context))]
    DuplicateKey { key: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl SignalError {
    /// Returns `true` for errors that originate from the emission context
    /// (cancellation or deadline) rather than from a listener.
    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Canceled { .. } | Self::DeadlineExceeded { .. })
    }

    /// Returns `true` if the context was cancelled.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Returns `true` if the context deadline elapsed.
    #[must_use]
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// The error returned by the failing listener, if this is a listener failure.
    #[must_use]
    pub fn listener_error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Listener { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<BoxError> for SignalError {
    #[inline]
    fn from(source: BoxError) -> Self {
        Self::Listener { source, context: None }
    }
}

/// Adds human-readable context to a failed signal operation.
pub trait SignalErrorExt<T> {
    /// Attaches `context` to the error, if any.
    ///
    /// # Errors
    /// Returns the original error annotated with `context`.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, SignalError>;
}

impl<T> SignalErrorExt<T> for Result<T, SignalError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                SignalError::Canceled { context: c }
                | SignalError::DeadlineExceeded { context: c }
                | SignalError::Listener { context: c, .. }
                | SignalError::DuplicateKey { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

impl<T> SignalErrorExt<T> for Result<T, BoxError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, SignalError> {
        self.map_err(|source| SignalError::Listener { source, context: Some(context.into()) })
    }
}

#[allow(clippy::ref_option)]
fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
