use crate::context::Context;
use crate::error::BoxError;
use std::fmt;
use std::sync::Arc;

type PlainFn<T> = dyn Fn(&Context, &T) + Send + Sync;
type FallibleFn<T> = dyn Fn(&Context, &T) -> Result<(), BoxError> + Send + Sync;

/// A registered callback: either plain or error-returning.
pub(crate) enum Listener<T> {
    Plain(Arc<PlainFn<T>>),
    Fallible(Arc<FallibleFn<T>>),
}

impl<T> Listener<T> {
    pub(crate) fn plain<F>(listener: F) -> Self
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        Self::Plain(Arc::new(listener))
    }

    pub(crate) fn fallible<F, E>(listener: F) -> Self
    where
        F: Fn(&Context, &T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
        T: 'static,
    {
        Self::Fallible(Arc::new(move |ctx: &Context, payload: &T| {
            listener(ctx, payload).map_err(Into::into)
        }))
    }

    /// Invokes the listener, discarding any error it returns.
    #[inline]
    pub(crate) fn call(&self, ctx: &Context, payload: &T) {
        match self {
            Self::Plain(listener) => listener(ctx, payload),
            Self::Fallible(listener) => {
                let _ = listener(ctx, payload);
            },
        }
    }

    /// Invokes the listener; plain listeners always succeed.
    #[inline]
    pub(crate) fn try_call(&self, ctx: &Context, payload: &T) -> Result<(), BoxError> {
        match self {
            Self::Plain(listener) => {
                listener(ctx, payload);
                Ok(())
            },
            Self::Fallible(listener) => listener(ctx, payload),
        }
    }
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(listener) => Self::Plain(Arc::clone(listener)),
            Self::Fallible(listener) => Self::Fallible(Arc::clone(listener)),
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Listener::Plain"),
            Self::Fallible(_) => f.write_str("Listener::Fallible"),
        }
    }
}

/// A subscriber list entry.
///
/// `key` is `None` for anonymous registrations; `Some("")` is a valid,
/// explicitly keyed entry.
#[derive(Debug)]
pub(crate) struct KeyedEntry<T> {
    pub(crate) listener: Listener<T>,
    pub(crate) key: Option<String>,
}
