/// Type-state markers for the builder pattern
///
/// These track at compile time whether a transport mode and a session
/// listener have been chosen, so `build()` only exists once both are set.

use std::marker::PhantomData;

/// Marker trait for transport mode state
pub trait ModeState {}

/// No transport mode chosen yet
pub struct NoMode;
impl ModeState for NoMode {}

/// Direct or relay mode chosen
pub struct HasMode;
impl ModeState for HasMode {}

/// Marker trait for session listener state
pub trait SessionState {}

/// Session listener has not been set
pub struct NoSession;
impl SessionState for NoSession {}

/// Session listener has been set
pub struct HasSession;
impl SessionState for HasSession {}

/// Phantom marker to prevent direct construction
#[derive(Debug, Clone, Copy)]
pub struct TypeState<M, S> {
    _mode: PhantomData<M>,
    _session: PhantomData<S>,
}

impl<M, S> TypeState<M, S> {
    pub(crate) fn new() -> Self {
        Self {
            _mode: PhantomData,
            _session: PhantomData,
        }
    }
}

impl<M, S> Default for TypeState<M, S> {
    fn default() -> Self {
        Self::new()
    }
}
