//! Declarative state-transition helper.
//!
//! Grounded on the teacher's `state!`/`transition!` macros
//! (`s2n-quic-core::state`), trimmed to what FPR's two closed state
//! machines (§3 connection state, §4.3 security state) need: every
//! `(state, event)` pair either transitions or is rejected with an
//! error that names the event and the state it was attempted from, per
//! the design note in §9 ("every transition in §4.3 and §3 is total").

use core::fmt;

pub type Result<T> = core::result::Result<(), Error<T>>;

/// An attempted transition that the state machine does not define.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error<T> {
    /// `current` does not have a defined transition for `event`.
    InvalidTransition { current: T, event: &'static str },
}

impl<T: fmt::Debug> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { current, event } => {
                write!(f, "no transition for event `{event}` from state {current:?}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl<T: fmt::Debug> std::error::Error for Error<T> {}

#[macro_export]
#[doc(hidden)]
macro_rules! __log_state_transition__ {
    ($event:expr, $state:expr, $target:expr) => {
        #[cfg(feature = "state-tracing")]
        tracing::debug!(event = $event, prev = ?$state, next = ?$target);
    };
}

pub use crate::__log_state_transition__ as log_transition;

/// Declares a named method that performs a guarded state transition.
///
/// ```ignore
/// state_event! {
///     /// doc comment carried onto the generated method
///     connect(Discovered | Pending => Connected);
/// }
/// ```
#[macro_export]
macro_rules! __state_event__ {
    ($(
        $(#[doc = $doc:literal])*
        $event:ident ( $($($valid:ident)|+ => $target:ident),+ $(,)? )
    );+ $(;)?) => {
        $(
            $crate::state::event!(@single $(#[doc = $doc])* $event ( $($($valid)|+ => $target),+ ));
        )+
    };
    (@single $(#[doc = $doc:literal])* $event:ident ( $($($valid:ident)|+ => $target:ident),+ $(,)? )) => {
        $(#[doc = $doc])*
        #[inline]
        pub fn $event(&mut self) -> $crate::state::Result<Self> {
            $(
                if matches!(*self, $(Self::$valid)|+) {
                    $crate::state::log_transition!(stringify!($event), self, Self::$target);
                    *self = Self::$target;
                    return Ok(());
                }
            )+
            Err($crate::state::Error::InvalidTransition {
                current: self.clone(),
                event: stringify!($event),
            })
        }
    };
}

pub use crate::__state_event__ as event;

#[cfg(test)]
mod tests {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Door {
        Open,
        Closed,
        Locked,
    }

    impl Door {
        crate::state::event! {
            /// Closes the door
            close(Open => Closed);
            /// Locks a closed door
            lock(Closed => Locked);
            /// Unlocks back to closed
            unlock(Locked => Closed);
        }
    }

    #[test]
    fn valid_transitions_succeed() {
        let mut door = Door::Open;
        door.close().unwrap();
        assert_eq!(door, Door::Closed);
        door.lock().unwrap();
        assert_eq!(door, Door::Locked);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut door = Door::Open;
        let err = door.lock().unwrap_err();
        assert_eq!(door, Door::Open);
        match err {
            crate::state::Error::InvalidTransition { current, event } => {
                assert_eq!(current, Door::Open);
                assert_eq!(event, "lock");
            }
        }
    }
}
