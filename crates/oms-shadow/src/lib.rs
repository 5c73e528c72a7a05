//! Shadow-index lifecycle.
//!
//! Build a new index beside the active one, then promote it atomically
//! under a sub-10-second lock window. The controller coordinates the
//! store rows, the lock manager, and the filesystem switch; the state
//! machine and circuit breaker are pure and unit-tested in isolation.

mod breaker;
mod controller;
mod machine;
mod switch;

pub use breaker::{BreakerState, CircuitBreaker};
pub use controller::{ShadowController, ShadowError, SwitchRequest, EVENT_SOURCE};
pub use machine::{apply, ShadowEvent, TransitionError};
pub use switch::{artifact_size, perform_switch, SwitchOptions, SwitchResult};
