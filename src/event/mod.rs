//! Event Loop
//!
//! A single-threaded reactor built on `mio`. It delivers two kinds of events:
//!
//! - **File events**: a descriptor became readable or writable
//! - **Timer events**: a deadline passed (one-shot or repeating)
//!
//! ## One Iteration
//!
//! ```text
//! timeout = max(10ms, nearest timer deadline - now)   (1s if no timers)
//!     │
//!     ▼
//! poll(timeout) ──> ready (fd, mask) pairs
//!     │
//!     ▼
//! run every due timer, in scheduling order
//!     │
//!     ▼
//! run every ready file callback, in readiness order
//! ```
//!
//! Before each callback runs, the loop checks the event is still registered,
//! so a callback may cancel or deregister any event, itself included, and
//! that takes effect immediately.
//!
//! mio readiness is edge-triggered: a callback must consume its descriptor
//! until `WouldBlock` or it may not be woken again.

mod reactor;
mod timer;

pub use reactor::{EventLoop, FileCallback, Mask, IDLE_WAIT, MIN_WAIT};
pub use timer::{TimerCallback, TimerId, TimerKind};
