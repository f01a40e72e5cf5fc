//! Core value types for the effect runtime.
//!
//! - [`id`]: Fiber identifiers and the runtime [`Time`] stamp
//! - [`cause`]: The [`Cause`] algebra describing failures
//! - [`exit`]: [`Exit`], the outcome of an effect or fiber
//! - [`flags`]: Per-fiber [`RuntimeFlags`] and their patches

pub mod cause;
pub mod exit;
pub mod flags;
pub mod id;

pub use cause::{Cause, Defect};
pub use exit::Exit;
pub use flags::{RuntimeFlags, RuntimeFlagsPatch};
pub use id::{FiberId, Time};
