//! Duplicate call suppression.
//!
//! A [`Group`] makes sure that, for any key, at most one execution of a
//! worker is in flight at a time. Callers that ask for the same key while it
//! runs wait for it and receive a copy of its outcome instead of running the
//! worker themselves. Nothing is cached: once the call completes, the next
//! caller for the key executes again.
//!
//! Every caller sharing a call ends the same way the executing caller does:
//!
//! - a returned value or error is cloned to each caller,
//! - a panic is re-raised in each caller with a [`PanicError`] wrapping the
//!   original payload,
//! - a forced exit ([`exit`], or dropping the executing future of
//!   [`Group::work_async`]) unwinds each caller with a [`ForcedExit`] payload.
//!
//! Waiting callers can stop waiting through their own [`Context`] without
//! affecting the call in flight.
//!
//! ```rust
//! use singleflight::{Context, Group};
//!
//! let group: Group<&str, u64, String> = Group::new();
//! let outcome = group.work(&Context::new(), "answer", 41, |_ctx, n| Ok(n + 1));
//! assert_eq!(outcome.result, Ok(42));
//! assert!(!outcome.shared);
//! ```
//!
//! The async flavor takes a worker returning a future:
//!
//! ```rust
//! # #[tokio::main]
//! # async fn main() {
//! use singleflight::{Context, Group};
//!
//! async fn load(id: u32) -> Result<String, String> {
//!     Ok(format!("user-{id}"))
//! }
//!
//! let group: Group<u32, String, String> = Group::new();
//! let outcome = group
//!     .work_async(&Context::new(), 7, 7, |_ctx, id| load(id))
//!     .await;
//! assert_eq!(outcome.result.as_deref(), Ok("user-7"));
//! # }
//! ```

mod context;
mod error;
mod group;
mod options;
mod pool;
mod record;
mod signal;
mod termination;

pub use crate::context::Context;
pub use crate::error::{ContextError, Error};
pub use crate::group::{Group, Outcome};
pub use crate::options::{OnWait, Options};
pub use crate::termination::{exit, ForcedExit, PanicError};
