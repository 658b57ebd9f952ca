//! Tool-call execution core for an agent loop.
//!
//! A [`ToolRegistry`] resolves model-emitted calls into invocations, the
//! approval policy and [`ConfirmationBus`] gate side effects, and the
//! [`Scheduler`] drives each batch to completion, reporting results in
//! request order.

pub mod allowlist;
pub mod bus;
pub mod config;
pub mod confirmation;
pub mod editor;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod invocation;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod truncation;

pub use allowlist::*;
pub use bus::*;
pub use config::*;
pub use confirmation::*;
pub use editor::*;
pub use errors::*;
pub use events::*;
pub use handlers::*;
pub use invocation::*;
pub use policy::*;
pub use registry::*;
pub use scheduler::*;
pub use truncation::*;
