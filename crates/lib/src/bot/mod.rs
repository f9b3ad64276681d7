//! Bot core: command parsing, render jobs, reply delivery and event routing.
//!
//! All dependencies are bundled in a `BotContext` and passed explicitly; every render job runs
//! as its own task so a slow render never holds up other messages.

mod command;
mod context;
mod dispatch;
mod router;
mod runtime;
mod scheduler;

pub use command::{parse_command, Command};
pub use context::BotContext;
pub use dispatch::{Reply, ResponseDispatcher};
pub use router::route_event;
pub use runtime::run_bot;
pub use scheduler::{handle_message, JobOutcome, JobStatus, RenderJob, RenderRequest, SYSTEM_FAULT_NOTICE};
