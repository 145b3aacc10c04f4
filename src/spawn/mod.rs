//! Identity resolution and OS process spawning.

mod identity;
mod launcher;

pub use identity::{Identity, IdentityResolver, SystemIdentity};
pub(crate) use launcher::{LaunchPlan, Launched, Launcher, pick_free_port};
