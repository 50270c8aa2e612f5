//! Identity resolution and per-request authorization binding.
//! Keep the public surface thin and split implementation across sub-modules.

mod context;
mod gateway;
mod principal;

pub use context::AuthzContext;
pub use gateway::AuthGateway;
pub use principal::Principal;
