// storyverse-engine library entry point.

pub mod backend;
pub mod config;
pub mod engine;
pub mod reconcile;
pub mod runtime;
pub mod security;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use engine::{PersistenceEngine, SaveStatus};
pub use reconcile::{AppState, Reconciler};
