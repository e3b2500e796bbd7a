//! Built-in operation commands.

pub mod prune;

pub use prune::PruneOperationsCommand;
