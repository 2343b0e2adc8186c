//! Command implementations for the blubber CLI.

mod compile;

pub use compile::compile;
