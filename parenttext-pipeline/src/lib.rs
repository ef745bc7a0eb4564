pub mod cli;
pub mod collaborators;

pub use cli::{run, Cli, Commands, Operation};
