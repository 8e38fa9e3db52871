//! Schema module - Variables, animation requests and run configuration.

mod config;
mod request;
mod variable;

pub use config::*;
pub use request::*;
pub use variable::*;
