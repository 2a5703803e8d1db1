pub mod bindings;
pub mod config;
pub mod error;
pub mod local;
pub mod processing;
pub mod utils;

pub use error::{Error, Result};

#[cfg(feature = "python")]
pub use bindings::python::tracking_node;
