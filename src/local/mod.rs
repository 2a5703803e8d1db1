pub mod host;
pub mod monitor;
pub mod sender;
