pub mod config;
pub mod errors;
pub mod steps;

pub use config::*;
pub use errors::*;
pub use steps::*;
