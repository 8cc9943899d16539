mod config;
mod endpoint;
mod geo;
mod status;

pub use config::*;
pub use endpoint::*;
pub use geo::*;
pub use status::*;
