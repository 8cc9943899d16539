mod fs;
mod jsdelivr;
mod paths;

pub use fs::*;
pub use jsdelivr::*;
pub use paths::*;
