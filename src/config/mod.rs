mod manager;
mod store;

pub use manager::*;
pub use store::*;
