mod client;
mod protocol;

pub use client::*;
pub use protocol::*;
