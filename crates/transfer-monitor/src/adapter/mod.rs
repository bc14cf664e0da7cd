pub mod cursor;
pub mod engine;
pub mod memory;
#[cfg(feature = "rpc")]
pub mod rpc;
pub mod source;
