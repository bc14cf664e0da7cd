pub mod decode;
pub mod registry;
pub mod types;
