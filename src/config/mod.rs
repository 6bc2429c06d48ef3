//! Configuration: YAML tree parsing, builtin flows/templates, validation,
//! and the immutable snapshot the rest of the server runs against.

pub mod builtin;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load, ConfigSnapshot};
pub use model::ServerConfig;
