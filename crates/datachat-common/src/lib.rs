pub mod errors;
pub mod id;

pub use errors::{EngineError, ProviderError, RegistryError, ToolError};
pub use id::new_id;

pub type Result<T> = std::result::Result<T, EngineError>;
