pub mod config;
pub mod context;
pub mod error;
pub mod family;

pub use config::{ServiceProfile, SwitchboardConfig};
pub use context::{ConversionContext, RuntimeMetadata};
pub use error::{ErrorBody, Result, SwitchboardError};
pub use family::{Protocol, ProviderFamily, UaMode};
