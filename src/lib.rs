//! Carmentis SDK
//!
//! Workspace root. The section encoding engine lives in `carmentis-core`,
//! re-exported here as [`engine`].

pub use carmentis_core as engine;

pub use carmentis_core::{
    EncodeOptions, EngineConfig, SectionDecoder, SectionDefinition, SectionEncoder, Value,
};

/// Returns the version of the package.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
