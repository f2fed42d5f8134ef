pub mod config;
pub mod cull;
pub mod error;
pub mod loader;
pub mod sampling;
pub mod session;
pub mod transform;
pub mod types;

pub use config::{LoaderConfig, LoaderMode, SessionConfig};
pub use cull::CullTree;
pub use error::{PagerError, Result};
pub use loader::QuadLoader;
pub use sampling::SamplingLayer;
pub use session::Session;
