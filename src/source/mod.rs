//! Sources: per-stream state, the source registry and shape resolution.

mod info;
mod registry;
mod shaper;

pub use info::{SourceInfo, SourceLock, SourceShape};
pub use registry::SourceRegistry;
pub use shaper::{DefaultSourceShaper, SourceShaper, TableSourceShaper};
