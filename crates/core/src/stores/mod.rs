pub mod disk;
pub mod flat;

pub use disk::{IndexManifest, METADATA_FILE, VECTORS_FILE};
pub use flat::{FlatIndex, Metric};
