mod registry;
mod selectors;

pub use registry::{ModelFamily, ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
