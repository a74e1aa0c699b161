mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_EDIT, CAPABILITY_GENERATE, CAPABILITY_VISION,
    GPT_IMAGE_1_VERSION,
};
pub use selectors::{ModelSelection, ModelSelector};
