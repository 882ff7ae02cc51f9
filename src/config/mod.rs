//! Configuration module for fill patch settings.

mod patch_config;

pub use patch_config::{
    bundled_weights_path, FillGroup, FillSelection, PatchConfig, FILL_WEIGHTS_FILE,
};
