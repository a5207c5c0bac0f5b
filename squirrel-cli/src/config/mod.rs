mod loader;
mod types;

pub use loader::ConfigLoader;
#[allow(unused_imports)]
pub use types::{PluginsConfig, SquirrelConfig};
