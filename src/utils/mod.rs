//! Utility modules for devices, memory accounting and logging.

mod device;
mod logging;
mod memory;

pub use device::{dtype_name, get_device, parse_device};
pub use logging::init_tracing;
pub use memory::{format_bytes, tensor_bytes};
