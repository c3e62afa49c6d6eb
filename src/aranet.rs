mod cache;
mod device;
mod poller;
pub(crate) mod reader;
mod reading;
mod sensor;

pub use cache::*;
pub use device::*;
pub use poller::*;
pub use reader::{DeviceReader, FetchError, FetchPhase, Handle, Transport};
pub use reading::*;
pub use sensor::*;
