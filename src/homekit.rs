mod accessory;
mod bridge;
mod setup_code;

pub use accessory::*;
pub use bridge::*;
pub use setup_code::*;
