pub mod net;
pub mod system_info;

pub use system_info::SystemInfo;
