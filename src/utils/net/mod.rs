mod interfaces;
pub mod wire;

pub use interfaces::{device_ip, interface_name};
pub use wire::StreamHeader;
