//! Device information shown next to the mirroring controls.

use serde::Serialize;
use sysinfo::System;

use crate::capture::DisplayInfo;
use crate::utils::net::{device_ip, interface_name};

pub const NO_IP: &str = "No IP";
pub const NOT_CONNECTED: &str = "Not connected";

/// Snapshot computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub device_ip: String,
    pub wifi_network: String,
    pub screen_resolution: String,
    pub os_version: String,
}

impl SystemInfo {
    pub fn collect(display: &dyn DisplayInfo) -> Self {
        let ip = device_ip();
        let (width, height) = display.resolution();

        SystemInfo {
            device_ip: ip.map_or_else(|| NO_IP.to_string(), |ip| ip.to_string()),
            wifi_network: ip
                .and_then(interface_name)
                .unwrap_or_else(|| NOT_CONNECTED.to_string()),
            screen_resolution: format!("{}x{}", width, height),
            os_version: os_version(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.device_ip != NO_IP
    }
}

impl std::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Device IP:         {}", self.device_ip)?;
        writeln!(f, "Network:           {}", self.wifi_network)?;
        writeln!(f, "Screen resolution: {}", self.screen_resolution)?;
        write!(f, "OS version:        {}", self.os_version)
    }
}

fn os_version() -> String {
    let name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    match System::kernel_version() {
        Some(kernel) => format!("{} (kernel {})", name, kernel),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::GenericDisplay;

    #[test]
    fn test_collect_reports_display_and_fallbacks() {
        let display = GenericDisplay::new("Test", 1280, 720, 60);
        let info = SystemInfo::collect(&display);

        assert_eq!(info.screen_resolution, "1280x720");
        assert!(!info.os_version.is_empty());
        if !info.is_connected() {
            assert_eq!(info.device_ip, NO_IP);
            assert_eq!(info.wifi_network, NOT_CONNECTED);
        }
    }
}
