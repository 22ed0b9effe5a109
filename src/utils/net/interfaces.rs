use local_ip_address::{list_afinet_netifas, local_ip};
use log::debug;
use std::net::{IpAddr, Ipv4Addr};

/// IPv4 address other devices on the LAN reach this one at.
///
/// Prefers the address of the default route, then any non-loopback one.
pub fn device_ip() -> Option<Ipv4Addr> {
    match local_ip() {
        Ok(IpAddr::V4(ip)) => return Some(ip),
        Ok(other) => debug!("Primary address {} is not IPv4", other),
        Err(e) => debug!("No primary address: {}", e),
    }

    list_afinet_netifas()
        .ok()?
        .into_iter()
        .find_map(|(_, ip)| match ip {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        })
}

/// Name of the interface holding `ip`, e.g. `wlan0`.
pub fn interface_name(ip: Ipv4Addr) -> Option<String> {
    list_afinet_netifas()
        .ok()?
        .into_iter()
        .find(|(_, addr)| *addr == IpAddr::V4(ip))
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ip_is_routable() {
        // hosts without a network legitimately report nothing
        if let Some(ip) = device_ip() {
            assert!(!ip.is_loopback());
            assert!(!ip.is_unspecified());
        }
    }

    #[test]
    fn test_unknown_address_has_no_interface() {
        assert_eq!(interface_name(Ipv4Addr::new(203, 0, 113, 77)), None);
    }
}
