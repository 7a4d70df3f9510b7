//! Advertisable Interface Addresses
//!
//! An issuer advertises only addresses a claimant on the same LAN can reach:
//! interfaces that are down, loopback, and virtual (container, hypervisor,
//! bridge) interfaces are left out. A downed interface on Linux keeps its
//! address, so link state is checked explicitly.

use if_addrs::{IfAddr, Interface};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Name prefixes of virtual interfaces.
const VIRTUAL_PREFIXES: &[&str] = &["docker", "vir", "veth", "br", "vmn"];

pub fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// The IPv4 address of `iface`, if it is one worth advertising.
fn advertisable_ipv4(iface: &Interface) -> Option<Ipv4Addr> {
    if !iface.is_oper_up() || iface.is_loopback() || is_virtual_interface(&iface.name) {
        return None;
    }
    match &iface.addr {
        IfAddr::V4(v4) => Some(v4.ip),
        IfAddr::V6(_) => None,
    }
}

/// IPv4 addresses on physical, non-loopback interfaces that are up.
pub fn physical_ipv4_addrs() -> Vec<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    interfaces
        .iter()
        .filter_map(|iface| {
            let addr = advertisable_ipv4(iface)?;
            debug!(interface = %iface.name, addr = %addr, "Advertisable address");
            Some(addr)
        })
        .collect()
}

/// Whether a resolved address is usable as a join target.
pub fn is_joinable(addr: &Ipv4Addr) -> bool {
    !addr.is_loopback() && !addr.is_unspecified() && !addr.is_broadcast()
}
