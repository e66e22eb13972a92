//! Wake-on-LAN trigger
//!
//! One-shot magic packet to the target's hardware address. Strictly
//! fire-and-forget: the packet is broadcast on the local segment and no
//! confirmation exists, so send failures are logged and swallowed.

use tracing::{debug, warn};

use crate::config::MacAddress;

/// Broadcast a magic packet for `mac`, best-effort
pub fn send_wake_signal(mac: MacAddress) {
    let octets = mac.octets();
    let packet = wake_on_lan::MagicPacket::new(&octets);
    match packet.send() {
        Ok(()) => debug!(%mac, "Magic packet sent"),
        Err(e) => warn!(%mac, "Failed to send magic packet: {}", e),
    }
}
