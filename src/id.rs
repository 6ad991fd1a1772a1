//! Correlation-id minting: a short hex id derived from a random value
//! combined with the peer's address and port, so concurrent peers rarely
//! collide in logs.

use std::net::SocketAddr;

/// Mint a 3-hex-digit correlation id for a peer at `addr`: a random value
/// combined with the peer's port and address octets, formatted as
/// zero-padded uppercase hex.
pub fn mint(addr: &SocketAddr) -> String {
    let port = addr.port() as u64;
    let octet_sum: u64 = match addr.ip() {
        std::net::IpAddr::V4(v4) => v4.octets().iter().map(|&b| b as u64).sum(),
        std::net::IpAddr::V6(v6) => v6.octets().iter().map(|&b| b as u64).sum(),
    };
    let random = uuid::Uuid::new_v4().as_u128() as u64;
    let n = (random.wrapping_add(port).wrapping_add(octet_sum)) % 0x1000;
    format!("{:03X}", n)
}

/// Mint a correlation id for an outbound request, regenerating on collision
/// against `taken` so ids stay unique within a single peer.
pub fn mint_unique<F>(addr: &SocketAddr, mut taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    loop {
        let candidate = mint(addr);
        if !taken(&candidate) {
            return candidate;
        }
    }
}
