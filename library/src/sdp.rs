//! Extraction of a routable remote address from a session description.

use std::net::{IpAddr, SocketAddr};

/// First usable `host:port` in `sdp`.
///
/// Candidates are tried in the order they appear (`a=candidate:` lines,
/// both at session and media level). A candidate is usable when its address
/// is a literal IP that is not unspecified and its port is non-zero; mDNS
/// host names are skipped. Without a usable candidate the connection line
/// and the first media port are used, unless they are the `0.0.0.0` / port 9
/// placeholders engines write before gathering. Returns `None` otherwise.
#[must_use]
pub fn parse_remote_endpoint(sdp: &str) -> Option<SocketAddr> {
    let mut connection_address = None;
    let mut media_port = None;

    for line in sdp.lines().map(str::trim) {
        if let Some(candidate) = line.strip_prefix("a=candidate:") {
            if let Some(endpoint) = parse_candidate(candidate) {
                return Some(endpoint);
            }
        } else if let Some(connection) = line.strip_prefix("c=") {
            if connection_address.is_none() {
                connection_address = parse_connection(connection);
            }
        } else if let Some(media) = line.strip_prefix("m=") {
            if media_port.is_none() {
                media_port = media
                    .split_whitespace()
                    .nth(1)
                    .and_then(|port| port.split('/').next())
                    .and_then(|port| port.parse::<u16>().ok());
            }
        }
    }

    match (connection_address, media_port) {
        (Some(address), Some(port)) if port != 0 && port != DISCARD_PORT => {
            Some(SocketAddr::new(address, port))
        }
        _ => None,
    }
}

const DISCARD_PORT: u16 = 9;

/// `<foundation> <component> <transport> <priority> <address> <port> typ <type> ...`
fn parse_candidate(candidate: &str) -> Option<SocketAddr> {
    let mut fields = candidate.split_whitespace().skip(4);
    let address = usable_address(fields.next()?)?;
    let port = fields.next()?.parse::<u16>().ok().filter(|port| *port != 0)?;
    Some(SocketAddr::new(address, port))
}

/// `IN IP4 203.0.113.1` or `IN IP6 2001:db8::1`, optionally with `/ttl`.
fn parse_connection(connection: &str) -> Option<IpAddr> {
    let address = connection.split_whitespace().nth(2)?;
    usable_address(address.split('/').next()?)
}

fn usable_address(text: &str) -> Option<IpAddr> {
    text.parse::<IpAddr>()
        .ok()
        .filter(|address| !address.is_unspecified())
}
