use std::net::{IpAddr, Ipv4Addr};

const INGEST_PORT: &str = "INGEST_PORT";

const DEFAULT_PORT: u16 = 7070;

/// Ingest port when the config file does not set one; the environment
/// can override the built-in default
pub fn get_default_ingest_port() -> u16 {
    let port_from_env = std::env::var(INGEST_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const INGEST_ADDR: &str = "INGEST_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Ingest bind address when the config file does not set one
pub fn get_default_ingest_addr() -> IpAddr {
    let addr_from_env = std::env::var(INGEST_ADDR);
    IpAddr::V4(addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR)))
}
