//! Target range expansion.
//!
//! Accepted forms, IPv4 only:
//!
//! - CIDR: `192.168.1.0/29` expands to every address in the block, network
//!   and broadcast addresses included
//! - dash range: `192.168.1.10-192.168.1.20`, or `192.168.1.10-20` for the
//!   last octet
//! - a single address

use std::net::Ipv4Addr;

use crate::error::{DiscoveryError, Result};

/// Expand `range` into host addresses, refusing more than `max_hosts`.
pub fn expand(range: &str, max_hosts: usize) -> Result<Vec<Ipv4Addr>> {
    let range = range.trim();
    if range.is_empty() {
        return Err(DiscoveryError::invalid_range(range, "empty"));
    }

    let (first, last) = if let Some((addr, prefix)) = range.split_once('/') {
        cidr_bounds(range, addr, prefix)?
    } else if let Some((start, end)) = range.split_once('-') {
        dash_bounds(range, start, end)?
    } else {
        let ip = parse_ip(range, range)?;
        (u32::from(ip), u32::from(ip))
    };

    let count = u64::from(last - first) + 1;
    if count > max_hosts as u64 {
        return Err(DiscoveryError::TooManyHosts {
            count,
            max: max_hosts,
        });
    }
    Ok((first..=last).map(Ipv4Addr::from).collect())
}

fn parse_ip(range: &str, text: &str) -> Result<Ipv4Addr> {
    text.trim()
        .parse()
        .map_err(|_| DiscoveryError::invalid_range(range, format!("bad address {:?}", text.trim())))
}

fn cidr_bounds(range: &str, addr: &str, prefix: &str) -> Result<(u32, u32)> {
    let base = u32::from(parse_ip(range, addr)?);
    let prefix: u32 = prefix
        .trim()
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| DiscoveryError::invalid_range(range, "prefix must be 0-32"))?;
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let first = base & mask;
    Ok((first, first | !mask))
}

fn dash_bounds(range: &str, start: &str, end: &str) -> Result<(u32, u32)> {
    let start = parse_ip(range, start)?;
    let end = match end.trim().parse::<u8>() {
        Ok(octet) => {
            let [a, b, c, _] = start.octets();
            Ipv4Addr::new(a, b, c, octet)
        }
        Err(_) => parse_ip(range, end)?,
    };
    let (first, last) = (u32::from(start), u32::from(end));
    if first > last {
        return Err(DiscoveryError::invalid_range(range, "start is after end"));
    }
    Ok((first, last))
}
