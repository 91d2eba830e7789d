//! Best-effort MAC lookup from the kernel ARP cache.

use std::collections::HashMap;
use std::net::IpAddr;

const ARP_TABLE: &str = "/proc/net/arp";

/// Parse `/proc/net/arp` contents into ip -> lowercase MAC.
///
/// Incomplete entries (all-zero hardware address) are skipped.
pub fn parse_arp_table(text: &str) -> HashMap<IpAddr, String> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let ip = cols.next()?.parse().ok()?;
            let mac = cols.nth(2)?.to_ascii_lowercase();
            (mac.len() == 17 && mac != "00:00:00:00:00:00").then_some((ip, mac))
        })
        .collect()
}

/// `None` off Linux or when the host has no cache entry.
pub async fn lookup_mac(ip: IpAddr) -> Option<String> {
    let text = tokio::fs::read_to_string(ARP_TABLE).await.ok()?;
    parse_arp_table(&text).remove(&ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         A4:91:B1:0C:22:10     *        eth0
192.168.1.64     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.201    0x1         0x2         00:17:61:10:aa:05     *        eth0
";

    #[test]
    fn parses_complete_entries() {
        let table = parse_arp_table(SAMPLE);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table[&"192.168.1.1".parse::<IpAddr>().unwrap()],
            "a4:91:b1:0c:22:10"
        );
        assert!(!table.contains_key(&"192.168.1.64".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn garbage_is_ignored() {
        assert!(parse_arp_table("header\nnot an entry\n\n").is_empty());
    }
}
