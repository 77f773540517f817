//! MAC address lookup from the ARP cache

use std::net::IpAddr;

const ARP_TABLE: &str = "/proc/net/arp";

/// MAC address of a neighbour as upper-case hex without separators.
///
/// Reads the kernel ARP cache; returns `None` when the entry is missing or
/// incomplete, or when the platform has no readable ARP table.
pub async fn lookup_mac(address: IpAddr) -> Option<String> {
    let table = tokio::fs::read_to_string(ARP_TABLE).await.ok()?;
    find_in_table(&table, address)
}

/// Find `address` in the text of `/proc/net/arp`
pub fn find_in_table(table: &str, address: IpAddr) -> Option<String> {
    let wanted = address.to_string();

    table.lines().skip(1).find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [ip, _hw_type, flags, mac, ..] if *ip == wanted && *flags != "0x0" => normalize_mac(mac),
            _ => None,
        }
    })
}

fn normalize_mac(mac: &str) -> Option<String> {
    let bytes = hex::decode(mac.replace([':', '-'], "")).ok()?;
    if bytes.len() != 6 || bytes.iter().all(|b| *b == 0) {
        return None;
    }
    Some(hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
10.0.0.5         0x1         0x2         00:1b:21:3a:4f:9c     *        eth0
10.0.0.6         0x1         0x0         00:00:00:00:00:00     *        eth0
";

    #[test]
    fn test_find_complete_entry() {
        assert_eq!(
            find_in_table(TABLE, "10.0.0.5".parse().unwrap()),
            Some("001B213A4F9C".to_string())
        );
    }

    #[test]
    fn test_incomplete_or_missing_entry() {
        assert_eq!(find_in_table(TABLE, "10.0.0.6".parse().unwrap()), None);
        assert_eq!(find_in_table(TABLE, "10.0.0.7".parse().unwrap()), None);
    }
}
