use std::net::IpAddr;

/// Canonical, direction-agnostic identity of a flow. The IP pair and the
/// port pair are each sorted independently (not the combined `(ip, port)`
/// tuple as a unit), so `(ip_a, ip_b, port_a, port_b)` and
/// `(ip_b, ip_a, port_b, port_a)` — the two directions of the same
/// conversation — always canonicalize to the same key even when the lower
/// IP and the lower port land on opposite endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub ip_a: IpAddr,
    pub ip_b: IpAddr,
    pub port_a: u16,
    pub port_b: u16,
    pub protocol: u8,
}

impl FlowKey {
    /// Builds the canonical key from one observed packet's endpoints. Flow
    /// direction (who's the initiator) is tracked separately by whichever
    /// packet is first seen for this key, not by this sort.
    pub fn canonicalize(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16, protocol: u8) -> FlowKey {
        let (ip_a, ip_b) = if src_ip <= dst_ip { (src_ip, dst_ip) } else { (dst_ip, src_ip) };
        let (port_a, port_b) = if src_port <= dst_port { (src_port, dst_port) } else { (dst_port, src_port) };
        FlowKey { ip_a, ip_b, port_a, port_b, protocol }
    }

    /// Underscore-joined textual form, matching the original tool's CSV
    /// `flow_key` column so existing tooling built against it keeps working.
    pub fn to_csv_field(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.ip_a, self.ip_b, self.port_a, self.port_b, self.protocol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_direction_agnostic() {
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let fwd = FlowKey::canonicalize(a, 1000, b, 80, 6);
        let bwd = FlowKey::canonicalize(b, 80, a, 1000, 6);
        assert_eq!(fwd, bwd);
    }

    #[test]
    fn ip_pair_and_port_pair_sort_independently() {
        // src has the higher IP but the lower port: the two pairs must
        // still sort on their own axis, not as a combined (ip, port) unit.
        let lo_ip: IpAddr = "10.0.0.1".parse().unwrap();
        let hi_ip: IpAddr = "10.0.0.2".parse().unwrap();
        let key = FlowKey::canonicalize(hi_ip, 9000, lo_ip, 80, 6);
        assert_eq!(key.ip_a, lo_ip);
        assert_eq!(key.ip_b, hi_ip);
        assert_eq!(key.port_a, 80);
        assert_eq!(key.port_b, 9000);
    }
}
