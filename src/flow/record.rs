use chrono::{DateTime, Utc};
use std::net::IpAddr;

use crate::packet::Packet;

/// One sample folded into a flow: direction-tagged, stripped down to what
/// the feature computer needs so a long-lived flow doesn't retain whole
/// packets.
#[derive(Debug, Clone)]
pub struct PacketSample {
    pub timestamp: DateTime<Utc>,
    pub forward: bool,
    pub header_len: u32,
    pub payload_len: u32,
    pub tcp_flags: crate::packet::TcpFlags,
}

/// The live, mutable state of one flow while its packets are still arriving.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub initiator_ip: IpAddr,
    pub initiator_port: u16,
    pub responder_ip: IpAddr,
    pub responder_port: u16,
    pub protocol: u8,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    pub packets: Vec<PacketSample>,

    /// TCP initial window size captured off the initiator's SYN, if seen.
    pub fwd_init_win_bytes: Option<u16>,
    /// TCP initial window size captured off the responder's SYN+ACK, if seen.
    pub bwd_init_win_bytes: Option<u16>,

    /// Demoted to eviction priority once idle past half the flow timeout;
    /// cleared whenever a new packet arrives. Lets the sweep skip flows
    /// that are merely quiet without walking their full packet list twice.
    pub active_hint: bool,
}

impl FlowRecord {
    /// Starts a new flow from its first observed packet. The packet that
    /// creates the record defines the initiator side, regardless of how the
    /// flow key's IP/port pairs happened to sort.
    pub fn start(packet: &Packet) -> Self {
        let mut record = FlowRecord {
            initiator_ip: packet.src_ip,
            initiator_port: packet.src_port,
            responder_ip: packet.dst_ip,
            responder_port: packet.dst_port,
            protocol: packet.protocol,
            first_seen: packet.timestamp,
            last_seen: packet.timestamp,
            packets: Vec::new(),
            fwd_init_win_bytes: None,
            bwd_init_win_bytes: None,
            active_hint: true,
        };
        record.push(packet);
        record
    }

    /// Folds one more packet into this flow, updating timestamps, the
    /// init-window capture, and the active hint.
    pub fn push(&mut self, packet: &Packet) {
        let forward = packet.src_ip == self.initiator_ip && packet.src_port == self.initiator_port;

        if packet.protocol == crate::packet::classify::PROTO_TCP && packet.tcp_flags.syn {
            if forward && self.fwd_init_win_bytes.is_none() {
                self.fwd_init_win_bytes = Some(packet.tcp_window);
            } else if !forward && self.bwd_init_win_bytes.is_none() {
                self.bwd_init_win_bytes = Some(packet.tcp_window);
            }
        }

        if packet.timestamp > self.last_seen {
            self.last_seen = packet.timestamp;
        }

        self.packets.push(PacketSample {
            timestamp: packet.timestamp,
            forward,
            header_len: packet.header_len,
            payload_len: packet.payload_len,
            tcp_flags: packet.tcp_flags,
        });
        self.active_hint = true;
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpFlags;

    fn pkt(src: &str, sport: u16, dst: &str, dport: u16) -> Packet {
        Packet {
            timestamp: Utc::now(),
            src_ip: src.parse().unwrap(),
            dst_ip: dst.parse().unwrap(),
            src_port: sport,
            dst_port: dport,
            protocol: 6,
            header_len: 40,
            payload_len: 0,
            tcp_window: 0,
            tcp_flags: TcpFlags::default(),
        }
    }

    #[test]
    fn initiator_is_the_first_packets_source() {
        let p = pkt("10.0.0.1", 1234, "10.0.0.2", 80);
        let flow = FlowRecord::start(&p);
        assert_eq!(flow.initiator_ip, p.src_ip);
        assert_eq!(flow.initiator_port, 1234);
    }

    #[test]
    fn reverse_packet_is_classified_backward() {
        let p1 = pkt("10.0.0.1", 1234, "10.0.0.2", 80);
        let mut flow = FlowRecord::start(&p1);
        let p2 = pkt("10.0.0.2", 80, "10.0.0.1", 1234);
        flow.push(&p2);
        assert!(!flow.packets[1].forward);
    }
}
