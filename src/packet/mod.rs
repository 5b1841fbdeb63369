pub mod capture;
pub mod classify;

use std::net::IpAddr;

/// A classified packet: everything downstream components need, nothing
/// they don't. Ephemeral — never retained once folded into a `FlowRecord`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub header_len: u32,
    pub payload_len: u32,
    pub tcp_flags: TcpFlags,
    /// TCP window field, meaningful only when `protocol == 6`.
    pub tcp_window: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub cwe: bool,
    pub ece: bool,
}

pub use classify::classify_frame;
