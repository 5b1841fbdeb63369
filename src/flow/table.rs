use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::packet::Packet;

use super::key::FlowKey;
use super::record::FlowRecord;

/// One worker's exclusive view of in-progress flows (spec: shared-nothing —
/// each capture-file worker owns a table nobody else touches).
pub struct FlowTable {
    flows: HashMap<FlowKey, FlowRecord>,
    timeout: chrono::Duration,
}

impl FlowTable {
    pub fn new(timeout: StdDuration) -> Self {
        FlowTable {
            flows: HashMap::new(),
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(120)),
        }
    }

    /// Folds one packet into the table: starts a new flow on first sight of
    /// a key, otherwise appends to the existing flow and clears its
    /// `active_hint` demotion.
    pub fn upsert(&mut self, packet: &Packet) {
        let key = FlowKey::canonicalize(
            packet.src_ip,
            packet.src_port,
            packet.dst_ip,
            packet.dst_port,
            packet.protocol,
        );

        match self.flows.get_mut(&key) {
            Some(flow) => flow.push(packet),
            None => {
                self.flows.insert(key, FlowRecord::start(packet));
            }
        }
    }

    /// Evicts flows that are still `active_hint` and idle past `timeout`,
    /// and demotes `active_hint` to false for flows idle past `timeout / 2`.
    /// A flow already demoted is left alone until `drain()` even if it goes
    /// on idling past `timeout` — `active_hint` only flips back to true when
    /// another packet arrives for it (`FlowRecord::push`), so a demoted flow
    /// that never sees another packet survives to EOF as one continuous
    /// record instead of being split by a later sweep pass.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<FlowRecord> {
        let half = self.timeout / 2;
        let mut evicted = Vec::new();
        let mut evict_keys = Vec::new();

        for (key, flow) in self.flows.iter_mut() {
            let idle = flow.idle_for(now);
            if flow.active_hint && idle >= self.timeout {
                evict_keys.push(key.clone());
            } else if flow.active_hint && idle >= half {
                flow.active_hint = false;
            }
        }

        for key in evict_keys {
            if let Some(flow) = self.flows.remove(&key) {
                evicted.push(flow);
            }
        }

        evicted
    }

    /// Drains every remaining flow unconditionally (end of capture file:
    /// nothing more will arrive, so idle timeout no longer applies).
    pub fn drain(&mut self) -> Vec<FlowRecord> {
        self.flows.drain().map(|(_, flow)| flow).collect()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpFlags;
    use chrono::Duration;

    fn pkt_at(ts: DateTime<Utc>) -> Packet {
        Packet {
            timestamp: ts,
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: 1111,
            dst_port: 80,
            protocol: 6,
            header_len: 40,
            payload_len: 0,
            tcp_window: 0,
            tcp_flags: TcpFlags::default(),
        }
    }

    #[test]
    fn sweep_evicts_past_timeout_when_still_active() {
        let mut table = FlowTable::new(StdDuration::from_secs(100));
        let t0 = Utc::now();
        table.upsert(&pkt_at(t0));
        assert_eq!(table.len(), 1);

        // Idle past timeout in one jump, without an intervening demotion
        // sweep: active_hint is still true, so it's evicted immediately.
        let evicted = table.sweep(t0 + Duration::seconds(150));
        assert_eq!(evicted.len(), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn sweep_demotes_past_half_but_does_not_evict_once_demoted() {
        let mut table = FlowTable::new(StdDuration::from_secs(100));
        let t0 = Utc::now();
        table.upsert(&pkt_at(t0));

        let evicted = table.sweep(t0 + Duration::seconds(60));
        assert!(evicted.is_empty());
        assert_eq!(table.len(), 1);

        // Demoted (active_hint false) on the previous sweep: a later sweep,
        // however idle, must not evict it — only drain() at EOF will.
        let evicted = table.sweep(t0 + Duration::seconds(500));
        assert!(evicted.is_empty());
        assert_eq!(table.len(), 1);

        let drained = table.drain();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn drain_returns_everything_regardless_of_age() {
        let mut table = FlowTable::new(StdDuration::from_secs(100));
        table.upsert(&pkt_at(Utc::now()));
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(table.len(), 0);
    }
}
