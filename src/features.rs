use serde::{Deserialize, Serialize};

use crate::flow::FlowKey;
use crate::flow::FlowRecord;
use crate::stats::{sanitize, summarize};

/// Fixed-schema output of the feature computer (C4). Field order is the
/// CSV column order; `serde`/`csv` serialize struct fields in declaration
/// order, so this list IS the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub flow_key: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,

    pub flow_start_ts: f64,
    pub flow_last_ts: f64,
    pub flow_duration: f64,

    pub fwd_pkts_tot: u64,
    pub bwd_pkts_tot: u64,
    pub tot_pkts: u64,

    pub fwd_bytes_tot: u64,
    pub bwd_bytes_tot: u64,
    pub tot_bytes: u64,

    pub fwd_pkt_len_min: f64,
    pub fwd_pkt_len_max: f64,
    pub fwd_pkt_len_mean: f64,
    pub fwd_pkt_len_std: f64,

    pub bwd_pkt_len_min: f64,
    pub bwd_pkt_len_max: f64,
    pub bwd_pkt_len_mean: f64,
    pub bwd_pkt_len_std: f64,

    pub flow_pkt_len_min: f64,
    pub flow_pkt_len_max: f64,
    pub flow_pkt_len_mean: f64,
    pub flow_pkt_len_std: f64,

    pub avg_pkt_size: f64,

    pub fwd_iat_min: f64,
    pub fwd_iat_max: f64,
    pub fwd_iat_mean: f64,
    pub fwd_iat_std: f64,

    pub bwd_iat_min: f64,
    pub bwd_iat_max: f64,
    pub bwd_iat_mean: f64,
    pub bwd_iat_std: f64,

    pub flow_iat_min: f64,
    pub flow_iat_max: f64,
    pub flow_iat_mean: f64,
    pub flow_iat_std: f64,

    pub fwd_header_len: u64,
    pub bwd_header_len: u64,

    pub fwd_seg_size_avg: f64,
    pub bwd_seg_size_avg: f64,

    pub pkts_per_sec: f64,
    pub bytes_per_sec: f64,

    pub fwd_psh_flags: u32,
    pub bwd_psh_flags: u32,
    pub fwd_urg_flags: u32,
    pub bwd_urg_flags: u32,

    pub syn_flag_cnt: u32,
    pub fin_flag_cnt: u32,
    pub rst_flag_cnt: u32,
    pub ack_flag_cnt: u32,
    pub psh_flag_cnt: u32,
    pub urg_flag_cnt: u32,

    pub down_up_ratio: f64,

    /// -1 sentinel when no SYN was observed in that direction.
    pub init_win_bytes_fwd: i64,
    pub init_win_bytes_bwd: i64,
}

impl FeatureRecord {
    /// Column order for both the Feature CSV and the Scored CSV's leading
    /// columns — this list IS the schema (spec §3/§6).
    pub fn csv_header() -> Vec<&'static str> {
        vec![
            "flow_key", "src_ip", "dst_ip", "src_port", "dst_port", "protocol",
            "flow_start_ts", "flow_last_ts", "flow_duration",
            "fwd_pkts_tot", "bwd_pkts_tot", "tot_pkts",
            "fwd_bytes_tot", "bwd_bytes_tot", "tot_bytes",
            "fwd_pkt_len_min", "fwd_pkt_len_max", "fwd_pkt_len_mean", "fwd_pkt_len_std",
            "bwd_pkt_len_min", "bwd_pkt_len_max", "bwd_pkt_len_mean", "bwd_pkt_len_std",
            "flow_pkt_len_min", "flow_pkt_len_max", "flow_pkt_len_mean", "flow_pkt_len_std",
            "avg_pkt_size",
            "fwd_iat_min", "fwd_iat_max", "fwd_iat_mean", "fwd_iat_std",
            "bwd_iat_min", "bwd_iat_max", "bwd_iat_mean", "bwd_iat_std",
            "flow_iat_min", "flow_iat_max", "flow_iat_mean", "flow_iat_std",
            "fwd_header_len", "bwd_header_len",
            "fwd_seg_size_avg", "bwd_seg_size_avg",
            "pkts_per_sec", "bytes_per_sec",
            "fwd_psh_flags", "bwd_psh_flags", "fwd_urg_flags", "bwd_urg_flags",
            "syn_flag_cnt", "fin_flag_cnt", "rst_flag_cnt", "ack_flag_cnt",
            "psh_flag_cnt", "urg_flag_cnt",
            "down_up_ratio",
            "init_win_bytes_fwd", "init_win_bytes_bwd",
        ]
    }

    /// Stringifies every field in `csv_header` order for direct use with
    /// `csv::Writer::write_record`.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.flow_key.clone(), self.src_ip.clone(), self.dst_ip.clone(),
            self.src_port.to_string(), self.dst_port.to_string(), self.protocol.to_string(),
            self.flow_start_ts.to_string(), self.flow_last_ts.to_string(), self.flow_duration.to_string(),
            self.fwd_pkts_tot.to_string(), self.bwd_pkts_tot.to_string(), self.tot_pkts.to_string(),
            self.fwd_bytes_tot.to_string(), self.bwd_bytes_tot.to_string(), self.tot_bytes.to_string(),
            self.fwd_pkt_len_min.to_string(), self.fwd_pkt_len_max.to_string(), self.fwd_pkt_len_mean.to_string(), self.fwd_pkt_len_std.to_string(),
            self.bwd_pkt_len_min.to_string(), self.bwd_pkt_len_max.to_string(), self.bwd_pkt_len_mean.to_string(), self.bwd_pkt_len_std.to_string(),
            self.flow_pkt_len_min.to_string(), self.flow_pkt_len_max.to_string(), self.flow_pkt_len_mean.to_string(), self.flow_pkt_len_std.to_string(),
            self.avg_pkt_size.to_string(),
            self.fwd_iat_min.to_string(), self.fwd_iat_max.to_string(), self.fwd_iat_mean.to_string(), self.fwd_iat_std.to_string(),
            self.bwd_iat_min.to_string(), self.bwd_iat_max.to_string(), self.bwd_iat_mean.to_string(), self.bwd_iat_std.to_string(),
            self.flow_iat_min.to_string(), self.flow_iat_max.to_string(), self.flow_iat_mean.to_string(), self.flow_iat_std.to_string(),
            self.fwd_header_len.to_string(), self.bwd_header_len.to_string(),
            self.fwd_seg_size_avg.to_string(), self.bwd_seg_size_avg.to_string(),
            self.pkts_per_sec.to_string(), self.bytes_per_sec.to_string(),
            self.fwd_psh_flags.to_string(), self.bwd_psh_flags.to_string(), self.fwd_urg_flags.to_string(), self.bwd_urg_flags.to_string(),
            self.syn_flag_cnt.to_string(), self.fin_flag_cnt.to_string(), self.rst_flag_cnt.to_string(), self.ack_flag_cnt.to_string(),
            self.psh_flag_cnt.to_string(), self.urg_flag_cnt.to_string(),
            self.down_up_ratio.to_string(),
            self.init_win_bytes_fwd.to_string(), self.init_win_bytes_bwd.to_string(),
        ]
    }
}

/// Pure function: a completed flow becomes one feature row. No I/O, no
/// shared state — safe to call from any worker thread.
pub fn compute(key: &FlowKey, flow: &FlowRecord) -> Option<FeatureRecord> {
    if flow.packets.is_empty() {
        return None;
    }

    let start_ts = flow.first_seen.timestamp_micros() as f64 / 1_000_000.0;
    let last_ts = flow.last_seen.timestamp_micros() as f64 / 1_000_000.0;
    let duration = (last_ts - start_ts).max(1e-9);

    let fwd: Vec<_> = flow.packets.iter().filter(|p| p.forward).collect();
    let bwd: Vec<_> = flow.packets.iter().filter(|p| !p.forward).collect();

    let fwd_lengths: Vec<f64> = fwd.iter().map(|p| p.payload_len as f64 + p.header_len as f64).collect();
    let bwd_lengths: Vec<f64> = bwd.iter().map(|p| p.payload_len as f64 + p.header_len as f64).collect();
    let all_lengths: Vec<f64> = flow.packets.iter().map(|p| p.payload_len as f64 + p.header_len as f64).collect();

    let fwd_bytes_tot: u64 = fwd_lengths.iter().sum::<f64>() as u64;
    let bwd_bytes_tot: u64 = bwd_lengths.iter().sum::<f64>() as u64;
    let tot_bytes = fwd_bytes_tot + bwd_bytes_tot;

    let fwd_header_len: u64 = fwd.iter().map(|p| p.header_len as u64).sum();
    let bwd_header_len: u64 = bwd.iter().map(|p| p.header_len as u64).sum();

    let fwd_payload_bytes = fwd_bytes_tot.saturating_sub(fwd_header_len);
    let bwd_payload_bytes = bwd_bytes_tot.saturating_sub(bwd_header_len);

    let fwd_iats = inter_arrival_times(&fwd);
    let bwd_iats = inter_arrival_times(&bwd);
    let flow_iats = inter_arrival_times_all(&flow.packets);

    let fwd_len_stats = summarize(&fwd_lengths);
    let bwd_len_stats = summarize(&bwd_lengths);
    let flow_len_stats = summarize(&all_lengths);

    let fwd_iat_stats = summarize(&fwd_iats);
    let bwd_iat_stats = summarize(&bwd_iats);
    let flow_iat_stats = summarize(&flow_iats);

    let mut syn = 0u32;
    let mut fin = 0u32;
    let mut rst = 0u32;
    let mut ack = 0u32;
    let mut psh = 0u32;
    let mut urg = 0u32;
    let mut fwd_psh = 0u32;
    let mut bwd_psh = 0u32;
    let mut fwd_urg = 0u32;
    let mut bwd_urg = 0u32;

    for p in &flow.packets {
        if p.tcp_flags.syn { syn += 1; }
        if p.tcp_flags.fin { fin += 1; }
        if p.tcp_flags.rst { rst += 1; }
        if p.tcp_flags.ack { ack += 1; }
        if p.tcp_flags.psh {
            psh += 1;
            if p.forward { fwd_psh += 1; } else { bwd_psh += 1; }
        }
        if p.tcp_flags.urg {
            urg += 1;
            if p.forward { fwd_urg += 1; } else { bwd_urg += 1; }
        }
    }

    let down_up_ratio = bwd_bytes_tot as f64 / (fwd_bytes_tot as f64 + 1e-9);

    let record = FeatureRecord {
        flow_key: key.to_csv_field(),
        src_ip: flow.initiator_ip.to_string(),
        dst_ip: flow.responder_ip.to_string(),
        src_port: flow.initiator_port,
        dst_port: flow.responder_port,
        protocol: flow.protocol,

        flow_start_ts: start_ts,
        flow_last_ts: last_ts,
        flow_duration: duration,

        fwd_pkts_tot: fwd.len() as u64,
        bwd_pkts_tot: bwd.len() as u64,
        tot_pkts: flow.packets.len() as u64,

        fwd_bytes_tot,
        bwd_bytes_tot,
        tot_bytes,

        fwd_pkt_len_min: fwd_len_stats.min,
        fwd_pkt_len_max: fwd_len_stats.max,
        fwd_pkt_len_mean: fwd_len_stats.mean,
        fwd_pkt_len_std: fwd_len_stats.std,

        bwd_pkt_len_min: bwd_len_stats.min,
        bwd_pkt_len_max: bwd_len_stats.max,
        bwd_pkt_len_mean: bwd_len_stats.mean,
        bwd_pkt_len_std: bwd_len_stats.std,

        flow_pkt_len_min: flow_len_stats.min,
        flow_pkt_len_max: flow_len_stats.max,
        flow_pkt_len_mean: flow_len_stats.mean,
        flow_pkt_len_std: flow_len_stats.std,

        avg_pkt_size: flow_len_stats.mean,

        fwd_iat_min: fwd_iat_stats.min,
        fwd_iat_max: fwd_iat_stats.max,
        fwd_iat_mean: fwd_iat_stats.mean,
        fwd_iat_std: fwd_iat_stats.std,

        bwd_iat_min: bwd_iat_stats.min,
        bwd_iat_max: bwd_iat_stats.max,
        bwd_iat_mean: bwd_iat_stats.mean,
        bwd_iat_std: bwd_iat_stats.std,

        flow_iat_min: flow_iat_stats.min,
        flow_iat_max: flow_iat_stats.max,
        flow_iat_mean: flow_iat_stats.mean,
        flow_iat_std: flow_iat_stats.std,

        fwd_header_len,
        bwd_header_len,

        fwd_seg_size_avg: if fwd.is_empty() { 0.0 } else { fwd_payload_bytes as f64 / fwd.len() as f64 },
        bwd_seg_size_avg: if bwd.is_empty() { 0.0 } else { bwd_payload_bytes as f64 / bwd.len() as f64 },

        pkts_per_sec: flow.packets.len() as f64 / duration,
        bytes_per_sec: tot_bytes as f64 / duration,

        fwd_psh_flags: fwd_psh,
        bwd_psh_flags: bwd_psh,
        fwd_urg_flags: fwd_urg,
        bwd_urg_flags: bwd_urg,

        syn_flag_cnt: syn,
        fin_flag_cnt: fin,
        rst_flag_cnt: rst,
        ack_flag_cnt: ack,
        psh_flag_cnt: psh,
        urg_flag_cnt: urg,

        down_up_ratio,

        init_win_bytes_fwd: flow.fwd_init_win_bytes.map(|w| w as i64).unwrap_or(-1),
        init_win_bytes_bwd: flow.bwd_init_win_bytes.map(|w| w as i64).unwrap_or(-1),
    };

    Some(sanitize_record(record))
}

fn inter_arrival_times(samples: &[&crate::flow::record::PacketSample]) -> Vec<f64> {
    let mut timestamps: Vec<f64> = samples
        .iter()
        .map(|p| p.timestamp.timestamp_micros() as f64 / 1_000_000.0)
        .collect();
    timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap());
    timestamps.windows(2).map(|w| w[1] - w[0]).collect()
}

fn inter_arrival_times_all(samples: &[crate::flow::record::PacketSample]) -> Vec<f64> {
    let mut timestamps: Vec<f64> = samples
        .iter()
        .map(|p| p.timestamp.timestamp_micros() as f64 / 1_000_000.0)
        .collect();
    timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap());
    timestamps.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Replaces every NaN/Inf numeric field with 0.0 as a final pass, matching
/// the original tool's belt-and-suspenders sanitization step.
fn sanitize_record(mut r: FeatureRecord) -> FeatureRecord {
    r.flow_duration = sanitize(r.flow_duration);
    r.fwd_pkt_len_min = sanitize(r.fwd_pkt_len_min);
    r.fwd_pkt_len_max = sanitize(r.fwd_pkt_len_max);
    r.fwd_pkt_len_mean = sanitize(r.fwd_pkt_len_mean);
    r.fwd_pkt_len_std = sanitize(r.fwd_pkt_len_std);
    r.bwd_pkt_len_min = sanitize(r.bwd_pkt_len_min);
    r.bwd_pkt_len_max = sanitize(r.bwd_pkt_len_max);
    r.bwd_pkt_len_mean = sanitize(r.bwd_pkt_len_mean);
    r.bwd_pkt_len_std = sanitize(r.bwd_pkt_len_std);
    r.flow_pkt_len_min = sanitize(r.flow_pkt_len_min);
    r.flow_pkt_len_max = sanitize(r.flow_pkt_len_max);
    r.flow_pkt_len_mean = sanitize(r.flow_pkt_len_mean);
    r.flow_pkt_len_std = sanitize(r.flow_pkt_len_std);
    r.avg_pkt_size = sanitize(r.avg_pkt_size);
    r.fwd_iat_min = sanitize(r.fwd_iat_min);
    r.fwd_iat_max = sanitize(r.fwd_iat_max);
    r.fwd_iat_mean = sanitize(r.fwd_iat_mean);
    r.fwd_iat_std = sanitize(r.fwd_iat_std);
    r.bwd_iat_min = sanitize(r.bwd_iat_min);
    r.bwd_iat_max = sanitize(r.bwd_iat_max);
    r.bwd_iat_mean = sanitize(r.bwd_iat_mean);
    r.bwd_iat_std = sanitize(r.bwd_iat_std);
    r.flow_iat_min = sanitize(r.flow_iat_min);
    r.flow_iat_max = sanitize(r.flow_iat_max);
    r.flow_iat_mean = sanitize(r.flow_iat_mean);
    r.flow_iat_std = sanitize(r.flow_iat_std);
    r.fwd_seg_size_avg = sanitize(r.fwd_seg_size_avg);
    r.bwd_seg_size_avg = sanitize(r.bwd_seg_size_avg);
    r.pkts_per_sec = sanitize(r.pkts_per_sec);
    r.bytes_per_sec = sanitize(r.bytes_per_sec);
    r.down_up_ratio = sanitize(r.down_up_ratio);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowKey;
    use crate::packet::{Packet, TcpFlags};

    fn pkt(ts_secs: i64, src: &str, sport: u16, dst: &str, dport: u16, syn: bool) -> Packet {
        Packet {
            timestamp: chrono::DateTime::from_timestamp(ts_secs, 0).unwrap(),
            src_ip: src.parse().unwrap(),
            dst_ip: dst.parse().unwrap(),
            src_port: sport,
            dst_port: dport,
            protocol: 6,
            header_len: 40,
            payload_len: 100,
            tcp_window: 65535,
            tcp_flags: TcpFlags { syn, ..TcpFlags::default() },
        }
    }

    #[test]
    fn single_packet_flow_has_zero_std_and_no_bwd_traffic() {
        let p = pkt(0, "10.0.0.1", 1234, "10.0.0.2", 80, true);
        let key = FlowKey::canonicalize(p.src_ip, p.src_port, p.dst_ip, p.dst_port, p.protocol);
        let flow = FlowRecord::start(&p);
        let record = compute(&key, &flow).unwrap();

        assert_eq!(record.tot_pkts, 1);
        assert_eq!(record.bwd_pkts_tot, 0);
        assert_eq!(record.fwd_pkt_len_std, 0.0);
        assert_eq!(record.init_win_bytes_fwd, 65535);
        assert_eq!(record.init_win_bytes_bwd, -1);
    }

    #[test]
    fn no_feature_is_nan_or_infinite() {
        let p = pkt(0, "10.0.0.1", 1234, "10.0.0.2", 80, true);
        let key = FlowKey::canonicalize(p.src_ip, p.src_port, p.dst_ip, p.dst_port, p.protocol);
        let flow = FlowRecord::start(&p);
        let record = compute(&key, &flow).unwrap();

        assert!(record.flow_duration.is_finite());
        assert!(record.down_up_ratio.is_finite());
        assert!(record.pkts_per_sec.is_finite());
    }
}
