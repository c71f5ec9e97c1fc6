use std::net::IpAddr;

use crate::model::link::{Link, LinkGroup};
use crate::model::{ConnSnapshot, ConnectionRecord, Family};

/// Socket columns that follow the two address columns.
const SK_COLS: [(&str, usize); 6] = [
    ("is_fb", 6),
    ("fb_rsn", 10),
    ("sock", 18),
    ("clc_sock", 18),
    ("st", 4),
    ("inode", 11),
];

/// Link-group columns of a connection row. Fallback rows print `-` in each.
const LGR_COLS: [(&str, usize); 10] = [
    ("lgr_id", 9),
    ("lgr_role", 9),
    ("dev", 9),
    ("port", 5),
    ("l_qp", 9),
    ("r_qp", 9),
    ("tx_P", 9),
    ("tx_B", 11),
    ("cork_P", 9),
    ("cork_B", 0),
];

const LINK_COLS: [(&str, usize); 17] = [
    ("grp", 9),
    ("type", 6),
    ("role", 6),
    ("idx", 5),
    ("gconn", 7),
    ("conn", 6),
    ("state", 7),
    ("qpn_l", 7),
    ("qpn_r", 7),
    ("tx", 4),
    ("rx", 4),
    ("cr-e", 6),
    ("cr-l", 6),
    ("cr-r", 6),
    ("cr_h", 6),
    ("cr_l", 6),
    ("flags", 0),
];

/// Width of one address column: hex address, `:`, hex port, two spaces.
fn addr_width(family: Family) -> usize {
    match family {
        Family::V4 => 8 + 1 + 4 + 2,
        Family::V6 => 32 + 1 + 4 + 2,
    }
}

/// Append `value` padded to `width`, always leaving at least one space.
fn push_col(line: &mut String, value: &str, width: usize) {
    line.push_str(value);
    let pad = width.saturating_sub(value.len()).max(1);
    line.push_str(&" ".repeat(pad));
}

fn finish(mut line: String) -> String {
    line.truncate(line.trim_end().len());
    line.push('\n');
    line
}

/// Address in `/proc/net/tcp` layout: 32-bit words as little-endian hex.
fn format_addr(family: Family, ip: IpAddr, port: u16) -> String {
    match family {
        Family::V4 => {
            let octets = match ip {
                IpAddr::V4(v4) => v4.octets(),
                IpAddr::V6(v6) => v6.to_ipv4_mapped().map(|v4| v4.octets()).unwrap_or([0; 4]),
            };
            format!("{:08X}:{:04X}", u32::from_le_bytes(octets), port)
        }
        Family::V6 => {
            let o = match ip {
                IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
                IpAddr::V6(v6) => v6.octets(),
            };
            let mut s = String::with_capacity(37);
            for w in o.chunks_exact(4) {
                s.push_str(&format!(
                    "{:08X}",
                    u32::from_le_bytes([w[0], w[1], w[2], w[3]])
                ));
            }
            s.push_str(&format!(":{port:04X}"));
            s
        }
    }
}

/// Column header of a connection report.
pub fn format_header(family: Family) -> String {
    let aw = addr_width(family);
    let mut line = format!("{:>4}: ", "sl");
    push_col(&mut line, "local_addr", aw);
    push_col(&mut line, "remote_addr", aw);
    for (name, width) in SK_COLS.iter().chain(LGR_COLS.iter()) {
        push_col(&mut line, name, *width);
    }
    finish(line)
}

/// One connection row. `ordinal` fills the `sl` column.
pub fn format_row(record: &ConnectionRecord, ordinal: u64) -> String {
    format_snapshot(&record.snapshot(), ordinal)
}

pub fn format_snapshot(snap: &ConnSnapshot, ordinal: u64) -> String {
    let aw = addr_width(snap.family);
    let mut line = format!("{ordinal:>4}: ");
    push_col(
        &mut line,
        &format_addr(snap.family, snap.local.ip(), snap.local.port()),
        aw,
    );
    push_col(
        &mut line,
        &format_addr(snap.family, snap.remote.ip(), snap.remote.port()),
        aw,
    );

    let sk = [
        (if snap.fallback { "Y" } else { "N" }).to_string(),
        format!("{:X}", snap.fallback_rsn),
        format!("{:016x}", snap.sock),
        format!("{:016x}", snap.clc_sock),
        format!("{:2}", snap.state),
        snap.inode.to_string(),
    ];
    for (value, (_, width)) in sk.iter().zip(SK_COLS) {
        push_col(&mut line, value, width);
    }

    match &snap.link {
        Some(link) => {
            let lgr = [
                link.lgr_id.to_string(),
                link.role.code().to_string(),
                link.dev.clone(),
                link.port.to_string(),
                link.local_qpn.to_string(),
                link.peer_qpn.to_string(),
                snap.tx_cnt.to_string(),
                snap.tx_bytes.to_string(),
                snap.tx_corked_cnt.to_string(),
                snap.tx_corked_bytes.to_string(),
            ];
            for (value, (_, width)) in lgr.iter().zip(LGR_COLS) {
                push_col(&mut line, value, width);
            }
        }
        None => {
            for (_, width) in LGR_COLS {
                push_col(&mut line, "-", width);
            }
        }
    }
    finish(line)
}

/// Column header of the link-group report.
pub fn links_header() -> String {
    let mut line = String::new();
    for (name, width) in LINK_COLS {
        push_col(&mut line, name, width);
    }
    finish(line)
}

/// One row of the link-group report for link `index` of `group`.
pub fn format_linkgroup_row(group: &LinkGroup, index: usize, link: &Link) -> String {
    let identity = link.identity();
    let credits = link.credits();
    let (wr_tx, wr_rx) = link.wr_counts();
    let values = [
        group.id().to_string(),
        (if group.is_smcd() { "D" } else { "R" }).to_string(),
        group.role().code().to_string(),
        index.to_string(),
        group.conns_num().to_string(),
        link.conn_cnt().to_string(),
        (link.state() as u8).to_string(),
        identity.qp_num.unwrap_or(0).to_string(),
        identity.peer_qpn.to_string(),
        wr_tx.to_string(),
        wr_rx.to_string(),
        u8::from(credits.enabled).to_string(),
        credits.local_rq.to_string(),
        credits.peer_rq.to_string(),
        credits.local_watermark_high.to_string(),
        credits.peer_watermark_low.to_string(),
        link.flags().bits().to_string(),
    ];
    let mut line = String::new();
    for (value, (_, width)) in values.iter().zip(LINK_COLS) {
        push_col(&mut line, value, width);
    }
    finish(line)
}
