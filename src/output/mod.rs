pub mod json;
pub mod text;

use crate::model::link::LinkGroup;
use crate::model::{ConnectionRecord, Family};
use crate::registry::LinkGroupRegistry;
use crate::table::ConnectionTable;
use crate::table::cursor::{CursorPositioner, Entry};

/// Predicate selecting which records a report shows.
pub type RecordFilter<'a> = Box<dyn Fn(&ConnectionRecord) -> bool + Send + Sync + 'a>;

/// Largest index `<= max` on a char boundary of `s`, but at least one char.
fn split_point(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    if i == 0 {
        s.char_indices().nth(1).map_or(s.len(), |(i, _)| i)
    } else {
        i
    }
}

/// Paginated reader over one connection report.
///
/// Each `read` renders as many whole lines as fit in `max` bytes, then
/// leaves the cursor on the first line that did not fit. A line larger
/// than `max` on its own is split across reads.
pub struct ConnReportReader<'a> {
    family: Family,
    cursor: CursorPositioner<'a, RecordFilter<'a>>,
    pos: u64,
    pending: String,
}

impl<'a> ConnReportReader<'a> {
    pub fn new(table: &'a ConnectionTable, family: Family, filter: RecordFilter<'a>) -> Self {
        Self {
            family,
            cursor: CursorPositioner::new(table, filter),
            pos: 0,
            pending: String::new(),
        }
    }

    /// Report position of the next line to render.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move back to `pos`, like a seek on the report file.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
        self.pending.clear();
    }

    /// Next chunk of at most `max` bytes. Empty once the report is exhausted.
    pub fn read(&mut self, max: usize) -> String {
        let mut out = String::new();
        if max == 0 {
            return out;
        }
        if !self.pending.is_empty() {
            let n = split_point(&self.pending, max);
            out.push_str(&self.pending[..n]);
            self.pending.drain(..n);
            if !self.pending.is_empty() || out.len() >= max {
                return out;
            }
        }

        let mut entry = self.cursor.start(self.pos);
        while let Some(e) = entry {
            let line = self.render(&e);
            if out.len() + line.len() > max {
                if out.is_empty() {
                    let n = split_point(&line, max);
                    out.push_str(&line[..n]);
                    self.pending = line[n..].to_string();
                    self.cursor.advance(&e, &mut self.pos);
                }
                break;
            }
            out.push_str(&line);
            entry = self.cursor.advance(&e, &mut self.pos);
        }
        out
    }

    /// Drain the whole report in `chunk`-sized reads.
    pub fn read_to_string(&mut self, chunk: usize) -> String {
        let mut out = String::new();
        loop {
            let part = self.read(chunk);
            if part.is_empty() {
                return out;
            }
            out.push_str(&part);
        }
    }

    fn render(&self, entry: &Entry) -> String {
        match entry {
            Entry::Header => text::format_header(self.family),
            // Sockets still being set up have no CLC socket yet.
            Entry::Record(r) if r.clc_sock().is_none() => String::new(),
            Entry::Record(r) => text::format_row(r, self.cursor.num()),
        }
    }
}

/// Render the complete link-group report while holding the registry lock.
pub fn render_links(registry: &LinkGroupRegistry) -> String {
    let mut out = text::links_header();
    registry.for_each_group(|group: &LinkGroup, i, link| {
        out.push_str(&text::format_linkgroup_row(group, i, link));
    });
    out
}

/// Reader over the link-group report. The report is rendered in full when
/// the reader is opened and handed out in chunks afterwards.
pub struct LinkReportReader {
    text: String,
    offset: usize,
}

impl LinkReportReader {
    pub fn new(registry: &LinkGroupRegistry) -> Self {
        Self {
            text: render_links(registry),
            offset: 0,
        }
    }

    pub fn read(&mut self, max: usize) -> String {
        if max == 0 {
            return String::new();
        }
        let rest = &self.text[self.offset..];
        let n = split_point(rest, max);
        self.offset += n;
        rest[..n].to_string()
    }

    pub fn read_to_string(&mut self, chunk: usize) -> String {
        let mut out = String::new();
        loop {
            let part = self.read(chunk);
            if part.is_empty() {
                return out;
            }
            out.push_str(&part);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetNsId;
    use crate::model::link::{LgrId, LinkIdentity, Role};
    use crate::table::tests::record_in_bucket;
    use std::sync::Arc;

    fn all<'a>() -> RecordFilter<'a> {
        Box::new(|_: &ConnectionRecord| true)
    }

    fn table_with(n: u64) -> ConnectionTable {
        let table = ConnectionTable::new();
        for i in 0..n {
            let bucket = (i as usize * 5) % crate::table::BUCKETS;
            table.insert(Arc::new(record_in_bucket(NetNsId::INIT, bucket, 100 + i * 2)));
        }
        table
    }

    #[test]
    fn split_point_respects_char_boundaries() {
        assert_eq!(split_point("abc", 10), 3);
        assert_eq!(split_point("abc", 2), 2);
        assert_eq!(split_point("aé", 2), 1);
        assert_eq!(split_point("éa", 1), 2);
    }

    #[test]
    fn empty_table_reports_header_only() {
        let table = ConnectionTable::new();
        let mut reader = ConnReportReader::new(&table, Family::V4, all());
        let out = reader.read_to_string(4096);
        assert_eq!(out, text::format_header(Family::V4));
    }

    #[test]
    fn chunked_read_equals_single_read() {
        let table = table_with(9);
        let whole = ConnReportReader::new(&table, Family::V4, all()).read_to_string(1 << 20);
        assert_eq!(whole.lines().count(), 10);
        for chunk in [1, 7, 80, 200, 333] {
            let got = ConnReportReader::new(&table, Family::V4, all()).read_to_string(chunk);
            assert_eq!(got, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn reads_stay_within_bound() {
        let table = table_with(4);
        let mut reader = ConnReportReader::new(&table, Family::V4, all());
        loop {
            let part = reader.read(64);
            if part.is_empty() {
                break;
            }
            assert!(part.len() <= 64);
        }
    }

    #[test]
    fn whole_lines_per_read_when_they_fit() {
        let table = table_with(3);
        let header_len = text::format_header(Family::V4).len();
        let mut reader = ConnReportReader::new(&table, Family::V4, all());
        let first = reader.read(header_len + 10);
        assert_eq!(first, text::format_header(Family::V4));
        assert_eq!(reader.position(), 1);
    }

    #[test]
    fn record_without_clc_socket_has_no_row() {
        let table = ConnectionTable::new();
        let half_open = crate::model::ConnectionRecord::new(
            NetNsId::INIT,
            "10.0.0.1:1".parse().unwrap(),
            "10.0.0.2:2".parse().unwrap(),
            1,
        );
        table.insert(Arc::new(half_open));
        let out = ConnReportReader::new(&table, Family::V4, all()).read_to_string(4096);
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn seek_to_start_rereads_header() {
        let table = table_with(2);
        let mut reader = ConnReportReader::new(&table, Family::V4, all());
        let first = reader.read_to_string(4096);
        reader.seek(0);
        assert_eq!(reader.read_to_string(4096), first);
    }

    #[test]
    fn link_report_reads_in_chunks() {
        let registry = LinkGroupRegistry::new();
        let group = Arc::new(LinkGroup::new(LgrId([9; 4]), Role::Client, false));
        group.links()[0].activate(LinkIdentity::default());
        group.links()[2].activate(LinkIdentity::default());
        registry.add(group).unwrap();

        let whole = render_links(&registry);
        assert_eq!(whole.lines().count(), 3);
        let chunked = LinkReportReader::new(&registry).read_to_string(5);
        assert_eq!(chunked, whole);
    }

    #[test]
    fn link_report_is_a_snapshot_at_open() {
        let registry = LinkGroupRegistry::new();
        let mut reader = LinkReportReader::new(&registry);
        let group = Arc::new(LinkGroup::new(LgrId([9; 4]), Role::Client, false));
        group.links()[0].activate(LinkIdentity::default());
        registry.add(group).unwrap();
        assert_eq!(reader.read_to_string(4096), text::links_header());
    }
}
