//! Restartable position tracking over a [`ConnectionTable`].
//!
//! Readers consume a report in bounded chunks. Between chunks no lock is
//! held, so the cursor remembers where it stopped (bucket, offset within the
//! bucket, running ordinal) and tries to resume from there. When the table
//! moved underneath it, it rescans from the beginning instead. Rows may then
//! be skipped or repeated, but the traversal always terminates.

use std::sync::Arc;

use super::{BUCKETS, ConnectionTable, Position, Step};
use crate::model::ConnectionRecord;

/// Item yielded at a report position. Position 0 is always the header.
#[derive(Clone, Debug)]
pub enum Entry {
    Header,
    Record(Arc<ConnectionRecord>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorState {
    pub bucket: usize,
    pub offset: usize,
    /// Ordinal of the current record, shown in the `sl` column.
    pub num: u64,
    /// Report position reached by the last `start`/`advance`.
    pub last_pos: u64,
    /// Socket identity of the record at `last_pos`.
    pub last_sock: Option<u64>,
}

pub struct CursorPositioner<'t, F> {
    table: &'t ConnectionTable,
    filter: F,
    state: CursorState,
}

impl<'t, F> CursorPositioner<'t, F>
where
    F: Fn(&ConnectionRecord) -> bool,
{
    pub fn new(table: &'t ConnectionTable, filter: F) -> Self {
        Self {
            table,
            filter,
            state: CursorState::default(),
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Ordinal of the record most recently yielded.
    pub fn num(&self) -> u64 {
        self.state.num
    }

    /// Position the cursor at report position `pos`.
    ///
    /// Position 0 resets the cursor and yields the header. Resuming at the
    /// last recorded position replays the recorded bucket; if that does not
    /// land on the same record, the table is rescanned from the start.
    pub fn start(&mut self, pos: u64) -> Option<Entry> {
        if pos != 0 && pos == self.state.last_pos {
            if let Some(step) = self.seek_last_pos() {
                return Some(self.yield_record(step));
            }
            log::debug!("cursor: resume at position {pos} missed, rescanning");
        }

        self.state.num = 0;
        self.state.bucket = 0;
        self.state.offset = 0;
        self.state.last_pos = pos;
        if pos == 0 {
            self.state.last_sock = None;
            return Some(Entry::Header);
        }
        match self.get_idx(pos - 1) {
            Some(step) => Some(self.yield_record(step)),
            None => {
                self.state.last_sock = None;
                None
            }
        }
    }

    /// Step past `entry`, bumping the report position.
    pub fn advance(&mut self, entry: &Entry, pos: &mut u64) -> Option<Entry> {
        let step = match entry {
            Entry::Header => self.get_idx(0),
            Entry::Record(_) => self.get_next(false),
        };
        *pos += 1;
        self.state.last_pos = *pos;
        match step {
            Some(step) => Some(self.yield_record(step)),
            None => {
                self.state.last_sock = None;
                None
            }
        }
    }

    fn yield_record(&mut self, step: Step) -> Entry {
        self.state.last_sock = Some(step.record.sock());
        Entry::Record(step.record)
    }

    /// One table step. `from_bucket_start` restarts at the head of the
    /// current bucket; otherwise moves past the current record.
    fn get_next(&mut self, from_bucket_start: bool) -> Option<Step> {
        let step = if from_bucket_start {
            self.table.first_from(self.state.bucket, &self.filter)
        } else {
            self.state.num += 1;
            let pos = Position {
                bucket: self.state.bucket,
                offset: self.state.offset,
            };
            self.table.next(pos, &self.filter)
        };
        match &step {
            Some(s) => {
                self.state.bucket = s.pos.bucket;
                self.state.offset = s.pos.offset;
            }
            None => {
                self.state.bucket = BUCKETS;
                self.state.offset = 0;
            }
        }
        step
    }

    /// Walk from the table start to the record at ordinal `idx`.
    fn get_idx(&mut self, mut idx: u64) -> Option<Step> {
        self.state.bucket = 0;
        let mut step = self.get_next(true);
        while step.is_some() && idx > 0 {
            step = self.get_next(false);
            idx -= 1;
        }
        step
    }

    /// Replay the recorded bucket up to the recorded offset.
    fn seek_last_pos(&mut self) -> Option<Step> {
        if self.state.bucket >= BUCKETS {
            return None;
        }
        let expected = self.state.last_sock?;
        let orig_num = self.state.num;
        let mut offset = self.state.offset;

        let mut step = self.get_next(true);
        while offset > 0 && step.is_some() {
            step = self.get_next(false);
            offset -= 1;
        }
        self.state.num = orig_num;

        match step {
            Some(s) if s.record.sock() == expected => Some(s),
            _ => None,
        }
    }
}
