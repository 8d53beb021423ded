// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Address to source line mapping.

use crate::VirtAddr;
use std::sync::Arc;

/// Row of a line-number table.
///
/// The default value (no file, line `0`) is what lookups of unmatched
/// addresses are reported as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineEntry {
    /// Address of the first instruction belonging to this row.
    pub address: VirtAddr,
    /// Full path of the source file.
    pub file: Option<Arc<str>>,
    /// Line number, starting at `1`. `0` if unknown.
    pub line: u64,
    /// Column number, starting at `1`. `0` if unknown.
    pub column: u64,
    /// Whether this is a recommended breakpoint location.
    pub is_stmt: bool,
    /// Marks the first address after the end of a sequence. Such rows
    /// delimit ranges but never describe an instruction themselves.
    pub end_sequence: bool,
}

/// Line entries sorted by address.
#[derive(Debug, Default)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    /// Builds a table from rows in arbitrary order.
    ///
    /// The sort is stable; where an end-of-sequence marker shares its address
    /// with a regular row, the regular row is placed last so that it wins
    /// lookups.
    pub fn new(mut entries: Vec<LineEntry>) -> Self {
        entries.sort_by_key(|x| (x.address, !x.end_sequence));
        Self { entries }
    }

    /// Finds the row describing `addr`.
    ///
    /// This is the last row starting at or before `addr`, unless that row is
    /// an end-of-sequence marker.
    pub fn lookup(&self, addr: VirtAddr) -> Option<&LineEntry> {
        let idx = self.entries.partition_point(|x| x.address <= addr);
        let entry = self.entries.get(idx.checked_sub(1)?)?;
        (!entry.end_sequence).then_some(entry)
    }

    /// Iterate over all rows in address order.
    pub fn iter(&self) -> std::slice::Iter<'_, LineEntry> {
        self.entries.iter()
    }

    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(address: VirtAddr, line: u64, end_sequence: bool) -> LineEntry {
        LineEntry {
            address,
            file: Some("/src/file.c".into()),
            line,
            column: 0,
            is_stmt: true,
            end_sequence,
        }
    }

    #[test]
    fn lookup() {
        let table = LineTable::new(vec![
            row(0x1000, 10, false),
            row(0x1004, 11, false),
            row(0x1010, 11, true),
        ]);

        assert!(table.lookup(0xFFF).is_none());
        assert_eq!(table.lookup(0x1000).unwrap().line, 10);
        assert_eq!(table.lookup(0x1003).unwrap().line, 10);
        assert_eq!(table.lookup(0x1004).unwrap().line, 11);
        assert_eq!(table.lookup(0x100F).unwrap().line, 11);
        assert!(table.lookup(0x1010).is_none());
        assert!(table.lookup(0x2000).is_none());
        assert!(LineTable::default().lookup(0x1000).is_none());
    }

    #[test]
    fn units_in_any_order() {
        // Second unit's rows come first, as they would when units are laid
        // out in the file in a different order than their code.
        let table = LineTable::new(vec![
            row(0x2000, 30, false),
            row(0x2008, 30, true),
            row(0x1000, 10, false),
            row(0x1008, 10, true),
        ]);

        let addrs: Vec<_> = table.iter().map(|x| x.address).collect();
        assert_eq!(addrs, [0x1000, 0x1008, 0x2000, 0x2008]);
        assert_eq!(table.lookup(0x1004).unwrap().line, 10);
        assert!(table.lookup(0x1800).is_none());
        assert_eq!(table.lookup(0x2004).unwrap().line, 30);
    }

    #[test]
    fn adjacent_sequences() {
        // A sequence starting where the previous one ends.
        let table = LineTable::new(vec![
            row(0x1000, 10, false),
            row(0x1010, 20, false),
            row(0x1020, 20, true),
            row(0x1000 - 0x10, 5, false),
            row(0x1000, 5, true),
        ]);

        assert_eq!(table.lookup(0xFF8).unwrap().line, 5);
        assert_eq!(table.lookup(0x1000).unwrap().line, 10);
        assert_eq!(table.lookup(0x1010).unwrap().line, 20);
        assert!(table.lookup(0x1020).is_none());
    }

    #[test]
    fn default_entry() {
        let entry = LineEntry::default();
        assert_eq!(entry.file, None);
        assert_eq!(entry.line, 0);
        assert!(!entry.end_sequence);
    }
}
