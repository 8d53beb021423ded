// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Sorted function range tables.

use crate::demangle::Demangle;
use crate::VirtAddr;
use std::ops::Range;
use std::sync::OnceLock;

/// Named address range `[low, high)` of a single function.
#[derive(Debug)]
pub struct FuncRange {
    name: Box<str>,
    /// First address of the function.
    pub low: VirtAddr,
    /// First address after the function.
    pub high: VirtAddr,
    needs_demangle: bool,
    demangled: OnceLock<Box<str>>,
}

impl FuncRange {
    /// Creates a range whose name is a (possibly) mangled symbol name.
    ///
    /// The name is demangled lazily on first access via [`Self::name`].
    pub fn mangled(name: impl Into<Box<str>>, low: VirtAddr, high: VirtAddr) -> Self {
        Self {
            name: name.into(),
            low,
            high,
            needs_demangle: true,
            demangled: OnceLock::new(),
        }
    }

    /// Creates a range whose name is already human-readable.
    pub fn plain(name: impl Into<Box<str>>, low: VirtAddr, high: VirtAddr) -> Self {
        Self {
            needs_demangle: false,
            ..Self::mangled(name, low, high)
        }
    }

    /// Name as stored in the symbol source.
    pub fn raw_name(&self) -> &str {
        &self.name
    }

    /// Readable name, demangling it with `demangler` on the first call.
    ///
    /// Concurrent callers are serialized: the demangler runs at most once
    /// per range and all callers observe the same result.
    pub fn name(&self, demangler: &dyn Demangle) -> &str {
        if !self.needs_demangle {
            return &self.name;
        }

        self.demangled
            .get_or_init(|| demangler.demangle(&self.name).into())
    }

    /// Whether [`Self::name`] can return without invoking the demangler.
    pub fn is_demangled(&self) -> bool {
        !self.needs_demangle || self.demangled.get().is_some()
    }

    /// Address range covered by this function.
    pub fn range(&self) -> Range<VirtAddr> {
        self.low..self.high
    }
}

/// Function ranges sorted by start address.
#[derive(Debug, Default)]
pub struct FuncTable {
    ranges: Vec<FuncRange>,
}

impl FuncTable {
    /// Builds a table from unordered ranges.
    ///
    /// Ranges are sorted by start address and zero-width ranges (unknown
    /// symbol size) are extended up to the start of the next function.
    pub fn new(mut ranges: Vec<FuncRange>) -> Self {
        ranges.sort_by_key(|x| x.low);
        fill_high_pcs(&mut ranges);
        Self { ranges }
    }

    /// Finds the function containing `addr`.
    ///
    /// Selects the first range ending after `addr` and accepts it only if it
    /// also starts at or before `addr`.
    pub fn lookup(&self, addr: VirtAddr) -> Option<&FuncRange> {
        let idx = self.ranges.partition_point(|x| x.high <= addr);
        self.ranges.get(idx).filter(|x| x.low <= addr)
    }

    /// Iterate over all ranges in address order.
    pub fn iter(&self) -> std::slice::Iter<'_, FuncRange> {
        self.ranges.iter()
    }

    /// Number of ranges in the table.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the table has no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Assigns an end address to ranges with unknown size.
///
/// Such ranges extend to the next strictly greater start address; if there
/// is none they are one byte long.
fn fill_high_pcs(ranges: &mut [FuncRange]) {
    let mut next_low: Option<VirtAddr> = None;
    let mut end = ranges.len();

    // Walk backwards over groups of ranges sharing one start address.
    while end > 0 {
        let low = ranges[end - 1].low;
        let mut start = end - 1;
        while start > 0 && ranges[start - 1].low == low {
            start -= 1;
        }

        for range in &mut ranges[start..end] {
            if range.high <= low {
                range.high = next_low.unwrap_or(low.saturating_add(1));
            }
        }

        next_low = Some(low);
        end = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demangle::Demangler;
    use std::borrow::Cow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDemangler(AtomicUsize);

    impl Demangle for CountingDemangler {
        fn demangle<'a>(&self, name: &'a str) -> Cow<'a, str> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Demangler.demangle(name)
        }
    }

    #[test]
    fn gap_fill() {
        let table = FuncTable::new(vec![
            FuncRange::plain("c", 0x300, 0x300),
            FuncRange::plain("a", 0x100, 0x180),
            FuncRange::plain("b", 0x200, 0x200),
            FuncRange::plain("d", 0x400, 0x400),
        ]);

        let ranges: Vec<_> = table.iter().map(|x| (x.raw_name(), x.range())).collect();
        assert_eq!(
            ranges,
            [
                ("a", 0x100..0x180),
                ("b", 0x200..0x300),
                ("c", 0x300..0x400),
                ("d", 0x400..0x401),
            ]
        );
    }

    #[test]
    fn gap_fill_shared_start() {
        let table = FuncTable::new(vec![
            FuncRange::plain("alias1", 0x100, 0x100),
            FuncRange::plain("alias2", 0x100, 0x100),
            FuncRange::plain("next", 0x180, 0x190),
            FuncRange::plain("tail", u64::MAX, u64::MAX),
        ]);

        let ranges: Vec<_> = table.iter().map(|x| x.range()).collect();
        assert_eq!(
            ranges,
            [0x100..0x180, 0x100..0x180, 0x180..0x190, u64::MAX..u64::MAX]
        );
    }

    #[test]
    fn gap_fill_covers_everything() {
        let lows = [0x10, 0x18, 0x40, 0x41, 0x90];
        let table = FuncTable::new(
            lows.iter()
                .rev()
                .map(|&x| FuncRange::plain("f", x, 0))
                .collect(),
        );

        for pair in table.ranges.windows(2) {
            assert_eq!(pair[0].high, pair[1].low);
        }
        assert_eq!(table.ranges.last().unwrap().high, 0x91);

        for addr in 0x10..0x91 {
            assert!(table.lookup(addr).unwrap().range().contains(&addr));
        }
    }

    #[test]
    fn lookup() {
        let table = FuncTable::new(vec![
            FuncRange::plain("a", 0x100, 0x110),
            FuncRange::plain("b", 0x200, 0x210),
        ]);

        assert!(table.lookup(0).is_none());
        assert!(table.lookup(0xFF).is_none());
        assert_eq!(table.lookup(0x100).unwrap().raw_name(), "a");
        assert_eq!(table.lookup(0x10F).unwrap().raw_name(), "a");
        assert!(table.lookup(0x110).is_none());
        assert!(table.lookup(0x1FF).is_none());
        assert_eq!(table.lookup(0x205).unwrap().raw_name(), "b");
        assert!(table.lookup(0x210).is_none());
        assert!(table.lookup(u64::MAX).is_none());

        assert!(FuncTable::default().lookup(0x100).is_none());
    }

    #[test]
    fn demangle_once() {
        let demangler = CountingDemangler::default();
        let range = FuncRange::mangled("_ZN3foo3barEv", 0x100, 0x110);
        assert!(!range.is_demangled());
        assert_eq!(range.raw_name(), "_ZN3foo3barEv");

        assert_eq!(range.name(&demangler), "foo::bar()");
        assert_eq!(range.name(&demangler), "foo::bar()");
        assert!(range.is_demangled());
        assert_eq!(demangler.0.load(Ordering::SeqCst), 1);

        let plain = FuncRange::plain("_ZN3foo3barEv", 0x100, 0x110);
        assert!(plain.is_demangled());
        assert_eq!(plain.name(&demangler), "_ZN3foo3barEv");
        assert_eq!(demangler.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn demangle_once_concurrently() {
        let demangler = CountingDemangler::default();
        let range = FuncRange::mangled("_Z6helperv", 0x100, 0x110);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| assert_eq!(range.name(&demangler), "helper()"));
            }
        });

        assert_eq!(demangler.0.load(Ordering::SeqCst), 1);
    }
}
