// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Parser for the kernel symbol table format of `/proc/kallsyms`.
//!
//! Each line has the form `<hex address> <type> <name>[\t[module]]`, in the
//! style of `nm` output. Only text symbols (type `t` or `T`) are of
//! interest for symbolization.

use crate::functab::{FuncRange, FuncTable};
use crate::VirtAddr;
use std::io::{self, BufRead};
use std::path::Path;
use std::{fs, str};

/// Reads a kallsyms file into a function table.
pub fn load(path: &Path) -> io::Result<FuncTable> {
    parse(io::BufReader::new(fs::File::open(path)?))
}

/// Parses kallsyms lines from `reader` into a function table.
///
/// Malformed lines are skipped. Symbols don't carry a size, so every range
/// extends up to the next symbol.
pub fn parse(reader: impl BufRead) -> io::Result<FuncTable> {
    let mut ranges = Vec::new();

    for line in reader.split(b'\n') {
        let line = line?;
        let Ok(line) = str::from_utf8(&line) else {
            continue;
        };
        if let Some((addr, name)) = parse_line(line) {
            ranges.push(FuncRange::plain(name, addr, addr));
        }
    }

    Ok(FuncTable::new(ranges))
}

/// Extracts address and name from a text symbol line.
fn parse_line(line: &str) -> Option<(VirtAddr, &str)> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    let (addr, rest) = line.split_once(' ')?;
    let rest = rest.trim_start_matches(' ');

    let mut chars = rest.chars();
    let kind = chars.next()?;
    if !matches!(kind, 't' | 'T') {
        return None;
    }

    // Module symbols carry a tab-separated `[module]` annotation.
    let name = chars.as_str().strip_prefix(' ')?;
    let name = name.split('\t').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }

    if addr.is_empty() || !addr.bytes().all(|x| x.is_ascii_hexdigit()) {
        return None;
    }
    let addr = u64::from_str_radix(addr, 16).ok()?;

    Some((addr, name))
}
