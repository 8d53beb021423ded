// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod demangle;
pub mod dwarf;
pub mod functab;
pub mod image;
pub mod kallsyms;
pub mod linetab;
pub mod locator;
pub mod objfile;
pub mod symbolize;

pub use config::Config;
pub use locator::{BuildId, BuildIdRecord};
pub use symbolize::{Mapping, Symbolic, Symbolizer};

/// Type-erased error type.
///
/// We primarily use this to hand out errors from third-party libraries where
/// lifting them into distinct error variants didn't make sense because no
/// consumer cares about differentiating between different error variants.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Virtual address in the ELF address space.
pub type VirtAddr = u64;

#[cfg(test)]
mod tests;
