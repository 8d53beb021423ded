// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Cross-language symbol demangling.

use std::borrow::Cow;

/// Demangling strategy used by the [`Symbolizer`](crate::Symbolizer).
///
/// Implementations must return readable names unchanged.
pub trait Demangle: Send + Sync {
    /// Converts a possibly mangled symbol name into its readable form.
    fn demangle<'a>(&self, name: &'a str) -> Cow<'a, str>;
}

/// Default [`Demangle`] implementation handling Rust and Itanium C++ names.
#[derive(Debug, Default, Clone, Copy)]
pub struct Demangler;

impl Demangle for Demangler {
    fn demangle<'a>(&self, name: &'a str) -> Cow<'a, str> {
        demangle(name)
    }
}

/// Strips disambiguation suffixes commonly appended to function clones.
///
/// Modern compilers frequently create specialized versions of functions that
/// factor in additional information from a call site, e.g. arguments that are
/// constants. The corresponding optimization passes append dot-prefixed suffixes
/// like `.isra.0` to the function name to disambiguate them from the regular
/// function instance.
///
/// Anything after a `.` can't simply be dropped: Go symbols contain regular
/// dots and have no prefix that separates them from C symbols with a clone
/// suffix (e.g. `runtime.saveg`), so only known suffixes are removed.
fn strip_clone_suffixes(mut name: &str) -> &str {
    // Strip suffixes like ".llvm.9420829416740162726", ".constprop.0", etc.
    for suffix in &[".clone.", ".constprop.", ".llvm.", ".isra.", ".part."] {
        if let Some(pos) = name.rfind(suffix) {
            if name[pos + suffix.len()..]
                .chars()
                .take_while(|&x| x != '.')
                .all(|x| x.is_ascii_digit())
            {
                name = &name[..pos];
            }
        }
    }

    if let Some(stripped) = name.strip_suffix(".cold") {
        name = stripped;
    }

    name
}

fn could_be_rust_symbol(name: &str) -> bool {
    // V0 mangling.
    if name.starts_with("_R") {
        return true;
    }

    // Legacy mangling: _ZN.*17h[a-zA-Z0-9]{16}E
    let bytes = name.as_bytes();
    name.starts_with("_ZN")
        && name.ends_with('E')
        && bytes.len() > 3 + 3 + 16 + 1
        && &bytes[bytes.len() - 3 - 16 - 1..][..3] == b"17h"
        && bytes[bytes.len() - 16 - 1..][..16]
            .iter()
            .all(u8::is_ascii_hexdigit)
}

fn could_be_itanium_abi_cxx_symbol(name: &str) -> bool {
    // https://itanium-cxx-abi.github.io/cxx-abi/abi.html#mangling
    name.starts_with("_Z") || name.starts_with("___Z")
}

/// Demangles the given symbol name.
///
/// Names that are not recognized as mangled Rust or C++ symbols are returned
/// unchanged, apart from known compiler clone suffixes.
pub fn demangle(name: &str) -> Cow<'_, str> {
    let stripped = strip_clone_suffixes(name);

    if could_be_rust_symbol(stripped) {
        if let Ok(demangler) = rustc_demangle::try_demangle(stripped) {
            // The alternate formatting using `#` suppresses the hash suffix.
            return Cow::Owned(format!("{:#}", demangler));
        };
    }

    if could_be_itanium_abi_cxx_symbol(stripped) {
        if let Ok(sym) = cpp_demangle::BorrowedSymbol::new(stripped.as_bytes()) {
            let options = cpp_demangle::DemangleOptions::default();
            if let Ok(demangled) = sym.demangle(&options) {
                return Cow::Owned(demangled);
            }
        }
    }

    Cow::Borrowed(stripped)
}
