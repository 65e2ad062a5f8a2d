//! Name mangling for LLVM global symbols.
//!
//! The scheme is bit-exact and stable:
//!
//! - every top-level symbol starts with `_S`;
//! - a kind marker follows: `D` data type, `R` record type, `C`
//!   continuation, nothing for a module name;
//! - identifiers are `<utf8-byte-length><identifier>`; non-ASCII
//!   identifiers are `X<punycode-byte-length><punycode>` (RFC 3492, via
//!   the `punycode` crate);
//! - type-metadata symbols append `N`.
//!
//! The byte-length prefix makes the encoding self-delimiting, so
//! [`demangle`] is a total inverse of [`mangle`] on identifier strings.

use crate::error::GirError;

/// What kind of global a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Module,
    Data,
    Record,
    Continuation,
}

impl GlobalKind {
    fn marker(self) -> &'static str {
        match self {
            GlobalKind::Module => "",
            GlobalKind::Data => "D",
            GlobalKind::Record => "R",
            GlobalKind::Continuation => "C",
        }
    }
}

fn mangle_identifier(name: &str) -> String {
    if name.is_ascii() {
        format!("{}{}", name.len(), name)
    } else {
        let encoded = punycode::encode(name).expect("punycode encoding cannot fail on non-ASCII input");
        format!("X{}{}", encoded.len(), encoded)
    }
}

/// Mangles a global symbol name.
pub fn mangle(kind: GlobalKind, name: &str) -> String {
    format!("_S{}{}", kind.marker(), mangle_identifier(name))
}

/// Mangles the type-metadata symbol of a global.
pub fn mangle_metadata(kind: GlobalKind, name: &str) -> String {
    format!("{}N", mangle(kind, name))
}

/// A demangled symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demangled {
    pub kind: GlobalKind,
    pub name: String,
    /// `true` for type-metadata symbols (trailing `N`).
    pub metadata: bool,
}

fn ill_formed(symbol: &str, message: &str) -> GirError {
    GirError::IllFormedInput { line: 0, message: format!("symbol '{}': {}", symbol, message) }
}

/// Inverts [`mangle`] / [`mangle_metadata`].
pub fn demangle(symbol: &str) -> Result<Demangled, GirError> {
    let rest = symbol
        .strip_prefix("_S")
        .ok_or_else(|| ill_formed(symbol, "missing _S prefix"))?;

    let (kind, rest) = match rest.chars().next() {
        Some('D') => (GlobalKind::Data, &rest[1..]),
        Some('R') => (GlobalKind::Record, &rest[1..]),
        Some('C') => (GlobalKind::Continuation, &rest[1..]),
        Some(_) => (GlobalKind::Module, rest),
        None => return Err(ill_formed(symbol, "empty symbol body")),
    };

    let (name, rest) = demangle_identifier(symbol, rest)?;
    let metadata = match rest {
        "" => false,
        "N" => true,
        _ => return Err(ill_formed(symbol, "trailing garbage")),
    };
    Ok(Demangled { kind, name, metadata })
}

fn demangle_identifier<'a>(symbol: &str, input: &'a str) -> Result<(String, &'a str), GirError> {
    let (punycoded, input) = match input.strip_prefix('X') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let digit_run = input.chars().take_while(|c| c.is_ascii_digit()).count();
    if digit_run == 0 {
        return Err(ill_formed(symbol, "missing length prefix"));
    }

    // Source identifiers never begin with a digit, but punycode of an
    // all-non-ASCII identifier can, so the length prefix and the body may
    // share a digit run. Take the shortest prefix whose length lands the
    // identifier exactly on the end of the symbol (or its `N` marker).
    for split in 1..=digit_run {
        let len: usize = match input[..split].parse() {
            Ok(len) => len,
            Err(_) => break,
        };
        let body = &input[split..];
        if body.len() < len || !body.is_char_boundary(len) {
            continue;
        }
        let (ident, rest) = body.split_at(len);
        if !matches!(rest, "" | "N") {
            continue;
        }
        let name = if punycoded {
            punycode::decode(ident).map_err(|_| ill_formed(symbol, "invalid punycode"))?
        } else {
            ident.to_string()
        };
        return Ok((name, rest));
    }
    Err(ill_formed(symbol, "identifier shorter than its length prefix"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ascii_continuation() {
        assert_eq!(mangle(GlobalKind::Continuation, "main"), "_SC4main");
    }

    #[test]
    fn data_and_record_markers() {
        assert_eq!(mangle(GlobalKind::Data, "Nat"), "_SD3Nat");
        assert_eq!(mangle(GlobalKind::Record, "Pair"), "_SR4Pair");
        assert_eq!(mangle(GlobalKind::Module, "prelude"), "_S7prelude");
    }

    #[test]
    fn metadata_appends_n() {
        assert_eq!(mangle_metadata(GlobalKind::Data, "Nat"), "_SD3NatN");
        let back = demangle("_SD3NatN").unwrap();
        assert!(back.metadata);
        assert_eq!(back.name, "Nat");
        assert_eq!(back.kind, GlobalKind::Data);
    }

    #[test]
    fn length_prefix_disambiguates_trailing_n() {
        // The final N here belongs to the identifier, not the metadata
        // marker.
        let sym = mangle(GlobalKind::Continuation, "aN");
        assert_eq!(sym, "_SC2aN");
        let back = demangle(&sym).unwrap();
        assert_eq!(back.name, "aN");
        assert!(!back.metadata);
    }

    #[test]
    fn non_ascii_goes_through_punycode() {
        let sym = mangle(GlobalKind::Continuation, "größe");
        assert!(sym.starts_with("_SCX"));
        let back = demangle(&sym).unwrap();
        assert_eq!(back.name, "größe");
    }

    #[test]
    fn malformed_symbols_are_rejected() {
        assert!(demangle("main").is_err());
        assert!(demangle("_S").is_err());
        assert!(demangle("_SC4ma").is_err());
        assert!(demangle("_SC4mainX").is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_ascii_identifiers(name in "[A-Za-z_][A-Za-z0-9_]{0,24}") {
            for kind in [GlobalKind::Module, GlobalKind::Data, GlobalKind::Record, GlobalKind::Continuation] {
                let back = demangle(&mangle(kind, &name)).unwrap();
                prop_assert_eq!(back.kind, kind);
                prop_assert_eq!(&back.name, &name);
                prop_assert!(!back.metadata);
            }
        }

        #[test]
        fn roundtrip_unicode_identifiers(name in "[a-zäößλμαβγ][a-z0-9äößλμαβγ]{0,12}") {
            let back = demangle(&mangle(GlobalKind::Continuation, &name)).unwrap();
            prop_assert_eq!(back.name, name);
        }

        #[test]
        fn roundtrip_metadata(name in "[A-Za-z][A-Za-z0-9]{0,12}") {
            let back = demangle(&mangle_metadata(GlobalKind::Data, &name)).unwrap();
            prop_assert!(back.metadata);
            prop_assert_eq!(back.name, name);
        }
    }
}
