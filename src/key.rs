use std::fmt;

use crate::error::{IdempotencyError, Result};

const SEPARATOR: char = '-';

/// Composite identifier correlating repeated submissions of one logical operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns true for `None`, empty, or whitespace-only values.
pub fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Derive the dedup key for `(name, kind, seq)`.
///
/// Non-blank `name` and `kind` each contribute `<value>-`; `seq` is the
/// mandatory terminal component and must not be blank. Values are used
/// verbatim, so `" a"` and `"a"` yield different keys.
///
/// The separator is not escaped. Components that themselves contain `-` can
/// collide with a different triple: `("a-b", None, "c")` and `("a", Some("b"), "c")`
/// both give `a-b-c`. Callers that need strict separation should keep `-`
/// out of operation names and types.
pub fn build_key(name: &str, kind: Option<&str>, seq: &str) -> Result<DedupKey> {
    if is_blank(Some(seq)) {
        return Err(IdempotencyError::InvalidInput {
            reason: "idempotency seq must not be blank".into(),
        });
    }

    let mut buf = String::with_capacity(name.len() + seq.len() + 16);
    if !is_blank(Some(name)) {
        buf.push_str(name);
        buf.push(SEPARATOR);
    }
    if let Some(kind) = kind
        && !is_blank(Some(kind))
    {
        buf.push_str(kind);
        buf.push(SEPARATOR);
    }
    buf.push_str(seq);
    Ok(DedupKey(buf))
}
