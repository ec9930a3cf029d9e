//! Line matching
//!
//! Full-line regex matching with optional ordered capture extraction.
//! A pattern passes only when it matches the entire received line; when
//! capture names are present the same pattern is additionally searched for
//! successive non-overlapping occurrences, and each occurrence's first
//! capturing group is assigned to the next name in the list.

use regex::Regex;

use crate::error::HarnessError;
use crate::vars::VarStore;

/// Test `actual` against the `expected` pattern, assigning captures.
///
/// Returns `Ok(false)` on a clean mismatch; an invalid pattern is a
/// [`HarnessError`] of kind `Match`. Capture assignment runs even when the
/// full match subsequently fails, mirroring find-then-match semantics.
pub fn match_line(
    expected: &str,
    actual: &str,
    capture_names: &[String],
    vars: &mut VarStore,
) -> Result<bool, HarnessError> {
    if !capture_names.is_empty() {
        let re = compile(expected)?;
        for (caps, name) in re.captures_iter(actual).zip(capture_names) {
            if let Some(group) = caps.get(1) {
                vars.set(name.clone(), group.as_str());
            }
        }
    }
    full_match(expected, actual)
}

/// Test `actual` against `expected` as a full-string match, no captures.
pub fn full_match(expected: &str, actual: &str) -> Result<bool, HarnessError> {
    let anchored = compile(&format!("^(?:{})$", expected))?;
    Ok(anchored.is_match(actual))
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern)
        .map_err(|e| HarnessError::mismatch(format!("invalid pattern '{}': {}", pattern, e)))
}
