//! Variable store
//!
//! A mutable name → value map shared for the duration of one script run.
//! Entries are pre-seeded before compilation or written by capture matches
//! during execution; later assignment overwrites, nothing is ever removed.

use std::collections::HashMap;

/// The substitution variable store for a single script run.
#[derive(Debug, Default, Clone)]
pub struct VarStore {
    vars: HashMap<String, String>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, overwriting any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Substitute `${name}` tokens in `line` with stored values.
    ///
    /// Scanning is forward-only: each token is replaced at most once per
    /// pass and replaced text is never rescanned, so values containing
    /// `${` do not trigger nested substitution. Tokens naming an unset
    /// variable are left verbatim, and a `${` with no following `}` stops
    /// the scan entirely.
    pub fn substitute(&self, line: &str) -> String {
        if self.vars.is_empty() {
            return line.to_string();
        }
        let mut buf = line.to_string();
        let mut from = 0;
        loop {
            let Some(rel) = buf[from..].find("${") else {
                break;
            };
            let start = from + rel;
            let Some(rel_end) = buf[start..].find('}') else {
                break;
            };
            let end = start + rel_end;
            let name = &buf[start + 2..end];
            match self.vars.get(name) {
                Some(value) => {
                    let value = value.clone();
                    buf.replace_range(start..=end, &value);
                    from = start + value.len();
                }
                None => from = end,
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "HELLO ${not} ${foo} WORLD ${bar}";

    #[test]
    fn test_no_variables_set_is_noop() {
        let vars = VarStore::new();
        assert_eq!(vars.substitute(TEMPLATE), TEMPLATE);
    }

    #[test]
    fn test_only_declared_names_replaced() {
        let mut vars = VarStore::new();
        vars.set("foo", "whatever");
        assert_eq!(vars.substitute(TEMPLATE), "HELLO ${not} whatever WORLD ${bar}");
    }

    #[test]
    fn test_all_declared_names_replaced() {
        let mut vars = VarStore::new();
        vars.set("not", "not");
        vars.set("foo", "foo");
        vars.set("bar", "bar");
        assert_eq!(vars.substitute(TEMPLATE), "HELLO not foo WORLD bar");
    }

    #[test]
    fn test_repeats_and_boundary_positions() {
        let mut vars = VarStore::new();
        vars.set("foo", "whatever");
        assert_eq!(
            vars.substitute("${foo} Some Other Script${foo}${foo}"),
            "whatever Some Other Scriptwhateverwhatever"
        );
    }

    #[test]
    fn test_near_miss_tokens_untouched() {
        let mut vars = VarStore::new();
        vars.set("foo", "whatever");
        let nearly = "{foo}${}${foo Some Other Script${foo}";
        assert_eq!(vars.substitute(nearly), nearly);
    }

    #[test]
    fn test_unterminated_token_stops_scan() {
        let mut vars = VarStore::new();
        vars.set("foo", "x");
        // The first token resolves, the trailing `${foo` has no `}` and
        // everything after the scan stop is left untouched.
        assert_eq!(vars.substitute("${foo} and ${foo"), "x and ${foo");
    }

    #[test]
    fn test_later_assignment_overwrites() {
        let mut vars = VarStore::new();
        vars.set("foo", "first");
        vars.set("foo", "second");
        assert_eq!(vars.substitute("${foo}"), "second");
    }

    #[test]
    fn test_value_containing_token_is_not_rescanned() {
        let mut vars = VarStore::new();
        vars.set("foo", "${foo}");
        assert_eq!(vars.substitute("a ${foo} b"), "a ${foo} b");
    }
}
