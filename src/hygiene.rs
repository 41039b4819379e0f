//! Variable Hygiene Engine
//!
//! Renames variable references inside template expression text so that a
//! component's variables cannot collide with its caller's once inlined.
//!
//! A reference starts with a sigil (`.` field access, `$` named variable,
//! `%` escape-marked name) at a start boundary and runs until an end
//! boundary. Its *head* is the sigil plus the first path segment; the rest is
//! a dotted suffix that is always carried over unchanged:
//!
//! ```text
//!   .Foo.Id   head = .Foo   suffix = .Id
//!   $x.Name   head = $x     suffix = .Name
//!   .         head = .      (the bare positional root)
//! ```
//!
//! Quoted strings (`"…"`, `` `…` ``) are never rewritten.

use std::collections::HashMap;

const SIGILS: &[u8] = b".$%";

fn is_start_boundary(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b',' | b'(' | b'|' | b'=')
}

fn is_end_boundary(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b',' | b')' | b'|' | b':' | b'=')
}

/// Byte span of one variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub start: usize,
    pub head_end: usize,
    pub end: usize,
}

impl Reference {
    pub fn sigil(&self, s: &str) -> u8 {
        s.as_bytes()[self.start]
    }

    pub fn head<'a>(&self, s: &'a str) -> &'a str {
        &s[self.start..self.head_end]
    }

    pub fn text<'a>(&self, s: &'a str) -> &'a str {
        &s[self.start..self.end]
    }

    pub fn is_lone_sigil(&self) -> bool {
        self.head_end - self.start == 1
    }
}

/// Every reference in `s`, left to right. Spans never overlap.
pub fn scan_references(s: &str) -> Vec<Reference> {
    let bytes = s.as_bytes();
    let mut refs = Vec::new();
    let mut previous: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c == b'"' || c == b'`' {
            i += 1;
            while i < bytes.len() && bytes[i] != c {
                if c == b'"' && bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            previous = Some(c);
            continue;
        }

        if SIGILS.contains(&c) && previous.map_or(true, is_start_boundary) {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != b'.' && !is_end_boundary(bytes[i]) {
                i += 1;
            }
            let head_end = i;
            while i < bytes.len() && !is_end_boundary(bytes[i]) {
                i += 1;
            }
            refs.push(Reference { start, head_end, end: i });
            previous = Some(bytes[i - 1]);
            continue;
        }

        previous = Some(c);
        i += 1;
    }

    refs
}

/// Splice `replacement(reference)` over every reference it accepts. Scanning
/// resumes after the rewritten span, so replacement text is never rescanned.
fn rewrite<F>(s: &str, mut replacement: F) -> String
where
    F: FnMut(&Reference) -> Option<String>,
{
    let mut out = String::with_capacity(s.len());
    let mut last = 0;

    for reference in scan_references(s) {
        if let Some(text) = replacement(&reference) {
            out.push_str(&s[last..reference.start]);
            out.push_str(&text);
            last = reference.end;
        }
    }

    out.push_str(&s[last..]);
    out
}

/// Prefix references matching `target` with `prefix`.
///
/// `target` is either a bare sigil (`"."`, `"$"`, `"%"`), selecting every
/// reference of that family, or a full head such as `".Foo"`.
///
/// - `.` references keep their dot: `.Foo` → `$root.Foo`, and the lone
///   `.` becomes exactly `$root`.
/// - `$` and `%` references swap the sigil for the prefix: `$x` → `$Card_x`.
///   A lone `$` (the template root) is left alone.
/// - A reference that already starts with `prefix` is left alone, which
///   makes the pass idempotent.
pub fn prefix_variables(s: &str, target: &str, prefix: &str) -> String {
    let Some(&sigil) = target.as_bytes().first() else {
        return s.to_string();
    };

    rewrite(s, |reference| {
        if reference.sigil(s) != sigil {
            return None;
        }
        if target.len() > 1 && reference.head(s) != target {
            return None;
        }

        let text = reference.text(s);
        if text.starts_with(prefix) {
            return None;
        }

        match sigil {
            b'.' if text == "." => Some(prefix.to_string()),
            b'.' => Some(format!("{}{}", prefix, text)),
            _ if reference.is_lone_sigil() => None,
            _ => Some(format!("{}{}", prefix, &text[1..])),
        }
    })
}

/// Substitute bound names by their argument values, using the same boundary
/// rule as [`prefix_variables`]. Lookups use the reference head, so a bound
/// `.Foo` also rewrites `.Foo.Id` into `<value>.Id`.
pub fn replace_variables(s: &str, arguments: &HashMap<String, String>) -> String {
    rewrite(s, |reference| {
        let value = arguments.get(reference.head(s))?;
        Some(format!("{}{}", value, &s[reference.head_end..reference.end]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_replace_variables_cases() {
        let cases: &[(&str, &str, &[(&str, &str)])] = &[
            (".Foo", "$arg0", &[(".Foo", "$arg0")]),
            (".Foo .Foo .Foo", "$arg0 $arg0 $arg0", &[(".Foo", "$arg0")]),
            (" . ", " $arg0 ", &[(".", "$arg0")]),
            (" . .Foo .Bar ", " $arg0 .Foo .Bar ", &[(".", "$arg0")]),
            ("   .Foo  ", "   $arg0  ", &[(".Foo", "$arg0")]),
            (
                "range $foo, $bar := $value",
                "range $foo, $bar := $arg0",
                &[("$value", "$arg0")],
            ),
            (".Foo := .Bar", ".Foo := $arg0", &[(".Bar", "$arg0")]),
            (
                "  .Foo :=  .LongWithWhiteSpace $bar  ",
                "  .Foo :=  $arg0 $arg1  ",
                &[(".LongWithWhiteSpace", "$arg0"), ("$bar", "$arg1")],
            ),
            (".Foo := .Foo.Id", "$arg0 := $arg0.Id", &[(".Foo", "$arg0")]),
            (
                " .Foo.Id .Bar ",
                " $arg0.Id $arg1 ",
                &[(".Foo", "$arg0"), (".Bar", "$arg1")],
            ),
            (
                ".Foo.Id = .Bar",
                "$arg0.Id = $arg1",
                &[(".Foo", "$arg0"), (".Bar", "$arg1")],
            ),
            ("$Test.Foo, .Foo", "$Test.Foo, $arg0", &[(".Foo", "$arg0")]),
        ];

        for (input, expected, pairs) in cases {
            assert_eq!(replace_variables(input, &args(pairs)), *expected, "input: {:?}", input);
        }
    }

    #[test]
    fn test_replace_variables_many_names() {
        let mapping = args(&[
            (".Foo", "$arg0"),
            (".Monke", "$arg1"),
            ("$melt", "$arg3"),
            (".Jungle", "$arg4"),
            (".Tree", "$arg5"),
        ]);
        assert_eq!(
            replace_variables(
                ".Foo.Id .Bar .Monke.Tree.Id .Tree, $melt $jungle .Jungle.Tree.Leave",
                &mapping
            ),
            "$arg0.Id .Bar $arg1.Tree.Id $arg5, $arg3 $jungle $arg4.Tree.Leave"
        );
    }

    #[test]
    fn test_replace_skips_string_literals() {
        let mapping = args(&[(".Foo", "$arg0")]);
        assert_eq!(
            replace_variables(r#"printf "%s .Foo" .Foo"#, &mapping),
            r#"printf "%s .Foo" $arg0"#
        );
    }

    #[test]
    fn test_prefix_variables_cases() {
        let cases = [
            (".Foo", "$root.Foo", ".", "$root"),
            (".", "$root", ".", "$root"),
            ("$bar", "$Index_bar", "$", "$Index_"),
            (
                "{{ range $x $y := .Coordinates }}",
                "{{ range $Index_x $Index_y := .Coordinates }}",
                "$",
                "$Index_",
            ),
            (
                "{{ range $x $y $z := .Coordinates }}",
                "{{ range $Index_x $Index_y $Index_z := .Coordinates }}",
                "$",
                "$Index_",
            ),
            (
                "{{ range $x $y $z := .Coordinates }}",
                "{{ range $x $y $z := $root.Coordinates }}",
                ".",
                "$root",
            ),
            ("{{ %test }}", "{{ $Index_test }}", "%", "$Index_"),
            ("%x", "$Index_x", "%", "$Index_"),
            ("{{ %x }}", "{{ $Index_x }}", "%", "$Index_"),
            (
                "{{ %test %x %y }}",
                "{{ $Index_test $Index_x $Index_y }}",
                "%",
                "$Index_",
            ),
        ];

        for (input, expected, target, prefix) in cases {
            assert_eq!(prefix_variables(input, target, prefix), expected, "input: {:?}", input);
        }
    }

    #[test]
    fn test_prefix_named_target_leaves_others() {
        assert_eq!(
            prefix_variables(".Foo.Id .Bar", ".Foo", "$root"),
            "$root.Foo.Id .Bar"
        );
    }

    #[test]
    fn test_prefix_is_idempotent() {
        let inputs = [
            "range $i, $e := .Items",
            "if and .A $b.C (not $d)",
            "$x := index . 0",
            "%slot %x.Y",
        ];
        for (target, prefix) in [("$", "$Card_"), (".", "$root"), ("%", "$Card_")] {
            for input in inputs {
                let once = prefix_variables(input, target, prefix);
                let twice = prefix_variables(&once, target, prefix);
                assert_eq!(once, twice, "target {:?} input {:?}", target, input);
            }
        }
    }

    #[test]
    fn test_lone_dollar_is_root_and_untouched() {
        assert_eq!(prefix_variables("$ $.Site", "$", "$Card_"), "$ $.Site");
    }

    #[test]
    fn test_references_inside_parentheses() {
        assert_eq!(
            prefix_variables("(len $items)|printf \"%d\"", "$", "$Card_"),
            "(len $Card_items)|printf \"%d\""
        );
        let refs = scan_references("(index .Items 0).Name");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].head("(index .Items 0).Name"), ".Items");
    }
}
