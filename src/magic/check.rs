//! Evaluates a [`MagicTable`] against a byte buffer.
//!
//! Entries are tried in table order. Once an entry's level-0 rule matches,
//! its continuations are walked in order: a continuation at level N is only
//! tried while its nearest level N-1 ancestor matched, so the children of a
//! failed rule are skipped without being evaluated.
//!
//! Nothing here reads outside the buffer. Offsets before the start or past
//! the end read as zero bytes.

use mime::Mime;

use super::convert::{apply_op, is_c_space, read_numeric, sign_extend, Window};
use super::print::{render, Arg};
use super::{FieldType, MagicRule, MagicTable, MatchValue, Offset, Relation, StringFlags};

/// Upper bound on rule evaluations for a single buffer.
pub const MAX_EVALUATIONS: usize = 1 << 20;

/// Longest string shown for rules that do not match a literal.
pub const MAX_STRING: usize = 64;

/// One piece of output produced by a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub no_leading_space: bool,
}

/// Everything a scan found.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub fragments: Vec<Fragment>,
    /// First MIME annotation among the rules that matched.
    pub mime: Option<Mime>,
    /// Rules evaluated, including those that did not match.
    pub evaluations: usize,
}

impl Report {
    /// Joins fragments with single spaces, except before a fragment that asks
    /// for none.
    pub fn description(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            if fragment.text.is_empty() {
                continue;
            }
            if !out.is_empty() && !fragment.no_leading_space {
                out.push(' ');
            }
            out.push_str(&fragment.text);
        }
        out
    }
}

/// Outcome of identifying a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    NoMatch,
    Described(String),
}

impl Match {
    pub fn description(&self) -> Option<&str> {
        match self {
            Match::NoMatch => None,
            Match::Described(d) => Some(d),
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Match::Described(_))
    }
}

/// Per-buffer evaluation state.
struct MatchState {
    /// Where the match at each level ended, for `&` offsets.
    level_offsets: Vec<i64>,
    /// Levels currently open: a rule at level N is eligible while this is at
    /// least N.
    current_level: u16,
}

impl MatchState {
    fn new() -> MatchState {
        MatchState {
            level_offsets: Vec::new(),
            current_level: 0,
        }
    }

    fn parent_end(&self, level: u16) -> i64 {
        match level.checked_sub(1) {
            Some(parent) => self
                .level_offsets
                .get(usize::from(parent))
                .copied()
                .unwrap_or(0),
            None => 0,
        }
    }

    fn record(&mut self, level: u16, end: i64) {
        let at = usize::from(level);
        if self.level_offsets.len() <= at {
            self.level_offsets.resize(at + 1, 0);
        }
        self.level_offsets[at] = end;
        self.current_level = level.saturating_add(1);
    }
}

struct Hit {
    text: String,
    end: i64,
}

fn resolve_offset(rule: &MagicRule, buf: &[u8], state: &MatchState) -> i64 {
    let base = if rule.relative_to_parent {
        state.parent_end(rule.level)
    } else {
        0
    };
    match rule.offset {
        Offset::Absolute(o) => base.saturating_add(i64::from(o)),
        Offset::Indirect(ind) => {
            let at = base.saturating_add(i64::from(ind.base_offset));
            let pointer = read_numeric(buf, at, ind.pointer_type);
            i64::from(pointer).saturating_add(ind.displacement())
        }
    }
}

fn compare_numeric(relation: Relation, v: i64, l: i64) -> bool {
    // Both sides are already widened per the rule's signedness, so plain
    // i64 comparison gives the signed or unsigned ordering as appropriate.
    match relation {
        Relation::Equal => v == l,
        Relation::NotEqual => v != l,
        Relation::Greater => v > l,
        Relation::Less => v < l,
        Relation::BitAnd => (v & l) == l,
        Relation::BitXorNot => (v & l) != l,
        Relation::Always => true,
    }
}

fn match_numeric(rule: &MagicRule, buf: &[u8], offset: i64) -> Option<Hit> {
    let ty = rule.field_type.numeric()?;
    let raw = read_numeric(buf, offset, ty);
    let mut v = sign_extend(rule.field_type, rule.unsigned, raw);
    if let Some(op) = rule.mask_op {
        v = apply_op(op, v, rule.mask, rule.unsigned)?;
    }

    if rule.relation != Relation::Always {
        let l = match rule.value {
            MatchValue::Numeric(l) => l,
            MatchValue::Bytes { .. } => {
                tracing::debug!("numeric rule carries a string value, skipping");
                return None;
            }
        };
        if !compare_numeric(rule.relation, v, l) {
            return None;
        }
    }

    let arg = if rule.field_type.is_date() {
        Arg::Date(v)
    } else {
        Arg::Int(v)
    };
    Some(Hit {
        text: render(&rule.description, &arg),
        end: offset.saturating_add(ty.width() as i64),
    })
}

/// Compares `pattern` with the buffer, returning how many buffer bytes it
/// covered.
pub fn compare_string(pattern: &[u8], flags: StringFlags, window: Window<'_>) -> Option<usize> {
    let mut b = 0;
    for &a in pattern {
        if flags.contains(StringFlags::IGNORE_CASE) && a.is_ascii_lowercase() {
            if window.byte(b).to_ascii_lowercase() != a {
                return None;
            }
            b += 1;
        } else if flags.contains(StringFlags::COMPACT_BLANK) && is_c_space(a) {
            if !is_c_space(window.byte(b)) {
                return None;
            }
            b += 1;
            while is_c_space(window.byte(b)) {
                b += 1;
            }
        } else if flags.contains(StringFlags::COMPACT_OPTIONAL_BLANK) && is_c_space(a) {
            while is_c_space(window.byte(b)) {
                b += 1;
            }
        } else {
            if window.byte(b) != a {
                return None;
            }
            b += 1;
        }
    }
    Some(b)
}

// Text shown for a string rule that did not match a literal: the buffer up
// to a NUL, bounded, cut at the first newline when the pattern is empty.
fn displayed_string(window: Window<'_>, pattern_empty: bool) -> Vec<u8> {
    let mut shown = window.take(window.available(MAX_STRING));
    if let Some(nul) = shown.iter().position(|&b| b == 0) {
        shown.truncate(nul);
    }
    if pattern_empty {
        if let Some(nl) = shown.iter().position(|&b| b == b'\n') {
            shown.truncate(nl);
        }
    }
    shown
}

fn match_string(rule: &MagicRule, buf: &[u8], offset: i64) -> Option<Hit> {
    let (pattern, flags) = match &rule.value {
        MatchValue::Bytes { data, flags } => (data.as_slice(), *flags),
        MatchValue::Numeric(_) if rule.relation == Relation::Always => {
            (&[][..], StringFlags::empty())
        }
        MatchValue::Numeric(_) => {
            tracing::debug!("string rule carries a numeric value, skipping");
            return None;
        }
    };
    let window = Window::new(buf, offset);

    let shown = match rule.relation {
        Relation::Equal => {
            let n = compare_string(pattern, flags, window)?;
            let mut matched = window.take(n);
            if let Some(nul) = matched.iter().position(|&b| b == 0) {
                matched.truncate(nul);
            }
            return Some(Hit {
                text: render(
                    &rule.description,
                    &Arg::Str(String::from_utf8_lossy(&matched).into_owned()),
                ),
                end: offset.saturating_add(n as i64),
            });
        }
        Relation::NotEqual => {
            if compare_string(pattern, flags, window).is_some() {
                return None;
            }
            displayed_string(window, pattern.is_empty())
        }
        Relation::Always => displayed_string(window, pattern.is_empty()),
        _ => {
            tracing::debug!("relation `{}` is not defined for strings", rule.relation);
            return None;
        }
    };

    Some(Hit {
        text: render(
            &rule.description,
            &Arg::Str(String::from_utf8_lossy(&shown).into_owned()),
        ),
        end: offset.saturating_add(shown.len() as i64),
    })
}

fn try_match(rule: &MagicRule, buf: &[u8], state: &MatchState) -> Option<Hit> {
    let offset = resolve_offset(rule, buf, state);
    let hit = if rule.field_type == FieldType::String {
        match_string(rule, buf, offset)
    } else {
        match_numeric(rule, buf, offset)
    };
    tracing::trace!(
        level = rule.level,
        offset,
        matched = hit.is_some(),
        "{}",
        rule.description
    );
    hit
}

struct Scanner<'a> {
    buf: &'a [u8],
    budget: usize,
    report: Report,
}

impl<'a> Scanner<'a> {
    fn step(&mut self) -> bool {
        if self.report.evaluations >= self.budget {
            return false;
        }
        self.report.evaluations += 1;
        true
    }

    fn emit(&mut self, rule: &MagicRule, text: String) {
        if self.report.mime.is_none() {
            self.report.mime = rule.mime.clone();
        }
        self.report.fragments.push(Fragment {
            text,
            no_leading_space: rule.no_leading_space,
        });
    }

    /// Tries one entry. Returns whether its level-0 rule matched.
    fn entry(&mut self, entry: &[MagicRule]) -> bool {
        let (root, continuations) = match entry.split_first() {
            Some(split) => split,
            None => return false,
        };
        if !self.step() {
            return false;
        }
        let mut state = MatchState::new();
        let hit = match try_match(root, self.buf, &state) {
            Some(hit) => hit,
            None => return false,
        };
        self.emit(root, hit.text);
        state.record(0, hit.end);

        for rule in continuations {
            // Parent at rule.level - 1 did not match.
            if rule.level > state.current_level {
                continue;
            }
            // Returning to a shallower level closes the deeper branches.
            state.current_level = rule.level;
            if !self.step() {
                tracing::debug!(
                    budget = self.budget,
                    "evaluation budget exhausted, stopping"
                );
                break;
            }
            if let Some(hit) = try_match(rule, self.buf, &state) {
                self.emit(rule, hit.text);
                state.record(rule.level, hit.end);
            }
        }
        true
    }
}

/// Evaluates `table` against `buf` with an explicit evaluation budget.
pub fn scan_with_budget(
    table: &MagicTable,
    buf: &[u8],
    keep_scanning: bool,
    budget: usize,
) -> Option<Report> {
    let mut scanner = Scanner {
        buf,
        budget,
        report: Report {
            fragments: Vec::new(),
            mime: None,
            evaluations: 0,
        },
    };
    let mut matched = false;

    for entry in table.entries() {
        if scanner.report.evaluations >= budget {
            tracing::debug!(budget, "evaluation budget exhausted, stopping");
            break;
        }
        if scanner.entry(entry) {
            matched = true;
            if !keep_scanning {
                break;
            }
        }
    }

    if matched {
        Some(scanner.report)
    } else {
        None
    }
}

/// Evaluates `table` against `buf`, returning the fragments of every
/// matching rule, or `None` when no entry matched.
///
/// Without `keep_scanning` the scan stops after the first entry whose
/// level-0 rule matched.
pub fn scan(table: &MagicTable, buf: &[u8], keep_scanning: bool) -> Option<Report> {
    scan_with_budget(table, buf, keep_scanning, MAX_EVALUATIONS)
}

/// Identifies `buf` and joins the matching descriptions.
pub fn identify(table: &MagicTable, buf: &[u8], keep_scanning: bool) -> Match {
    match scan(table, buf, keep_scanning) {
        Some(report) => Match::Described(report.description()),
        None => Match::NoMatch,
    }
}

/// MIME annotation of the first entry that matches `buf`, if it has one.
pub fn identify_mime(table: &MagicTable, buf: &[u8]) -> Option<Mime> {
    scan(table, buf, false).and_then(|report| report.mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(s: &[u8]) -> Window<'_> {
        Window::new(s, 0)
    }

    #[test]
    fn compact_blank() {
        let blank = StringFlags::COMPACT_BLANK;
        let optional = StringFlags::COMPACT_OPTIONAL_BLANK;
        assert_eq!(compare_string(b"a b", blank, w(b"a    b")), Some(6));
        assert_eq!(compare_string(b"a b", blank, w(b"ab")), None);
        assert_eq!(compare_string(b"a b", optional, w(b"ab")), Some(2));
        assert_eq!(compare_string(b"a b", optional, w(b"a \t b")), Some(5));
    }

    #[test]
    fn ignore_case_only_widens_lowercase_pattern_letters() {
        assert_eq!(compare_string(b"html", StringFlags::IGNORE_CASE, w(b"HTML")), Some(4));
        assert_eq!(compare_string(b"HTML", StringFlags::IGNORE_CASE, w(b"html")), None);
        assert_eq!(compare_string(b"html", StringFlags::empty(), w(b"HTML")), None);
    }

    #[test]
    fn strings_past_the_end_compare_against_zeros() {
        assert_eq!(compare_string(b"\0\0", StringFlags::empty(), Window::new(b"", 10)), Some(2));
        assert_eq!(compare_string(b"ab", StringFlags::empty(), Window::new(b"xa", 1)), None);
    }

    #[test]
    fn joined_description() {
        let report = Report {
            fragments: vec![
                Fragment {
                    text: "ELF".into(),
                    no_leading_space: false,
                },
                Fragment {
                    text: String::new(),
                    no_leading_space: false,
                },
                Fragment {
                    text: "64-bit".into(),
                    no_leading_space: false,
                },
                Fragment {
                    text: ", LSB".into(),
                    no_leading_space: true,
                },
            ],
            mime: None,
            evaluations: 4,
        };
        assert_eq!(report.description(), "ELF 64-bit, LSB");
    }
}
