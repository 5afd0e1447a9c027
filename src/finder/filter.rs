//! Entry selection
//!
//! This module provides the name matchers, the type mask, the value
//! predicates (time window, ownership, size) and the directory exclusion
//! rules used while walking.

use std::str::FromStr;

use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};

use super::fs::{EntryKind, EntryMetadata};
use crate::errors::{ScanError, ScanResult};

/// Trait for name matchers
///
/// The candidate is either an entry's bare name or its full path,
/// depending on [`MatchTarget`].
pub trait MatchPredicate: Send + Sync {
    /// Check if the candidate matches
    fn matches(&self, candidate: &str) -> bool;

    /// Get the matcher description
    fn description(&self) -> String;
}

/// What a matcher is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchTarget {
    /// The last path element only
    #[default]
    Name,
    /// The whole path, with `/` treated as an ordinary character
    FullPath,
}

/// Split a leading `!` off a pattern
pub fn split_negation(pattern: &str) -> ScanResult<(bool, &str)> {
    match pattern.strip_prefix('!') {
        Some("") => Err(ScanError::PatternError {
            message: "Need a pattern after '!'".to_string(),
        }),
        Some(rest) => Ok((true, rest)),
        None => Ok((false, pattern)),
    }
}

/// Factory for building the matcher from command line arguments
pub struct FilterFactory;

impl FilterFactory {
    /// Build the matcher. A substring pattern wins over a regex, and a regex
    /// over glob patterns. Substring and regex patterns may start with `!`.
    /// `ignore_case` applies to regex and glob patterns; substrings always
    /// ignore ASCII case.
    pub fn create_matcher(
        substring: Option<&str>,
        regex: Option<&str>,
        ignore_case: bool,
        globs: &[String],
    ) -> ScanResult<Box<dyn MatchPredicate>> {
        if let Some(pattern) = substring {
            let (negate, pattern) = split_negation(pattern)?;
            return Ok(Self::maybe_negated(Box::new(SubstringMatcher::new(pattern)?), negate));
        }

        if let Some(pattern) = regex {
            let (negate, pattern) = split_negation(pattern)?;
            let matcher = RegexMatcher::new(pattern, ignore_case)?;
            return Ok(Self::maybe_negated(Box::new(matcher), negate));
        }

        if !globs.is_empty() {
            return Ok(Box::new(MultiNameFilter::new(globs, ignore_case)?));
        }

        Ok(Box::new(MatchAll))
    }

    fn maybe_negated(matcher: Box<dyn MatchPredicate>, negate: bool) -> Box<dyn MatchPredicate> {
        if negate {
            Box::new(Negated::new(matcher))
        } else {
            matcher
        }
    }
}

/// Matches everything
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl MatchPredicate for MatchAll {
    fn matches(&self, _candidate: &str) -> bool {
        true
    }

    fn description(&self) -> String {
        "matches everything".to_string()
    }
}

/// Case-insensitive substring match, ASCII only
///
/// Equivalent to the shell pattern `*needle*` with case folded.
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
    needle: String,
}

impl SubstringMatcher {
    pub fn new(needle: &str) -> ScanResult<Self> {
        if !needle.is_ascii() {
            return Err(ScanError::PatternError {
                message: format!(
                    "Only pure ASCII characters supported for substring pattern '{}', use a regex instead",
                    needle
                ),
            });
        }
        Ok(Self {
            needle: needle.to_ascii_lowercase(),
        })
    }
}

impl MatchPredicate for SubstringMatcher {
    fn matches(&self, candidate: &str) -> bool {
        let needle = self.needle.as_bytes();
        if needle.is_empty() {
            return true;
        }
        candidate
            .as_bytes()
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
    }

    fn description(&self) -> String {
        format!("name contains '{}' (ignore case)", self.needle)
    }
}

/// Extended regular expression, matched anywhere in the candidate
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    ignore_case: bool,
}

impl RegexMatcher {
    pub fn new(pattern: &str, ignore_case: bool) -> ScanResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| ScanError::PatternError {
                message: format!("Invalid regex '{}': {}", pattern, e),
            })?;
        Ok(Self { regex, ignore_case })
    }
}

impl MatchPredicate for RegexMatcher {
    fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    fn description(&self) -> String {
        if self.ignore_case {
            format!("name matches /{}/ (ignore case)", self.regex.as_str())
        } else {
            format!("name matches /{}/", self.regex.as_str())
        }
    }
}

/// Inverts another matcher
pub struct Negated {
    inner: Box<dyn MatchPredicate>,
}

impl Negated {
    pub fn new(inner: Box<dyn MatchPredicate>) -> Self {
        Self { inner }
    }
}

impl MatchPredicate for Negated {
    fn matches(&self, candidate: &str) -> bool {
        !self.inner.matches(candidate)
    }

    fn description(&self) -> String {
        format!("not ({})", self.inner.description())
    }
}

/// Filter for matching file names against a shell glob
pub struct NameFilter {
    pattern: Pattern,
    original_pattern: String,
    ignore_case: bool,
}

impl NameFilter {
    /// Create a new NameFilter with the given pattern
    pub fn new(pattern: &str) -> ScanResult<Self> {
        let compiled_pattern = Pattern::new(pattern).map_err(|e| ScanError::PatternError {
            message: format!("Invalid pattern '{}': {}", pattern, e),
        })?;

        Ok(Self {
            pattern: compiled_pattern,
            original_pattern: pattern.to_string(),
            ignore_case: false,
        })
    }

    /// Create a new case-insensitive NameFilter
    pub fn new_ignore_case(pattern: &str) -> ScanResult<Self> {
        let mut filter = Self::new(pattern)?;
        filter.ignore_case = true;
        Ok(filter)
    }
}

impl MatchPredicate for NameFilter {
    fn matches(&self, candidate: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: !self.ignore_case,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.pattern.matches_with(candidate, options)
    }

    fn description(&self) -> String {
        if self.ignore_case {
            format!("name (ignore case) matches '{}'", self.original_pattern)
        } else {
            format!("name matches '{}'", self.original_pattern)
        }
    }
}

/// Filter for matching file names against multiple globs
pub struct MultiNameFilter {
    patterns: Vec<NameFilter>,
}

impl MultiNameFilter {
    /// Create a new MultiNameFilter with the given patterns
    pub fn new(patterns: &[String], ignore_case: bool) -> ScanResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                if ignore_case {
                    NameFilter::new_ignore_case(p)
                } else {
                    NameFilter::new(p)
                }
            })
            .collect::<ScanResult<Vec<_>>>()?;

        Ok(Self { patterns })
    }
}

impl MatchPredicate for MultiNameFilter {
    fn matches(&self, candidate: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        self.patterns.iter().any(|filter| filter.matches(candidate))
    }

    fn description(&self) -> String {
        let patterns: Vec<&str> = self
            .patterns
            .iter()
            .map(|p| p.original_pattern.as_str())
            .collect();

        format!("name matches any of [{}]", patterns.join(", "))
    }
}

/// Set of accepted entry kinds; the empty mask accepts every kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeMask(u8);

impl TypeMask {
    pub const FILE: TypeMask = TypeMask(1);
    pub const DIRECTORY: TypeMask = TypeMask(1 << 1);
    pub const SYMLINK: TypeMask = TypeMask(1 << 2);
    pub const BLOCK_DEVICE: TypeMask = TypeMask(1 << 3);
    pub const CHAR_DEVICE: TypeMask = TypeMask(1 << 4);
    pub const FIFO: TypeMask = TypeMask(1 << 5);
    pub const SOCKET: TypeMask = TypeMask(1 << 6);

    pub fn empty() -> Self {
        TypeMask(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn with(self, other: TypeMask) -> Self {
        TypeMask(self.0 | other.0)
    }

    pub fn contains(self, other: TypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse type codes like `f`, `d,l` or `fd`
    ///
    /// f: file, d: directory, l: symlink, b: block device,
    /// c: character device, p: fifo, s: socket
    pub fn parse(codes: &str) -> ScanResult<Self> {
        let mut mask = TypeMask::empty();
        for code in codes.chars().filter(|c| *c != ',' && !c.is_whitespace()) {
            let bit = match code {
                'f' => TypeMask::FILE,
                'd' => TypeMask::DIRECTORY,
                'l' => TypeMask::SYMLINK,
                'b' => TypeMask::BLOCK_DEVICE,
                'c' => TypeMask::CHAR_DEVICE,
                'p' => TypeMask::FIFO,
                's' => TypeMask::SOCKET,
                other => return Err(ScanError::InvalidFileType(other.to_string())),
            };
            mask = mask.with(bit);
        }
        if mask.is_empty() {
            return Err(ScanError::InvalidFileType(codes.to_string()));
        }
        Ok(mask)
    }

    /// Entries of unknown kind only pass the empty mask
    pub fn accepts(self, kind: EntryKind) -> bool {
        if self.is_empty() {
            return true;
        }
        let bit = match kind {
            EntryKind::File => TypeMask::FILE,
            EntryKind::Directory => TypeMask::DIRECTORY,
            EntryKind::Symlink => TypeMask::SYMLINK,
            EntryKind::BlockDevice => TypeMask::BLOCK_DEVICE,
            EntryKind::CharDevice => TypeMask::CHAR_DEVICE,
            EntryKind::Fifo => TypeMask::FIFO,
            EntryKind::Socket => TypeMask::SOCKET,
            EntryKind::Unknown => return false,
        };
        self.contains(bit)
    }
}

/// Size selection, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFilter {
    Exact(u64),
    AtLeast(u64),
    AtMost(u64),
    Between(u64, u64),
}

impl SizeFilter {
    pub fn accepts(&self, size: u64) -> bool {
        match *self {
            SizeFilter::Exact(n) => size == n,
            SizeFilter::AtLeast(n) => size >= n,
            SizeFilter::AtMost(n) => size <= n,
            SizeFilter::Between(lo, hi) => size >= lo && size <= hi,
        }
    }
}

fn parse_size_value(spec: &str, value: &str) -> ScanResult<u64> {
    let invalid = |reason: &str| ScanError::InvalidSize {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let (digits, factor) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let factor: u64 = match c.to_ascii_lowercase() {
                'k' => 1 << 10,
                'm' => 1 << 20,
                'g' => 1 << 30,
                't' => 1 << 40,
                _ => return Err(invalid("unit must be one of k/m/g/t")),
            };
            (&value[..idx], factor)
        }
        _ => (value, 1),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected digits, optionally followed by k/m/g/t"));
    }
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(factor))
        .ok_or_else(|| invalid("value out of range"))
}

impl FromStr for SizeFilter {
    type Err = ScanError;

    /// `N`, `+N`, `-N` or `+LOW:-HIGH`, each value optionally suffixed
    /// with k, m, g or t (powers of 1024)
    fn from_str(spec: &str) -> ScanResult<Self> {
        let invalid = |reason: &str| ScanError::InvalidSize {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        if let Some((low, high)) = spec.split_once(':') {
            let low = low
                .strip_prefix('+')
                .ok_or_else(|| invalid("the lower bound of an interval must start with '+'"))?;
            let high = high
                .strip_prefix('-')
                .ok_or_else(|| invalid("the upper bound of an interval must start with '-'"))?;
            let low = parse_size_value(spec, low)?;
            let high = parse_size_value(spec, high)?;
            if low > high {
                return Err(invalid("the lower bound exceeds the upper bound"));
            }
            return Ok(SizeFilter::Between(low, high));
        }

        if let Some(rest) = spec.strip_prefix('+') {
            Ok(SizeFilter::AtLeast(parse_size_value(spec, rest)?))
        } else if let Some(rest) = spec.strip_prefix('-') {
            Ok(SizeFilter::AtMost(parse_size_value(spec, rest)?))
        } else {
            Ok(SizeFilter::Exact(parse_size_value(spec, spec)?))
        }
    }
}

/// Which timestamp a [`TimeWindow`] looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeField {
    #[default]
    Modified,
    Accessed,
}

/// Accept entries older than, younger than, or strictly between two
/// instants (seconds since the epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub field: TimeField,
    older_than: Option<i64>,
    younger_than: Option<i64>,
}

impl TimeWindow {
    pub fn new(field: TimeField, older_than: Option<i64>, younger_than: Option<i64>) -> ScanResult<Self> {
        if let (Some(older), Some(younger)) = (older_than, younger_than) {
            if older <= younger {
                return Err(ScanError::InvalidOption(format!(
                    "the 'older than' instant ({}) must be later than the 'younger than' instant ({})",
                    older, younger
                )));
            }
        }
        Ok(Self {
            field,
            older_than,
            younger_than,
        })
    }

    pub fn older_than(&self) -> Option<i64> {
        self.older_than
    }

    pub fn younger_than(&self) -> Option<i64> {
        self.younger_than
    }

    pub fn is_active(&self) -> bool {
        self.older_than.is_some() || self.younger_than.is_some()
    }

    pub fn accepts_time(&self, t: i64) -> bool {
        self.older_than.map_or(true, |older| t < older)
            && self.younger_than.map_or(true, |younger| t > younger)
    }

    pub fn accepts(&self, meta: &EntryMetadata) -> bool {
        match self.field {
            TimeField::Modified => self.accepts_time(meta.mtime),
            TimeField::Accessed => self.accepts_time(meta.atime),
        }
    }
}

/// A list of numeric ids, matched positively or negatively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdClause {
    pub ids: Vec<u32>,
    pub negated: bool,
}

impl IdClause {
    pub fn accepts(&self, id: u32) -> bool {
        self.ids.contains(&id) != self.negated
    }
}

/// Ownership selection; the uid and gid clauses are OR-ed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerFilter {
    pub uid: Option<IdClause>,
    pub gid: Option<IdClause>,
}

impl OwnerFilter {
    pub fn is_active(&self) -> bool {
        self.uid.is_some() || self.gid.is_some()
    }

    pub fn accepts(&self, uid: u32, gid: u32) -> bool {
        if !self.is_active() {
            return true;
        }
        self.uid.as_ref().map_or(false, |c| c.accepts(uid))
            || self.gid.as_ref().map_or(false, |c| c.accepts(gid))
    }
}

/// All metadata-based predicates; every active one must hold
#[derive(Debug, Clone, Default)]
pub struct ValuePredicates {
    pub time: Option<TimeWindow>,
    pub owner: OwnerFilter,
    pub size: Option<SizeFilter>,
}

impl ValuePredicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time(mut self, time: TimeWindow) -> Self {
        self.time = Some(time).filter(TimeWindow::is_active);
        self
    }

    pub fn with_owner(mut self, owner: OwnerFilter) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_size(mut self, size: SizeFilter) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_active(&self) -> bool {
        self.time.is_some() || self.owner.is_active() || self.size.is_some()
    }

    /// Inactive predicates accept anything; active ones reject an entry
    /// whose metadata could not be fetched
    pub fn accepts(&self, meta: Option<&EntryMetadata>) -> bool {
        if !self.is_active() {
            return true;
        }
        let Some(meta) = meta else {
            return false;
        };
        self.time.map_or(true, |t| t.accepts(meta))
            && self.owner.accepts(meta.uid, meta.gid)
            && self.size.map_or(true, |s| s.accepts(meta.size))
    }
}

/// A directory that must not be descended
#[derive(Debug, Clone)]
pub enum ExcludeRule {
    /// Exact directory name
    Exact(String),
    /// Regex matched anywhere in the directory name
    Pattern(Regex),
}

impl ExcludeRule {
    pub fn exact(name: impl Into<String>) -> Self {
        ExcludeRule::Exact(name.into())
    }

    pub fn pattern(pattern: &str) -> ScanResult<Self> {
        Regex::new(pattern)
            .map(ExcludeRule::Pattern)
            .map_err(|e| ScanError::PatternError {
                message: format!("Invalid exclude pattern '{}': {}", pattern, e),
            })
    }

    /// NAS snapshot directories
    pub fn snapshot() -> Self {
        Self::exact(".snapshot")
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ExcludeRule::Exact(exact) => exact == name,
            ExcludeRule::Pattern(regex) => regex.is_match(name),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ExcludeRule::Exact(exact) => exact.clone(),
            ExcludeRule::Pattern(regex) => format!("/{}/", regex.as_str()),
        }
    }
}
