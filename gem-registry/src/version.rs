//! RubyGems version ordering and requirement matching.
//!
//! Versions are split into segments at dots and at every boundary between
//! digits and letters, so `1.0.0.rc1` becomes `[1, 0, 0, "rc", 1]`. Letter
//! segments sort before numbers, which is what makes `1.0.a` a prerelease of
//! `1.0`. Trailing zero segments do not affect ordering.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{AppError, AppResult};

/// Numeric segments keep their digits with leading zeros stripped, so
/// arbitrarily long numbers still compare by value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(String),
    Str(String),
}

impl Segment {
    fn zero() -> Self {
        Segment::Num("0".to_string())
    }

    fn cmp_segment(&self, other: &Segment) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Segment::Str(a), Segment::Str(b)) => a.cmp(b),
            (Segment::Str(_), Segment::Num(_)) => Ordering::Less,
            (Segment::Num(_), Segment::Str(_)) => Ordering::Greater,
        }
    }
}

/// A parsed gem version.
#[derive(Debug, Clone)]
pub struct GemVersion {
    original: String,
    segments: Vec<Segment>,
}

impl GemVersion {
    pub fn parse(input: &str) -> AppResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AppError::BadRequest("empty version string".to_string()));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(AppError::BadRequest(format!(
                "malformed version string: {trimmed}"
            )));
        }
        // RubyGems treats "-" as ".pre."
        let normalized = trimmed.replace('-', ".pre.");

        let mut segments = Vec::new();
        for part in normalized.split('.').filter(|p| !p.is_empty()) {
            let mut current = String::new();
            let mut current_is_digit = None;
            for c in part.chars() {
                let is_digit = c.is_ascii_digit();
                if current_is_digit.is_some_and(|d| d != is_digit) {
                    segments.push(to_segment(&current));
                    current.clear();
                }
                current_is_digit = Some(is_digit);
                current.push(c);
            }
            if !current.is_empty() {
                segments.push(to_segment(&current));
            }
        }

        Ok(Self {
            original: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_prerelease(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Str(_)))
    }

    /// The release this version is a prerelease of, or itself.
    fn release(&self) -> GemVersion {
        let segments: Vec<Segment> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Num(_)))
            .cloned()
            .collect();
        GemVersion {
            original: self.original.clone(),
            segments,
        }
    }

    /// Upper bound used by `~>`: drop the last segment and bump the new last.
    fn bump(&self) -> GemVersion {
        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Num(_)))
            .cloned()
            .collect();
        if segments.len() > 1 {
            segments.pop();
        }
        if let Some(Segment::Num(n)) = segments.last_mut() {
            *n = increment(n);
        }
        GemVersion {
            original: self.original.clone(),
            segments,
        }
    }

    fn canonical(&self) -> &[Segment] {
        let mut end = self.segments.len();
        while end > 0 && self.segments[end - 1] == Segment::zero() {
            end -= 1;
        }
        &self.segments[..end]
    }
}

fn to_segment(raw: &str) -> Segment {
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let digits = raw.trim_start_matches('0');
        if digits.is_empty() {
            Segment::zero()
        } else {
            Segment::Num(digits.to_string())
        }
    } else {
        Segment::Str(raw.to_string())
    }
}

/// Add one to a decimal digit string.
fn increment(digits: &str) -> String {
    let mut out: Vec<u8> = digits.bytes().collect();
    for b in out.iter_mut().rev() {
        if *b == b'9' {
            *b = b'0';
        } else {
            *b += 1;
            return out.into_iter().map(char::from).collect();
        }
    }
    out.insert(0, b'1');
    out.into_iter().map(char::from).collect()
}

impl fmt::Display for GemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl Ord for GemVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = &self.segments;
        let b = &other.segments;
        let zero = Segment::zero();
        let len = a.len().max(b.len());
        for i in 0..len {
            let left = a.get(i).unwrap_or(&zero);
            let right = b.get(i).unwrap_or(&zero);
            match left.cmp_segment(right) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for GemVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GemVersion {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for GemVersion {}

/// Compare two raw version strings, falling back to byte order when either
/// does not parse.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (GemVersion::parse(a), GemVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Pessimistic,
}

#[derive(Debug, Clone)]
struct Constraint {
    op: Op,
    version: GemVersion,
}

impl Constraint {
    fn parse(input: &str) -> AppResult<Self> {
        let s = input.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix("~>") {
            (Op::Pessimistic, rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (Op::Ge, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (Op::Le, rest)
        } else if let Some(rest) = s.strip_prefix("!=") {
            (Op::Ne, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (Op::Gt, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (Op::Lt, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (Op::Eq, rest)
        } else {
            (Op::Eq, s)
        };
        Ok(Self {
            op,
            version: GemVersion::parse(rest)?,
        })
    }

    fn matches(&self, v: &GemVersion) -> bool {
        match self.op {
            Op::Eq => v == &self.version,
            Op::Ne => v != &self.version,
            Op::Gt => v > &self.version,
            Op::Lt => v < &self.version,
            Op::Ge => v >= &self.version,
            Op::Le => v <= &self.version,
            Op::Pessimistic => v >= &self.version && v.release() < self.version.bump(),
        }
    }
}

/// A comma-separated set of constraints that must all hold, e.g. `">= 1.2, < 2"`.
#[derive(Debug, Clone)]
pub struct Requirement {
    constraints: Vec<Constraint>,
}

impl Requirement {
    pub fn parse(input: &str) -> AppResult<Self> {
        let constraints = input
            .split(',')
            .filter(|c| !c.trim().is_empty())
            .map(Constraint::parse)
            .collect::<AppResult<Vec<_>>>()?;
        if constraints.is_empty() {
            return Err(AppError::BadRequest(format!("empty requirement: {input:?}")));
        }
        Ok(Self { constraints })
    }

    pub fn is_satisfied_by(&self, version: &GemVersion) -> bool {
        self.constraints.iter().all(|c| c.matches(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> GemVersion {
        GemVersion::parse(s).unwrap()
    }

    fn satisfies(req: &str, version: &str) -> bool {
        Requirement::parse(req).unwrap().is_satisfied_by(&v(version))
    }

    #[test]
    fn test_numeric_ordering_beats_string_ordering() {
        assert!(v("10.0.0") > v("9.0.0"));
        assert!(v("1.10") > v("1.9"));
        assert_eq!(compare_versions("10.0.0", "9.0.0"), Ordering::Greater);
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("1.0.0.rc1") < v("1.0.0"));
        assert!(v("1.0.0.beta") < v("1.0.0.rc1"));
        assert!(v("1.0.0.rc1").is_prerelease());
        assert!(!v("1.0.0").is_prerelease());
        assert!(v("2.0.0-pre").is_prerelease());
    }

    #[test]
    fn test_trailing_zeros_are_equal() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1.0").cmp(&v("1.0.0")), Ordering::Equal);
    }

    #[test]
    fn test_pessimistic_operator() {
        assert!(satisfies("~> 2.3.1", "2.3.5"));
        assert!(!satisfies("~> 2.3.1", "2.4.0"));
        assert!(satisfies("~> 2.3", "2.9"));
        assert!(!satisfies("~> 2.3", "3.0"));
        assert!(!satisfies("~> 2.3", "2.2"));
    }

    #[test]
    fn test_compound_requirement() {
        assert!(satisfies(">= 1.2.0, < 1.3", "1.2.7"));
        assert!(!satisfies(">= 1.2.0, < 1.3", "1.3.0"));
        assert!(satisfies("1.0", "1.0.0"));
        assert!(satisfies("!= 1.0", "1.1"));
    }

    #[test]
    fn test_long_numeric_segments_stay_numeric() {
        let huge = "1.99999999999999999999999";
        assert!(!v(huge).is_prerelease());
        assert!(v("1.100000000000000000000000") > v(huge));
        assert!(v(huge) > v("1.18446744073709551615"));
        assert_eq!(v("1.007"), v("1.7"));
        assert!(satisfies("~> 1.99999999999999999999999", "1.99999999999999999999999.5"));
        assert!(!satisfies("~> 1.99999999999999999999999", "2.0"));
        assert_eq!(increment("999"), "1000");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(GemVersion::parse("").is_err());
        assert!(GemVersion::parse("1.0; rm -rf").is_err());
        assert!(Requirement::parse("  ").is_err());
    }
}
