//! Tag ordering strategies
//!
//! Each strategy decides which keys it understands (dropping the rest) and
//! which of the remaining keys counts as the latest.

use std::cmp::Ordering;

use semver::{Version, VersionReq};

use crate::crd::{ImagePolicyChoice, SortOrder};
use crate::error::{Error, Result};

/// One `||` alternative of a version range
#[derive(Clone, Debug)]
struct RangeAlternative {
    requirement: VersionReq,
    excluded: Vec<Version>,
}

impl RangeAlternative {
    fn matches(&self, version: &Version) -> bool {
        self.requirement.matches(version) && !self.excluded.iter().any(|v| v == version)
    }
}

/// A version range such as `>=1.0.0 <2.0.0 || ^3.1`
#[derive(Clone, Debug)]
pub struct VersionRange {
    alternatives: Vec<RangeAlternative>,
}

impl VersionRange {
    /// Accepts comparators separated by spaces or commas (all must hold),
    /// `||` between alternatives, hyphen ranges `1.0 - 2.0`, `!=` exclusions
    /// and bare versions meaning `=`.
    pub fn parse(range: &str) -> Result<Self> {
        let invalid = |message: String| {
            Error::InvalidPolicy(format!("invalid semver range {range:?}: {message}"))
        };

        let mut alternatives = Vec::new();
        for alternative in range.split("||") {
            let mut comparators = Vec::new();
            let mut excluded = Vec::new();

            for token in tokenize(alternative) {
                if let Some(version) = token.strip_prefix("!=") {
                    let version = parse_version(version)
                        .ok_or_else(|| invalid(format!("bad version {version:?}")))?;
                    excluded.push(version);
                } else {
                    comparators.push(normalise_comparator(&token));
                }
            }

            let requirement = if comparators.is_empty() {
                VersionReq::STAR
            } else {
                VersionReq::parse(&comparators.join(", ")).map_err(|e| invalid(e.to_string()))?
            };
            alternatives.push(RangeAlternative {
                requirement,
                excluded,
            });
        }

        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|a| a.matches(version))
    }
}

/// Split one alternative into comparator tokens, expanding hyphen ranges
fn tokenize(alternative: &str) -> Vec<String> {
    let words: Vec<&str> = alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .collect();

    let mut tokens = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        if i + 2 < words.len() && words[i + 1] == "-" {
            tokens.push(format!(">={}", strip_v(word)));
            tokens.push(format!("<={}", strip_v(words[i + 2])));
            i += 3;
            continue;
        }
        // an operator written apart from its version, e.g. ">= 1.0"
        let operator_only = word
            .chars()
            .all(|c| matches!(c, '<' | '>' | '=' | '~' | '^' | '!'));
        if operator_only && i + 1 < words.len() {
            tokens.push(format!("{word}{}", words[i + 1]));
            i += 2;
            continue;
        }
        tokens.push(word.to_string());
        i += 1;
    }
    tokens
}

fn strip_v(s: &str) -> &str {
    s.strip_prefix(['v', 'V']).unwrap_or(s)
}

fn normalise_comparator(token: &str) -> String {
    let op_len = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(op_len);
    let version = strip_v(version);
    let is_wildcard = version == "*" || version.split('.').any(|p| matches!(p, "*" | "x" | "X"));
    match op {
        "" if is_wildcard => version.to_string(),
        "" => format!("={version}"),
        "==" => format!("={version}"),
        "~>" => format!("~{version}"),
        _ => format!("{op}{version}"),
    }
}

/// Lenient semantic version parsing: a leading `v` and missing minor or patch are accepted
pub fn parse_version(s: &str) -> Option<Version> {
    let s = strip_v(s.trim());
    if let Ok(version) = Version::parse(s) {
        return Some(version);
    }

    let split_at = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(split_at);
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// Picks the latest key under one ordering strategy
#[derive(Clone, Debug)]
pub enum Policer {
    SemVer { range: Option<VersionRange> },
    Alphabetical { order: SortOrder },
    Numerical { order: SortOrder },
}

impl Policer {
    pub fn from_choice(choice: &ImagePolicyChoice) -> Result<Self> {
        Ok(match choice {
            ImagePolicyChoice::Semver(semver) => Policer::SemVer {
                range: semver
                    .range
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(VersionRange::parse)
                    .transpose()?,
            },
            ImagePolicyChoice::Alphabetical(alpha) => Policer::Alphabetical { order: alpha.order },
            ImagePolicyChoice::Numerical(num) => Policer::Numerical { order: num.order },
        })
    }

    /// The latest key, or `None` when no key qualifies
    ///
    /// On equal ranks the first key wins.
    pub fn latest<'a, I>(&self, keys: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self {
            Policer::SemVer { range } => {
                let admitted = keys.into_iter().filter_map(|key| {
                    let version = parse_version(key)?;
                    let ok = match range {
                        Some(range) => range.matches(&version),
                        None => version.pre.is_empty(),
                    };
                    ok.then_some((key, version))
                });
                first_max(admitted, |a, b| a.cmp_precedence(b)).map(|(key, _)| key)
            }
            Policer::Alphabetical { order } => {
                let ranked = keys.into_iter().map(|key| (key, key));
                pick(ranked, *order, |a, b| a.cmp(b))
            }
            Policer::Numerical { order } => {
                let ranked = keys
                    .into_iter()
                    .filter_map(|key| key.trim().parse::<i64>().ok().map(|n| (key, n)));
                pick(ranked, *order, |a, b| a.cmp(b))
            }
        }
    }
}

fn pick<'a, T>(
    ranked: impl Iterator<Item = (&'a str, T)>,
    order: SortOrder,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Option<&'a str> {
    match order {
        SortOrder::Asc => first_max(ranked, cmp).map(|(key, _)| key),
        SortOrder::Desc => first_max(ranked, |a, b| cmp(b, a)).map(|(key, _)| key),
    }
}

/// Maximum by `cmp`, keeping the earliest element among equals
fn first_max<K, T>(
    items: impl Iterator<Item = (K, T)>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Option<(K, T)> {
    items.fold(None, |best, item| match best {
        Some(best) if cmp(&item.1, &best.1) != Ordering::Greater => Some(best),
        _ => Some(item),
    })
}
