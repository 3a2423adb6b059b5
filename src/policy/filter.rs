use std::collections::HashSet;

use regex::Regex;

use crate::crd::TagFilter;
use crate::error::{Error, Result};

/// A tag that survived filtering, with the key it is ordered by
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub tag: String,
}

/// Keeps tags matching a pattern and derives their ordering key
///
/// The key is the `extract` template expanded against the match. Without a
/// template, the first named capture group is used when the pattern has one,
/// otherwise the whole tag.
#[derive(Clone, Debug)]
pub struct RegexFilter {
    regex: Regex,
    template: Option<String>,
}

impl RegexFilter {
    pub fn new(filter: &TagFilter) -> Result<Self> {
        let regex = Regex::new(&filter.pattern).map_err(|source| Error::InvalidPattern {
            pattern: filter.pattern.clone(),
            source,
        })?;

        let template = match filter.extract.as_deref().filter(|e| !e.is_empty()) {
            Some(extract) => Some(extract.to_string()),
            None => regex
                .capture_names()
                .flatten()
                .next()
                .map(|name| format!("${{{name}}}")),
        };

        Ok(Self { regex, template })
    }

    /// Matching tags in input order; a key seen twice keeps its first tag
    pub fn apply(&self, tags: &[String]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for tag in tags {
            let Some(captures) = self.regex.captures(tag) else {
                continue;
            };
            let key = match &self.template {
                Some(template) => {
                    let mut key = String::new();
                    captures.expand(template, &mut key);
                    key
                }
                None => tag.clone(),
            };
            if !seen.insert(key.clone()) {
                continue;
            }
            candidates.push(Candidate {
                key,
                tag: tag.clone(),
            });
        }
        candidates
    }
}

/// Every tag as its own key, duplicates dropped
pub fn unfiltered(tags: &[String]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::with_capacity(tags.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(tags.len());
    for tag in tags {
        if seen.insert(tag.as_str()) {
            candidates.push(Candidate {
                key: tag.clone(),
                tag: tag.clone(),
            });
        }
    }
    candidates
}
