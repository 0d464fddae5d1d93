//! Topic include/exclude selection.
//!
//! Patterns are globs (`*`, `?`) or regexes when prefixed with `~`. A pattern
//! matches if it matches either the fully-qualified topic name
//! (`persistent://t1/ns1/orders`) or its short form (`t1/ns1/orders`).

use regex::Regex;

use crate::config::TopicSelection;
use crate::inventory::TopicName;
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum Pattern {
    Glob(Vec<char>),
    Regex(Regex),
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self> {
        match pattern.strip_prefix('~') {
            Some(expr) => Regex::new(expr)
                .map(Pattern::Regex)
                .map_err(|e| Error::Config(format!("Invalid topic regex {:?}: {}", pattern, e))),
            None => Ok(Pattern::Glob(pattern.chars().collect())),
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Pattern::Glob(pattern) => glob_match(pattern, &text.chars().collect::<Vec<_>>()),
            Pattern::Regex(re) => re.is_match(text),
        }
    }
}

/// Compiled topic selection
#[derive(Debug, Clone, Default)]
pub struct TopicFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl TopicFilter {
    /// Compile a selection; an invalid regex is a configuration error
    pub fn new(selection: &TopicSelection) -> Result<Self> {
        Ok(Self {
            include: selection
                .include
                .iter()
                .map(|p| Pattern::parse(p))
                .collect::<Result<_>>()?,
            exclude: selection
                .exclude
                .iter()
                .map(|p| Pattern::parse(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Filter that selects every topic
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether a topic is selected: included (or no includes) and not excluded
    pub fn matches(&self, topic: &str) -> bool {
        let short = TopicName::parse(topic)
            .map(|t| format!("{}/{}", t.namespace_path(), t.local))
            .unwrap_or_else(|_| topic.to_string());
        let hit = |p: &Pattern| p.is_match(topic) || p.is_match(&short);

        let included = self.include.is_empty() || self.include.iter().any(hit);
        included && !self.exclude.iter().any(hit)
    }
}

/// Glob match with `*` (any run) and `?` (one character)
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
