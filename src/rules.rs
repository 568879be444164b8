//! Sender-matching forwarding rules.
//!
//! A [`RuleSet`] is built once from configuration and never changes afterwards.
//! Every rule is evaluated for every message: a sender matching three rules gets
//! forwarded to the targets of all three, in configuration order.

use crate::config::RuleConfig;

/// Sender pattern of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches any sender. Written as `""` or `"*"` in configuration.
    Any,
    /// Matches one sender identifier exactly (case-sensitive, no normalization).
    Exact(String),
}

impl Pattern {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" | "*" => Pattern::Any,
            other => Pattern::Exact(other.to_string()),
        }
    }

    pub fn matches(&self, sender: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => expected == sender,
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Any => write!(f, "*"),
            Pattern::Exact(s) => write!(f, "{}", s),
        }
    }
}

/// One sender pattern mapped to an ordered list of destinations.
///
/// `targets` may be empty; such a rule matches but forwards nowhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pattern: Pattern,
    targets: Vec<String>,
}

impl Rule {
    pub fn new(pattern: &str, targets: Vec<String>) -> Self {
        Self {
            pattern: Pattern::parse(pattern),
            targets,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn matches(&self, sender: &str) -> bool {
        self.pattern.matches(sender)
    }
}

/// Ordered collection of rules; insertion order is evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn from_config(rules: &[RuleConfig]) -> Self {
        Self::new(
            rules
                .iter()
                .map(|r| Rule::new(&r.pattern, r.out_numbers.clone()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Rules whose pattern accepts `sender`, in configuration order.
    pub fn matching_rules<'a>(&'a self, sender: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.matches(sender))
    }

    /// Destinations `sender` forwards to: the concatenated targets of every
    /// matching rule. Duplicates across rules are kept.
    pub fn match_sender(&self, sender: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.matches(sender))
            .flat_map(|r| r.targets.iter().map(String::as_str))
            .collect()
    }
}
