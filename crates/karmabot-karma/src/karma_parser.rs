//! Karma token scanning and target resolution.

use std::sync::OnceLock;

use karmabot_slack_runtime::SlackUser;
use regex::Regex;
use thiserror::Error;

const KARMA_TOKEN_PATTERN: &str = r"(<@U[0-9A-Z]{8}>|\b\w+)((?:\+\+|--)+)";
const MENTION_PATTERN: &str = r"^<@(U[0-9A-Z]{8})>$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KarmaDelta {
    Increment,
    Decrement,
}

impl KarmaDelta {
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "++" => Some(Self::Increment),
            "--" => Some(Self::Decrement),
            _ => None,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Increment => "++",
            Self::Decrement => "--",
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            Self::Increment => 1,
            Self::Decrement => -1,
        }
    }
}

pub fn net_delta(deltas: &[KarmaDelta]) -> i64 {
    deltas.iter().map(KarmaDelta::value).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KarmaTarget {
    /// `<@U12345678>`; carries the bare user id.
    Mention(String),
    /// A plain name that has to be looked up in the team roster.
    Name(String),
}

impl KarmaTarget {
    pub fn needs_directory(&self) -> bool {
        matches!(self, Self::Name(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KarmaToken {
    pub target: KarmaTarget,
    /// In the order they appeared, left to right.
    pub deltas: Vec<KarmaDelta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("username {name} not found")]
pub struct KarmaLookupError {
    pub name: String,
}

fn karma_token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(KARMA_TOKEN_PATTERN).expect("karma token pattern is valid"))
}

fn mention_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(MENTION_PATTERN).expect("mention pattern is valid"))
}

/// Scans whitespace-separated words; each word contributes at most its first
/// karma token.
pub fn scan_karma_tokens(text: &str) -> Vec<KarmaToken> {
    text.split_whitespace().filter_map(scan_word).collect()
}

fn scan_word(word: &str) -> Option<KarmaToken> {
    let captures = karma_token_regex().captures(word)?;
    let reference = captures.get(1)?.as_str();
    let markers = captures.get(2)?.as_str();
    let deltas = markers
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok().and_then(KarmaDelta::from_marker))
        .collect::<Vec<_>>();
    let target = match mention_regex().captures(reference) {
        Some(mention) => KarmaTarget::Mention(mention.get(1)?.as_str().to_string()),
        None => KarmaTarget::Name(reference.to_string()),
    };
    Some(KarmaToken { target, deltas })
}

/// Mentions resolve without the roster; names need an exact, case-sensitive
/// match and the first matching entry wins.
pub fn resolve_karma_target(
    target: &KarmaTarget,
    roster: &[SlackUser],
) -> Result<String, KarmaLookupError> {
    match target {
        KarmaTarget::Mention(id) => Ok(id.clone()),
        KarmaTarget::Name(name) => roster
            .iter()
            .find(|user| user.name == *name)
            .map(|user| user.id.clone())
            .ok_or_else(|| KarmaLookupError { name: name.clone() }),
    }
}
