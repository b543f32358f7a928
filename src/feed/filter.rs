// src/feed/filter.rs
use anyhow::{Context, Result};
use regex::Regex;

/// Case-insensitive whole-word keyword match on item titles.
/// An empty keyword list lets every item through.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    re: Option<Regex>,
}

impl KeywordFilter {
    pub fn new(keywords: &[String]) -> Result<Self> {
        let alts: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if alts.is_empty() {
            return Ok(Self { re: None });
        }
        // `\b` misbehaves around keywords ending in punctuation (`c++`).
        let pattern = format!(r"(?i)(?:^|\W)(?:{})(?:\W|$)", alts.join("|"));
        let re = Regex::new(&pattern).context("building keyword regex")?;
        Ok(Self { re: Some(re) })
    }

    pub fn accept_all() -> Self {
        Self { re: None }
    }

    pub fn matches(&self, title: &str) -> bool {
        match &self.re {
            None => true,
            Some(re) => re.is_match(&super::normalize_text(title)),
        }
    }
}
