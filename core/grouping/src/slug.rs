use anyhow::{Context, Result};
use regex::Regex;

/// Turns titles into URL slugs: lowercase, every run of non-alphanumerics
/// collapsed to one hyphen, no leading or trailing hyphen.
pub struct Slugger {
    separator: Regex,
}

impl Slugger {
    pub fn new() -> Result<Self> {
        Ok(Self {
            separator: Regex::new(r"[^a-z0-9]+").context("invalid slug pattern")?,
        })
    }

    pub fn slug(&self, title: &str) -> String {
        let lowered = title.trim().to_lowercase();
        self.separator
            .replace_all(&lowered, "-")
            .trim_matches('-')
            .to_string()
    }
}
