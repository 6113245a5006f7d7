use regex::Regex;
use std::sync::OnceLock;

/// Step counter parsed from Snakemake's `N of M steps (P%) done` lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+) of (\d+) steps \(\d+(?:\.\d+)?%\) done").expect("valid regex literal")
    })
}

impl Progress {
    /// Highest progress line in `output`, if any
    pub fn scan(output: &str) -> Option<Self> {
        progress_pattern()
            .captures_iter(output)
            .filter_map(|caps| {
                let done = caps[1].parse().ok()?;
                let total = caps[2].parse().ok()?;
                Some(Self { done, total })
            })
            .max_by_key(|p| p.done)
    }
}
