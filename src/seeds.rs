//! Seed loading (§6.4): a seed file is one URL per line, `#`-prefixed
//! lines and blank lines are ignored.

use anyhow::{Context, Result};

pub fn load_seed_file(path: &str) -> Result<Vec<String>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading seed file {path}"))?;
    Ok(parse_seeds(&contents))
}

pub fn parse_seeds(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blank_lines() {
        let input = "https://a.example/\n# a comment\n\nhttps://b.example/\n";
        assert_eq!(
            parse_seeds(input),
            vec!["https://a.example/".to_string(), "https://b.example/".to_string()]
        );
    }
}
