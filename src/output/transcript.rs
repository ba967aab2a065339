// Terminal highlighting for ansible-playbook transcripts

use colored::*;
use once_cell::sync::Lazy;
use regex::Regex;

static SECTION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^={4,}\s.*\s={4,}$").expect("valid regex"));
static PLAY_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^PLAY \[.*\]").expect("valid regex"));
static TASK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(TASK|RUNNING HANDLER) \[.*\]").expect("valid regex"));
static RESULT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(ok|changed|failed|fatal|skipping|unreachable|included):")
        .expect("valid regex")
});
static RECAP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+:\s+ok=(\d+)\s+changed=(\d+)\s+unreachable=(\d+)\s+failed=(\d+)")
        .expect("valid regex")
});

/// Per-host counters from a `PLAY RECAP` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecapLine {
    pub host: String,
    pub ok: u32,
    pub changed: u32,
    pub unreachable: u32,
    pub failed: u32,
}

impl RecapLine {
    pub fn is_clean(&self) -> bool {
        self.unreachable == 0 && self.failed == 0
    }
}

/// Recap lines found anywhere in a transcript, in order
pub fn parse_recap(text: &str) -> Vec<RecapLine> {
    text.lines()
        .filter_map(|line| {
            let caps = RECAP_LINE.captures(line.trim())?;
            let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            Some(RecapLine {
                host: caps.get(1)?.as_str().to_string(),
                ok: num(2),
                changed: num(3),
                unreachable: num(4),
                failed: num(5),
            })
        })
        .collect()
}

fn highlight_line(line: &str) -> String {
    if SECTION_HEADER.is_match(line) {
        return line.cyan().bold().to_string();
    }
    if PLAY_HEADER.is_match(line) || line.starts_with("PLAY RECAP") {
        return line.green().bold().to_string();
    }
    if TASK_HEADER.is_match(line) {
        return line.yellow().bold().to_string();
    }
    if line.starts_with("Error fetching output:") || line.starts_with("Submission failed:") {
        return line.red().to_string();
    }
    if let Some(caps) = RESULT_MARKER.captures(line) {
        let marker = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return match marker {
            "ok" => line.green().to_string(),
            "changed" => line.yellow().to_string(),
            "skipping" | "included" => line.cyan().to_string(),
            _ => line.red().bold().to_string(),
        };
    }
    if let Some(recap) = parse_recap(line).pop() {
        return if recap.is_clean() {
            line.green().to_string()
        } else {
            line.red().to_string()
        };
    }
    line.to_string()
}

/// Colorize a merged transcript line by line
pub fn highlight(text: &str) -> String {
    text.lines().map(highlight_line).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
==== HOST: 10.0.0.5 (Job: job-1) ====
PLAY [all] *********************************************************************
TASK [Gathering Facts] *********************************************************
ok: [10.0.0.5]
changed: [10.0.0.5]
fatal: [10.0.0.6]: UNREACHABLE! => {}
PLAY RECAP *********************************************************************
10.0.0.5                   : ok=2    changed=1    unreachable=0    failed=0    skipped=0
10.0.0.6                   : ok=0    changed=0    unreachable=1    failed=0    skipped=0";

    #[test]
    fn test_highlight_preserves_text() {
        let colored = highlight(SAMPLE);
        assert_eq!(console::strip_ansi_codes(&colored), SAMPLE);
    }

    #[test]
    fn test_parse_recap() {
        let recap = parse_recap(SAMPLE);
        assert_eq!(recap.len(), 2);
        assert_eq!(
            recap[0],
            RecapLine {
                host: "10.0.0.5".to_string(),
                ok: 2,
                changed: 1,
                unreachable: 0,
                failed: 0,
            }
        );
        assert!(recap[0].is_clean());
        assert!(!recap[1].is_clean());
    }
}
