// src/utils/log.rs

//! Banner and summary helpers on top of the `log` facade.
//!
//! Keeps the run output readable in a terminal or a journal: a boxed header
//! when something starts and an indented `[SUMMARY]` block when it ends.

const RULE_WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(RULE_WIDTH);
    ::log::info!("{}", border);
    ::log::info!("  {}", title);
    ::log::info!("{}", border);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    ::log::info!("[SUMMARY] {}", title);
    for line in summary_lines(items) {
        ::log::info!("{}", line);
    }
}

fn summary_lines(items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    items
        .iter()
        .map(|(key, value)| format!("    {:<width$} : {}", key, value, width = width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines_are_aligned() {
        let lines = summary_lines(&[("fetched", "12".into()), ("notified", "3".into())]);
        assert_eq!(lines[0], "    fetched  : 12");
        assert_eq!(lines[1], "    notified : 3");
    }

    #[test]
    fn test_summary_lines_empty() {
        assert!(summary_lines(&[]).is_empty());
    }
}
