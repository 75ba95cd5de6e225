/// Blocklist line parsing for the AdBlock format.
///
/// Recognized lines: `!` and `[` start comments or section markers,
/// `@@` starts a whitelist rule (ignored), and `||<domain>^` contributes
/// a domain. Everything else is skipped.
pub fn parse_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
        return None;
    }

    // Whitelist rules and rules with options or paths are not domains.
    if line.starts_with("@@") || line.contains('$') || line.contains('/') {
        return None;
    }

    let domain = line.strip_prefix("||")?.strip_suffix('^')?;

    if is_valid_domain(domain) {
        Some(domain)
    } else {
        None
    }
}

/// Check basic domain shape: non-empty dot-separated labels of at most
/// 63 octets, alphanumeric at the edges, hyphens allowed in between.
fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }

        for (i, ch) in label.chars().enumerate() {
            if i == 0 || i == label.len() - 1 {
                if !ch.is_ascii_alphanumeric() {
                    return false;
                }
            } else if !ch.is_ascii_alphanumeric() && ch != '-' {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adblock_domain_rules() {
        assert_eq!(parse_line("||ads.example.com^"), Some("ads.example.com"));
        assert_eq!(parse_line("||tracker.com^"), Some("tracker.com"));
        assert_eq!(parse_line("  ||padded.com^  "), Some("padded.com"));
    }

    #[test]
    fn skips_comments_and_section_markers() {
        assert_eq!(parse_line("! Comment line"), None);
        assert_eq!(parse_line("[AdBlock Plus]"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn skips_whitelist_rules() {
        assert_eq!(parse_line("@@whitelist.com^"), None);
        assert_eq!(parse_line("@@||whitelist.com^"), None);
    }

    #[test]
    fn skips_rules_with_options_or_paths() {
        assert_eq!(parse_line("||example.com^$third-party"), None);
        assert_eq!(parse_line("||example.com/banner^"), None);
    }

    #[test]
    fn skips_lines_without_the_domain_form() {
        assert_eq!(parse_line("invalid line without format"), None);
        assert_eq!(parse_line("plain-domain.com"), None);
        assert_eq!(parse_line("||unterminated.com"), None);
    }

    #[test]
    fn rejects_malformed_domains() {
        assert_eq!(parse_line("||-invalid.com^"), None);
        assert_eq!(parse_line("||invalid-.com^"), None);
        assert_eq!(parse_line("||double..dot.com^"), None);
        let long = format!("||{}.com^", "a".repeat(260));
        assert_eq!(parse_line(&long), None);
    }
}
