//! Small shared helpers: environment lookups, backoff jitter, fuzzy string
//! matching for contact lookup, and hand-rolled HTML extraction used by the
//! web capabilities.

use crate::error::{AssistantError, Result};

pub(crate) fn env_required(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| AssistantError::Config(format!("missing required env var {name}")))
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Pseudo-random ratio in [-1.0, 1.0] for backoff jitter. Seeded from the
/// clock; good enough for spreading retries, not for anything else.
pub(crate) fn jitter_ratio() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 2000) as f64 / 1000.0 - 1.0
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after").and_then(|v| v.trim().parse::<f64>().ok())
}

/// Similarity of two strings as a percentage (0..=100), case-insensitive.
/// Levenshtein-based; 100 means equal, 0 means nothing in common.
pub(crate) fn fuzzy_ratio(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 100;
    }
    let dist = levenshtein(&a, &b);
    (100 * (longest - dist) / longest) as u32
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            curr[j + 1] = sub.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Strip an HTML document down to visible text, one line per block.
/// Script and style bodies are dropped entirely.
pub(crate) fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut chars = html.char_indices().peekable();
    let lower = html.to_ascii_lowercase();
    let mut skip_until: Option<usize> = None;

    while let Some((i, c)) = chars.next() {
        if let Some(end) = skip_until {
            if i < end {
                continue;
            }
            skip_until = None;
        }
        if c == '<' {
            let rest = &lower[i..];
            for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
                if rest.starts_with(open) {
                    if let Some(off) = rest.find(close) {
                        skip_until = Some(i + off + close.len());
                    } else {
                        skip_until = Some(html.len());
                    }
                }
            }
            if skip_until.is_none() {
                // consume the tag itself, emit a line break in its place
                if let Some(off) = html[i..].find('>') {
                    skip_until = Some(i + off + 1);
                } else {
                    skip_until = Some(html.len());
                }
                out.push('\n');
            }
            continue;
        }
        out.push(c);
    }

    let decoded = decode_entities(&out);
    let lines: Vec<&str> = decoded
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines.join("\n")
}

pub(crate) fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Values of `attr` across every `<tag …>` element in the document.
pub(crate) fn collect_attr_values(html: &str, tag: &str, attr: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(off) = lower[pos..].find(&open) {
        let start = pos + off;
        let after = start + open.len();
        // reject prefix matches like <a> vs <article>
        match lower.as_bytes().get(after) {
            Some(b) if b.is_ascii_alphanumeric() => {
                pos = after;
                continue;
            }
            _ => {}
        }
        let end = match html[start..].find('>') {
            Some(e) => start + e,
            None => break,
        };
        if let Some(v) = attr_value(&html[start..end], attr) {
            out.push(v);
        }
        pos = end + 1;
    }
    out
}

/// Pull the value of `attr` out of a single element's opening tag text.
pub(crate) fn attr_value(element: &str, attr: &str) -> Option<String> {
    let lower = element.to_ascii_lowercase();
    let needle = format!("{attr}=");
    let mut pos = 0;
    loop {
        let off = lower[pos..].find(&needle)?;
        let at = pos + off;
        // must be preceded by whitespace, not part of another attribute name
        if at > 0 && !lower.as_bytes()[at - 1].is_ascii_whitespace() {
            pos = at + needle.len();
            continue;
        }
        let rest = &element[at + needle.len()..];
        let mut it = rest.chars();
        return match it.next() {
            Some(q @ ('"' | '\'')) => {
                let body = &rest[1..];
                body.find(q).map(|e| body[..e].to_string())
            }
            Some(_) => {
                let end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                Some(rest[..end].to_string())
            }
            None => None,
        };
    }
}

/// Visible text of each `<tag>…</tag>` region, optionally keeping only
/// elements whose class attribute contains one of `class_filter`.
pub(crate) fn collect_tag_texts(html: &str, tag: &str, class_filter: Option<&[&str]>) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(off) = lower[pos..].find(&open) {
        let start = pos + off;
        let after = start + open.len();
        match lower.as_bytes().get(after) {
            Some(b) if b.is_ascii_alphanumeric() => {
                pos = after;
                continue;
            }
            _ => {}
        }
        let tag_end = match html[start..].find('>') {
            Some(e) => start + e + 1,
            None => break,
        };
        let body_end = match lower[tag_end..].find(&close) {
            Some(e) => tag_end + e,
            None => html.len(),
        };
        let keep = match class_filter {
            None => true,
            Some(classes) => attr_value(&html[start..tag_end], "class")
                .map(|cv| {
                    let cv = cv.to_lowercase();
                    classes.iter().any(|c| cv.contains(c))
                })
                .unwrap_or(false),
        };
        if keep {
            let text = html_to_text(&html[tag_end..body_end]);
            if !text.is_empty() {
                out.push(text);
            }
        }
        pos = body_end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_ratio_exact_and_disjoint() {
        assert_eq!(fuzzy_ratio("Marco", "marco"), 100);
        assert_eq!(fuzzy_ratio("", ""), 100);
        assert_eq!(fuzzy_ratio("abc", "xyz"), 0);
        assert!(fuzzy_ratio("jonathan", "johnathan") >= 80);
        assert!(fuzzy_ratio("jonathan", "elizabeth") < 50);
    }

    #[test]
    fn test_html_to_text_strips_tags_and_scripts() {
        let html = "<html><head><script>var x = '<p>no</p>';</script>\
                    <style>body { color: red }</style></head>\
                    <body><p>Hello &amp; welcome</p><div>Second  line</div></body></html>";
        assert_eq!(html_to_text(html), "Hello & welcome\nSecond  line");
    }

    #[test]
    fn test_collect_attr_values_links() {
        let html = r#"<article href="nope"><a href="/one">x</a><A HREF='/two'>y</A><a>none</a>"#;
        assert_eq!(collect_attr_values(html, "a", "href"), vec!["/one", "/two"]);
    }

    #[test]
    fn test_collect_tag_texts_with_class_filter() {
        let html = r#"<ul class="main-nav"><li>Home</li><li>About</li></ul><ul><li>skip</li></ul>"#;
        let got = collect_tag_texts(html, "ul", Some(&["nav", "menu"]));
        assert_eq!(got, vec!["Home\nAbout"]);
    }

    #[test]
    fn test_collect_tag_texts_tables() {
        let html = "<table><tr><td>a</td><td>b</td></tr></table>";
        assert_eq!(collect_tag_texts(html, "table", None), vec!["a\nb"]);
    }
}
