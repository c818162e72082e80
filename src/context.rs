//! Text renderings of a session's context items.
//!
//! The digest keeps the sufficiency prompt compact no matter how much raw
//! content is attached; the full rendering feeds final synthesis untruncated.

use std::sync::OnceLock;

use regex::Regex;

use crate::session::{ContextItem, ContextItemType, ContextMetadata};

const DIGEST_PREVIEW_CHARS: usize = 200;
const SCREENSHOT_TITLE_CHARS: usize = 20;
const TITLE_WORDS: usize = 4;
pub const FULL_DELIMITER: &str = "\n---\n";

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\s]").expect("static regex"))
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Hostname without a `www.` marker; unparsable URLs count as absent.
fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.replacen("www.", "", 1))
}

fn title_words(title: &str) -> Option<String> {
    let cleaned = non_word().replace_all(title, " ");
    let words: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .take(TITLE_WORDS)
        .collect();
    (words.len() >= 2).then(|| words.join(" "))
}

fn tab_content_name(meta: &ContextMetadata) -> String {
    if let Some(name) = present(&meta.display_name) {
        return name.to_string();
    }
    if let Some(words) = present(&meta.title).and_then(title_words) {
        return words;
    }
    present(&meta.url)
        .and_then(domain_of)
        .map(|domain| format!("{domain} Content"))
        .unwrap_or_else(|| "Web Content".to_string())
}

fn screenshot_name(meta: &ContextMetadata) -> String {
    if let Some(title) = present(&meta.title) {
        let short: String = title.chars().take(SCREENSHOT_TITLE_CHARS).collect();
        return format!("Screenshot: {short}");
    }
    present(&meta.url)
        .and_then(domain_of)
        .map(|domain| format!("Screenshot: {domain}"))
        .unwrap_or_else(|| "Screenshot".to_string())
}

/// Short human-readable label for an item. Never fails.
pub fn display_name(item: &ContextItem) -> String {
    let meta = &item.metadata;
    match item.kind {
        ContextItemType::TabContent => tab_content_name(meta),
        ContextItemType::Screenshot => screenshot_name(meta),
        ContextItemType::File => present(&meta.file_name)
            .or(present(&meta.title))
            .or(present(&meta.url))
            .unwrap_or("Content")
            .to_string(),
    }
}

/// One line per item: `[type] name: <first 200 chars>...`.
pub fn digest(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| {
            let preview: String = item.content.chars().take(DIGEST_PREVIEW_CHARS).collect();
            format!("[{}] {}: {}...", item.kind.as_str(), display_name(item), preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every item with its entire content, separated by a delimiter line.
pub fn full(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| format!("[{}] {}:\n{}\n", item.kind.as_str(), display_name(item), item.content))
        .collect::<Vec<_>>()
        .join(FULL_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(kind: ContextItemType, content: &str, metadata: ContextMetadata) -> ContextItem {
        ContextItem { id: Uuid::new_v4(), kind, content: content.into(), metadata, timestamp: Utc::now() }
    }

    fn meta() -> ContextMetadata {
        ContextMetadata::default()
    }

    #[test]
    fn file_uses_filename_verbatim() {
        let i = item(ContextItemType::File, "x", ContextMetadata { file_name: Some("a.py".into()), ..meta() });
        assert_eq!(display_name(&i), "a.py");
    }

    #[test]
    fn file_without_name_falls_back() {
        let titled = item(ContextItemType::File, "x", ContextMetadata { title: Some("Notes".into()), ..meta() });
        assert_eq!(display_name(&titled), "Notes");
        assert_eq!(display_name(&item(ContextItemType::File, "x", meta())), "Content");
    }

    #[test]
    fn screenshot_names() {
        let by_url = item(
            ContextItemType::Screenshot,
            "data:image/png;base64,AAAA",
            ContextMetadata { url: Some("https://www.example.com/x".into()), ..meta() },
        );
        assert_eq!(display_name(&by_url), "Screenshot: example.com");

        let by_title = item(
            ContextItemType::Screenshot,
            "",
            ContextMetadata {
                title: Some("A very long page title that keeps going".into()),
                url: Some("https://www.example.com/x".into()),
                ..meta()
            },
        );
        assert_eq!(display_name(&by_title), "Screenshot: A very long page tit");

        let broken = item(ContextItemType::Screenshot, "", ContextMetadata { url: Some("not a url".into()), ..meta() });
        assert_eq!(display_name(&broken), "Screenshot");
    }

    #[test]
    fn tab_content_prefers_summary_then_title_then_domain() {
        let summarized = item(
            ContextItemType::TabContent,
            "",
            ContextMetadata { display_name: Some("React Hooks Guide".into()), title: Some("ignored".into()), ..meta() },
        );
        assert_eq!(display_name(&summarized), "React Hooks Guide");

        let titled = item(
            ContextItemType::TabContent,
            "",
            ContextMetadata { title: Some("Using the Effect Hook – React Docs".into()), ..meta() },
        );
        assert_eq!(display_name(&titled), "Using the Effect Hook");

        // a single usable word is not enough
        let short_title = item(
            ContextItemType::TabContent,
            "",
            ContextMetadata { title: Some("Go | a b".into()), url: Some("https://www.rust-lang.org/learn".into()), ..meta() },
        );
        assert_eq!(display_name(&short_title), "rust-lang.org Content");

        let nothing = item(ContextItemType::TabContent, "", ContextMetadata { url: Some("::::".into()), ..meta() });
        assert_eq!(display_name(&nothing), "Web Content");
    }

    #[test]
    fn title_words_keep_only_ascii_word_chars() {
        let m = ContextMetadata { title: Some("Café Menü Guide".into()), ..meta() };
        assert_eq!(display_name(&item(ContextItemType::TabContent, "", m)), "Caf Men Guide");
    }

    #[test]
    fn digest_truncates_to_200_chars() {
        let long = "é".repeat(500);
        let items = vec![
            item(ContextItemType::File, &long, ContextMetadata { file_name: Some("big.txt".into()), ..meta() }),
            item(ContextItemType::File, "short", ContextMetadata { file_name: Some("small.txt".into()), ..meta() }),
        ];
        let d = digest(&items);
        let lines: Vec<_> = d.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("[file] big.txt: {}...", "é".repeat(200)));
        assert_eq!(lines[1], "[file] small.txt: short...");
    }

    #[test]
    fn full_keeps_entire_content_with_delimiters() {
        let body = "line\n".repeat(100);
        let items = vec![
            item(ContextItemType::File, &body, ContextMetadata { file_name: Some("a.txt".into()), ..meta() }),
            item(ContextItemType::TabContent, "page", ContextMetadata { display_name: Some("Docs Page Here".into()), ..meta() }),
        ];
        let f = full(&items);
        assert!(f.starts_with("[file] a.txt:\n"));
        assert!(f.contains(&body));
        assert!(f.contains("\n---\n[tab-content] Docs Page Here:\npage\n"));
        assert_eq!(full(&[]), "");
    }
}
