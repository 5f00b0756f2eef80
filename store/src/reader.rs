//! Markdown reader: bytes + file context in, a [`Node`] record out (spec §4.3).
//!
//! Frontmatter parse failures never fail the pipeline — the teacher's sync
//! loop tolerates per-file faults by logging and continuing (see
//! `watch.rs`'s `process_changes`), and the reader follows the same posture
//! at file granularity.

use roux_core::types::Node;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::warn;

/// Provenance and timing context for a single file read.
pub struct FileContext<'a> {
    pub absolute_path: &'a str,
    pub relative_path: &'a str,
    pub extension: &'a str,
    /// Unix millis.
    pub mtime: f64,
}

/// Parse a single file's bytes into a [`Node`]. Never fails: a frontmatter
/// parse error degrades to a path-derived title with the full original
/// bytes as content, logged as a warning.
pub fn parse_markdown(bytes: &[u8], ctx: &FileContext) -> Node {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let id = roux_core::link::normalize_link(ctx.relative_path);

    let (frontmatter, body) = split_frontmatter(&text);

    let (title, tags, properties) = match frontmatter {
        Some(raw_yaml) => match serde_yaml::from_str::<serde_yaml::Value>(raw_yaml) {
            Ok(value) => extract_frontmatter_fields(&value, ctx.relative_path),
            Err(e) => {
                warn!(path = ctx.relative_path, error = %e, "frontmatter parse failed, falling back to raw content");
                return fallback_node(ctx, &text, id);
            }
        },
        None => (
            roux_core::types::default_title_from_id(ctx.relative_path),
            Vec::new(),
            BTreeMap::new(),
        ),
    };

    let raw_links = extract_wiki_links(body);
    let basename_index_placeholder: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    let valid_ids_placeholder: std::collections::HashSet<String> = std::collections::HashSet::new();
    // Links are normalized here but not yet resolved against the vault's
    // node set — resolution happens store-wide during sync (spec §4.9
    // step 4), since a single file's reader has no view of its siblings.
    let outgoing_links = roux_core::link::resolve_links(
        &raw_links,
        &basename_index_placeholder,
        &valid_ids_placeholder,
    );

    Node {
        id,
        title,
        content: Some(body.to_string()),
        tags,
        outgoing_links,
        properties,
        source_ref: Some(roux_core::types::SourceRef {
            kind: "file".to_string(),
            path: ctx.absolute_path.to_string(),
            last_modified: ctx.mtime,
        }),
        is_ghost: false,
    }
}

fn fallback_node(ctx: &FileContext, raw_text: &str, id: String) -> Node {
    Node {
        id,
        title: roux_core::types::default_title_from_id(ctx.relative_path),
        content: Some(raw_text.to_string()),
        tags: Vec::new(),
        outgoing_links: Vec::new(),
        properties: BTreeMap::new(),
        source_ref: Some(roux_core::types::SourceRef {
            kind: "file".to_string(),
            path: ctx.absolute_path.to_string(),
            last_modified: ctx.mtime,
        }),
        is_ghost: false,
    }
}

/// Split a leading `---`-delimited YAML frontmatter block from the body.
/// Returns `(Some(yaml_text), body)` or `(None, full_text)`.
fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let trimmed_start = text.trim_start_matches('\u{feff}');
    if !trimmed_start.starts_with("---") {
        return (None, text);
    }
    // First line must be exactly "---" (optionally trailing whitespace).
    let mut lines = trimmed_start.lines();
    let first = lines.next().unwrap_or("");
    if first.trim() != "---" {
        return (None, text);
    }

    let after_first_newline = match trimmed_start.find('\n') {
        Some(idx) => &trimmed_start[idx + 1..],
        None => return (None, text),
    };

    // Find the closing "---" line.
    let mut offset = 0usize;
    for line in after_first_newline.lines() {
        if line.trim() == "---" {
            let yaml = &after_first_newline[..offset];
            let body_start = offset + line.len();
            let body = after_first_newline[body_start..].trim_start_matches('\n');
            return (Some(yaml), body);
        }
        offset += line.len() + 1;
    }

    (None, text)
}

fn extract_frontmatter_fields(
    value: &serde_yaml::Value,
    relative_path: &str,
) -> (String, Vec<String>, BTreeMap<String, JsonValue>) {
    let mapping = match value.as_mapping() {
        Some(m) => m,
        None => {
            return (
                roux_core::types::default_title_from_id(relative_path),
                Vec::new(),
                BTreeMap::new(),
            )
        }
    };

    let title = mapping
        .get(serde_yaml::Value::String("title".to_string()))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| roux_core::types::default_title_from_id(relative_path));

    let tags = mapping
        .get(serde_yaml::Value::String("tags".to_string()))
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            let mut seen = std::collections::HashSet::new();
            seq.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .filter(|s| seen.insert(s.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut properties = BTreeMap::new();
    for (k, v) in mapping {
        let Some(key) = k.as_str() else { continue };
        if key == "title" || key == "tags" {
            continue;
        }
        if let Ok(json_value) = yaml_to_json(v) {
            properties.insert(key.to_string(), json_value);
        }
    }

    (title, tags, properties)
}

fn yaml_to_json(v: &serde_yaml::Value) -> Result<JsonValue, serde_yaml::Error> {
    let json_str = serde_json::to_string(v).unwrap_or_default();
    serde_json::from_str(&json_str).or_else(|_| {
        // serde_yaml -> serde_json direct conversion via round-trip through its own serializer.
        serde_yaml::from_value(v.clone())
    })
}

/// Extract raw `[[target]]` / `[[target|display]]` wiki-link targets from a
/// markdown body, skipping fenced and inline code, deduplicated in
/// first-occurrence order.
pub fn extract_wiki_links(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut in_fence = false;
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for raw in scan_line_for_links(line) {
            if seen.insert(raw.clone()) {
                out.push(raw);
            }
        }
    }
    out
}

/// Scan a single (non-fenced) line for `[[...]]` occurrences, skipping any
/// that fall inside inline-code (backtick-delimited) spans.
fn scan_line_for_links(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut results = Vec::new();
    let mut in_inline_code = false;
    let mut i = 0usize;
    while i < chars.len() {
        match chars[i] {
            '`' => {
                in_inline_code = !in_inline_code;
                i += 1;
            }
            '[' if !in_inline_code && i + 1 < chars.len() && chars[i + 1] == '[' => {
                if let Some(end) = find_closing(&chars, i + 2) {
                    let inner: String = chars[i + 2..end].iter().collect();
                    let target = inner.split('|').next().unwrap_or(&inner).trim().to_string();
                    if !target.is_empty() {
                        results.push(target);
                    }
                    i = end + 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    results
}

fn find_closing(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start;
    while i + 1 < chars.len() {
        if chars[i] == ']' && chars[i + 1] == ']' {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Serialize a node back to frontmatter + body, the inverse of
/// [`parse_markdown`], used by `create_node`/`update_node` to write files.
pub fn render_markdown(node: &Node) -> String {
    let mut fm = serde_yaml::Mapping::new();
    fm.insert(
        serde_yaml::Value::String("title".to_string()),
        serde_yaml::Value::String(node.title.clone()),
    );
    if !node.tags.is_empty() {
        fm.insert(
            serde_yaml::Value::String("tags".to_string()),
            serde_yaml::Value::Sequence(
                node.tags.iter().map(|t| serde_yaml::Value::String(t.clone())).collect(),
            ),
        );
    }
    for (k, v) in &node.properties {
        let yaml_v: serde_yaml::Value =
            serde_yaml::to_value(v).unwrap_or(serde_yaml::Value::Null);
        fm.insert(serde_yaml::Value::String(k.clone()), yaml_v);
    }

    let yaml_text = serde_yaml::to_string(&serde_yaml::Value::Mapping(fm)).unwrap_or_default();
    let body = node.content.as_deref().unwrap_or("");
    format!("---\n{yaml_text}---\n\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(rel: &'a str) -> FileContext<'a> {
        FileContext { absolute_path: rel, relative_path: rel, extension: "md", mtime: 1000.0 }
    }

    #[test]
    fn parses_title_from_frontmatter() {
        let bytes = b"---\ntitle: Hello World\ntags: [a, b]\n---\nBody text.";
        let node = parse_markdown(bytes, &ctx("notes/x.md"));
        assert_eq!(node.title, "Hello World");
        assert_eq!(node.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(node.content.as_deref(), Some("Body text."));
    }

    #[test]
    fn falls_back_to_path_title_without_frontmatter() {
        let bytes = b"Just a body.";
        let node = parse_markdown(bytes, &ctx("notes/my-note.md"));
        assert_eq!(node.title, "my note");
    }

    #[test]
    fn malformed_frontmatter_does_not_fail_pipeline() {
        let bytes = b"---\ntitle: [unterminated\n---\nBody.";
        let node = parse_markdown(bytes, &ctx("notes/broken.md"));
        assert_eq!(node.title, "broken");
        assert!(node.content.unwrap().contains("Body."));
    }

    #[test]
    fn extracts_simple_wiki_link() {
        let links = extract_wiki_links("Links to [[b]].");
        assert_eq!(links, vec!["b".to_string()]);
    }

    #[test]
    fn extracts_link_with_display_text() {
        let links = extract_wiki_links("See [[target|Display Text]] for more.");
        assert_eq!(links, vec!["target".to_string()]);
    }

    #[test]
    fn dedups_preserving_first_occurrence_order() {
        let links = extract_wiki_links("[[b]] then [[a]] then [[b]] again");
        assert_eq!(links, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn skips_links_inside_fenced_code() {
        let body = "before\n```\n[[not-a-link]]\n```\nafter [[real-link]]";
        let links = extract_wiki_links(body);
        assert_eq!(links, vec!["real-link".to_string()]);
    }

    #[test]
    fn skips_links_inside_inline_code() {
        let body = "text `[[not-a-link]]` and [[real-link]]";
        let links = extract_wiki_links(body);
        assert_eq!(links, vec!["real-link".to_string()]);
    }

    #[test]
    fn properties_exclude_title_and_tags() {
        let bytes = b"---\ntitle: T\ntags: [x]\nauthor: me\n---\nbody";
        let node = parse_markdown(bytes, &ctx("n.md"));
        assert!(!node.properties.contains_key("title"));
        assert!(!node.properties.contains_key("tags"));
        assert_eq!(node.properties.get("author").unwrap().as_str(), Some("me"));
    }

    #[test]
    fn render_then_parse_roundtrips_title_and_tags() {
        let node = Node {
            id: "a.md".into(),
            title: "A Title".into(),
            content: Some("body content".into()),
            tags: vec!["x".into(), "y".into()],
            outgoing_links: vec![],
            properties: BTreeMap::new(),
            source_ref: None,
            is_ghost: false,
        };
        let rendered = render_markdown(&node);
        let parsed = parse_markdown(rendered.as_bytes(), &ctx("a.md"));
        assert_eq!(parsed.title, "A Title");
        assert_eq!(parsed.tags, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(parsed.content.as_deref(), Some("body content"));
    }
}
