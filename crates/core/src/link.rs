//! Wiki-link normalization, the basename index, and the link resolver
//! (spec §4.4).

use std::collections::HashMap;

/// Lowercase, forward-slash a raw wiki-link target, and append `.md` if the
/// final path segment has no plausible file extension.
///
/// Extension heuristic: the last `.` in the final segment followed by 1-4
/// alphanumeric characters, at least one of which is a letter (so `v1.2` is
/// not mistaken for an extension, but `.md`, `.png`, `.rs` are).
pub fn normalize_link(raw: &str) -> String {
    let lower = raw.to_lowercase().replace('\\', "/");
    let last_segment = lower.rsplit('/').next().unwrap_or(&lower);

    if has_extension(last_segment) {
        lower
    } else {
        format!("{lower}.md")
    }
}

fn has_extension(segment: &str) -> bool {
    let Some(dot_idx) = segment.rfind('.') else { return false };
    let candidate = &segment[dot_idx + 1..];
    if candidate.is_empty() || candidate.len() > 4 {
        return false;
    }
    let all_alphanumeric = candidate.chars().all(|c| c.is_ascii_alphanumeric());
    let has_letter = candidate.chars().any(|c| c.is_ascii_alphabetic());
    all_alphanumeric && has_letter
}

/// Group node ids by the last `/`-separated segment, for bare wiki-link
/// resolution (`[[foo]]` resolving to `subdir/foo.md`).
pub fn build_basename_index<'a, I: IntoIterator<Item = &'a str>>(ids: I) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for id in ids {
        let basename = id.rsplit('/').next().unwrap_or(id).to_string();
        index.entry(basename).or_default().push(id.to_string());
    }
    index
}

/// Resolve raw (un-normalized) wiki-link targets against the current
/// basename index and set of valid node ids.
///
/// Each input is normalized, then:
/// 1. If it is already a valid node id, kept as-is.
/// 2. Else if it contains a `/`, kept as-is (may resolve to a ghost).
/// 3. Else looked up by basename; substituted only on a unique match.
///
/// Duplicates in `raw_links` are processed independently — the caller is
/// responsible for deduplicating the result if desired.
pub fn resolve_links(
    raw_links: &[String],
    basename_index: &HashMap<String, Vec<String>>,
    valid_ids: &std::collections::HashSet<String>,
) -> Vec<String> {
    raw_links
        .iter()
        .map(|raw| {
            let normalized = normalize_link(raw);
            if valid_ids.contains(&normalized) {
                return normalized;
            }
            if normalized.contains('/') {
                return normalized;
            }
            match basename_index.get(&normalized) {
                Some(candidates) if candidates.len() == 1 => candidates[0].clone(),
                _ => normalized,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn normalize_lowercases_and_slashes() {
        assert_eq!(normalize_link("Notes\\A.md"), "notes/a.md");
    }

    #[test]
    fn normalize_appends_md_when_no_extension() {
        assert_eq!(normalize_link("foo"), "foo.md");
        assert_eq!(normalize_link("dir/foo"), "dir/foo.md");
    }

    #[test]
    fn normalize_keeps_existing_extension() {
        assert_eq!(normalize_link("image.png"), "image.png");
        assert_eq!(normalize_link("notes/a.md"), "notes/a.md");
    }

    #[test]
    fn normalize_does_not_misfire_on_version_like_segments() {
        // "2" alone isn't a letter, so "v1.2" keeps no real extension — gets .md.
        assert_eq!(normalize_link("v1.2"), "v1.2.md");
    }

    #[test]
    fn normalize_idempotent() {
        for s in ["Foo", "dir/Bar.MD", "a/b/c.png", "v1.2"] {
            let once = normalize_link(s);
            let twice = normalize_link(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn basename_index_groups_by_last_segment() {
        let ids = vec!["a/foo.md", "b/foo.md", "c/bar.md"];
        let idx = build_basename_index(ids);
        assert_eq!(idx["foo.md"].len(), 2);
        assert_eq!(idx["bar.md"].len(), 1);
    }

    #[test]
    fn resolve_prefers_exact_id_match() {
        let valid: HashSet<String> = ["a/foo.md".to_string()].into_iter().collect();
        let idx = build_basename_index(["a/foo.md"]);
        let result = resolve_links(&["a/foo.md".to_string()], &idx, &valid);
        assert_eq!(result, vec!["a/foo.md"]);
    }

    #[test]
    fn resolve_bare_name_with_unique_basename_substitutes() {
        let valid: HashSet<String> = ["sub/foo.md".to_string()].into_iter().collect();
        let idx = build_basename_index(["sub/foo.md"]);
        let result = resolve_links(&["foo".to_string()], &idx, &valid);
        assert_eq!(result, vec!["sub/foo.md"]);
    }

    #[test]
    fn resolve_bare_name_with_ambiguous_basename_keeps_as_is() {
        let valid: HashSet<String> = ["a/foo.md".to_string(), "b/foo.md".to_string()].into_iter().collect();
        let idx = build_basename_index(["a/foo.md", "b/foo.md"]);
        let result = resolve_links(&["foo".to_string()], &idx, &valid);
        assert_eq!(result, vec!["foo.md"]);
    }

    #[test]
    fn resolve_path_like_unresolved_link_kept_as_ghost_candidate() {
        let valid: HashSet<String> = HashSet::new();
        let idx = build_basename_index(std::iter::empty());
        let result = resolve_links(&["missing/thing".to_string()], &idx, &valid);
        assert_eq!(result, vec!["missing/thing.md"]);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let valid: HashSet<String> = ["a/b.md".to_string()].into_iter().collect();
        let idx = build_basename_index(["a/b.md"]);
        let result = resolve_links(&["A/B.MD".to_string()], &idx, &valid);
        assert_eq!(result, vec!["a/b.md"]);
    }
}
