//! Content truncation (spec §6): primary/list/neighbor context limits,
//! Unicode-safe (operates on scalar values, never splits a surrogate pair).

pub const PRIMARY_LIMIT: usize = 10_000;
pub const LIST_LIMIT: usize = 500;
pub const NEIGHBOR_LIMIT: usize = 200;
pub const MAX_LINKS: usize = 100;
pub const MAX_NEIGHBORS: usize = 20;

const SUFFIX: &str = "... [truncated]";

/// Truncate `s` to `limit` Unicode scalar values, appending [`SUFFIX`] when
/// truncation actually happens. Content of length exactly `limit` is left
/// untouched; `limit + 1` is truncated.
pub fn truncate(s: &str, limit: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_none() {
        s.to_string()
    } else {
        format!("{head}{SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_length_untouched() {
        let s = "a".repeat(10);
        assert_eq!(truncate(&s, 10), s);
    }

    #[test]
    fn one_over_is_truncated() {
        let s = "a".repeat(11);
        let out = truncate(&s, 10);
        assert_eq!(out, format!("{}{SUFFIX}", "a".repeat(10)));
    }

    #[test]
    fn does_not_split_multibyte_scalar() {
        let s = "a".repeat(9) + "🧠" + "bbbb";
        let out = truncate(&s, 10);
        assert!(out.starts_with(&"a".repeat(9)));
        assert!(out.contains('🧠'));
        assert!(out.ends_with(SUFFIX));
    }
}
