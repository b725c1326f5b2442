//! Search term compilation into SQL `LIKE` patterns.
//!
//! Patterns are always matched with `LIKE ? ESCAPE '\'`, so the escape
//! character and SQLite's own wildcards (`%`, `_`) are escaped before the
//! user's `*` is turned into `%`.

/// The escape clause that must accompany every compiled pattern.
pub const LIKE_ESCAPE: &str = "ESCAPE '\\'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Term was wrapped in double quotes: the whole value must equal it.
    Exact,
    /// Term contained `*`: each `*` matches any run of characters.
    Wildcard,
    /// Plain term: matches anywhere in the value.
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    pub pattern: String,
    pub mode: MatchMode,
}

impl CompiledPattern {
    pub fn is_exact(&self) -> bool {
        self.mode == MatchMode::Exact
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 4);
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Compile a raw search term. Never fails; any input yields a usable pattern.
pub fn compile_pattern(term: &str) -> CompiledPattern {
    let term = term.trim();

    if term.len() >= 2 && term.starts_with('"') && term.ends_with('"') {
        let inner = &term[1..term.len() - 1];
        return CompiledPattern {
            pattern: escape_like(inner),
            mode: MatchMode::Exact,
        };
    }

    if term.contains('*') {
        return CompiledPattern {
            pattern: escape_like(term).replace('*', "%"),
            mode: MatchMode::Wildcard,
        };
    }

    CompiledPattern {
        pattern: format!("%{}%", escape_like(term)),
        mode: MatchMode::Substring,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn like(pattern: &CompiledPattern, value: &str) -> bool {
        let conn = Connection::open_in_memory().unwrap();
        conn.query_row(
            &format!("SELECT ?1 LIKE ?2 {}", LIKE_ESCAPE),
            rusqlite::params![value, pattern.pattern],
            |row| row.get::<_, bool>(0),
        )
        .unwrap()
    }

    #[test]
    fn test_quoted_term_is_exact() {
        let compiled = compile_pattern("\"exact term\"");
        assert!(compiled.is_exact());
        assert_eq!(compiled.pattern, "exact term");
        assert!(like(&compiled, "exact term"));
        assert!(!like(&compiled, "an exact term here"));
    }

    #[test]
    fn test_quoted_term_escapes_wildcards() {
        let compiled = compile_pattern("\"100%_done*\"");
        assert_eq!(compiled.mode, MatchMode::Exact);
        assert_eq!(compiled.pattern, "100\\%\\_done*");
        assert!(like(&compiled, "100%_done*"));
        assert!(!like(&compiled, "100 percent done"));
    }

    #[test]
    fn test_star_is_wildcard() {
        let compiled = compile_pattern("pre*fix");
        assert_eq!(compiled.mode, MatchMode::Wildcard);
        assert_eq!(compiled.pattern, "pre%fix");
        assert!(like(&compiled, "prefix"));
        assert!(like(&compiled, "pre-made fix"));
        assert!(!like(&compiled, "repfix"));
        assert!(!like(&compiled, "prefixes"));
    }

    #[test]
    fn test_wildcard_keeps_store_metacharacters_literal() {
        let compiled = compile_pattern("long_hair*");
        assert_eq!(compiled.pattern, "long\\_hair%");
        assert!(like(&compiled, "long_hair_ribbon"));
        assert!(!like(&compiled, "longXhair"));
    }

    #[test]
    fn test_plain_term_is_substring() {
        let compiled = compile_pattern("plain");
        assert_eq!(compiled.mode, MatchMode::Substring);
        assert!(like(&compiled, "plain"));
        assert!(like(&compiled, "a plain background"));
        assert!(!like(&compiled, "plane"));
    }

    #[test]
    fn test_lone_quote_is_not_exact() {
        let compiled = compile_pattern("\"");
        assert_eq!(compiled.mode, MatchMode::Substring);
        assert_eq!(compiled.pattern, "%\"%");
    }
}
