//! FTS5 query sanitization.
//!
//! User queries are never handed to the MATCH operator raw. Bare tokens
//! containing FTS5 syntax characters get quoted, balanced phrases and
//! trailing prefix wildcards survive, stray quotes are dropped, and the
//! boolean operators pass through. [`escape_all_special`] is the aggressive
//! fallback used when a sanitized query still trips the FTS5 parser.

/// Characters inside a bare token that trigger quoting. Hyphen reads as NOT,
/// colon as a column filter, parens as grouping.
const NEEDS_QUOTING: &[char] = &['-', ':', '(', ')', '^', '\''];

const OPERATORS: &[&str] = &["AND", "OR", "NOT"];

/// Sanitize a raw user query into a safe FTS5 MATCH expression.
pub fn sanitize_fts_query(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    // Unbalanced double quotes cannot be repaired; drop every quote and
    // treat the remainder as bare tokens.
    let input: String = if trimmed.matches('"').count() % 2 == 0 {
        trimmed.to_string()
    } else {
        trimmed.replace('"', "")
    };

    let mut out: Vec<String> = Vec::new();
    for token in tokenize(&input) {
        match token {
            Token::Phrase(p) => out.push(format!("\"{p}\"")),
            Token::Bare(word) => out.push(sanitize_bare(&word)),
        }
    }
    out.join(" ")
}

/// Last-resort quoting: every non-operator term becomes its own quoted
/// phrase. Loses wildcard and phrase semantics but cannot fail to parse.
pub fn escape_all_special(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            if OPERATORS.contains(&word) {
                word.to_string()
            } else {
                format!("\"{}\"", word.replace('"', ""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

enum Token {
    /// Contents of a balanced `"…"` pair, quotes stripped.
    Phrase(String),
    Bare(String),
}

/// Split on whitespace while keeping balanced quoted phrases intact.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == '"' {
            let mut phrase = String::new();
            for (_, pc) in chars.by_ref() {
                if pc == '"' {
                    break;
                }
                phrase.push(pc);
            }
            tokens.push(Token::Phrase(phrase));
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, nc)) = chars.peek() {
            if nc.is_whitespace() || nc == '"' {
                break;
            }
            end = i + nc.len_utf8();
            chars.next();
        }
        tokens.push(Token::Bare(input[start..end].to_string()));
    }
    tokens
}

fn sanitize_bare(word: &str) -> String {
    if OPERATORS.contains(&word) {
        return word.to_string();
    }
    if word.contains(NEEDS_QUOTING) {
        format!("\"{word}\"")
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query() {
        assert_eq!(sanitize_fts_query(""), "");
        assert_eq!(sanitize_fts_query("   "), "");
    }

    #[test]
    fn test_simple_query_untouched() {
        assert_eq!(sanitize_fts_query("hello world"), "hello world");
    }

    #[test]
    fn test_strips_surrounding_whitespace() {
        assert_eq!(sanitize_fts_query("  hello  "), "hello");
    }

    #[test]
    fn test_quotes_tokens_with_syntax_chars() {
        assert_eq!(sanitize_fts_query("meeting-notes"), "\"meeting-notes\"");
        assert_eq!(sanitize_fts_query("subject:test"), "\"subject:test\"");
        assert_eq!(sanitize_fts_query("(group)"), "\"(group)\"");
        assert_eq!(sanitize_fts_query("boost^2"), "\"boost^2\"");
        assert_eq!(sanitize_fts_query("it's"), "\"it's\"");
    }

    #[test]
    fn test_preserves_balanced_phrases() {
        assert_eq!(sanitize_fts_query("\"exact phrase\""), "\"exact phrase\"");
        let result = sanitize_fts_query("hello \"exact phrase\" world");
        assert!(result.contains("\"exact phrase\""));
    }

    #[test]
    fn test_preserves_prefix_wildcard() {
        assert_eq!(sanitize_fts_query("meet*"), "meet*");
        assert_eq!(sanitize_fts_query("invoice* report"), "invoice* report");
    }

    #[test]
    fn test_drops_unbalanced_quotes() {
        let result = sanitize_fts_query("test\" OR hello");
        assert_eq!(result.matches('"').count() % 2, 0);
        assert!(result.contains("test"));
        assert!(result.contains("hello"));
        assert!(result.contains("OR"));
    }

    #[test]
    fn test_preserves_boolean_operators() {
        assert!(sanitize_fts_query("hello OR world").contains("OR"));
        assert!(sanitize_fts_query("hello AND world").contains("AND"));
        assert!(sanitize_fts_query("hello NOT world").contains("NOT"));
    }

    #[test]
    fn test_escape_all_quotes_every_term() {
        assert_eq!(escape_all_special("test meet"), "\"test\" \"meet\"");
    }

    #[test]
    fn test_escape_all_preserves_operators() {
        assert_eq!(escape_all_special("hello OR world"), "\"hello\" OR \"world\"");
    }

    #[test]
    fn test_escape_all_keeps_terms_separate() {
        let result = escape_all_special("hello world");
        assert_eq!(result.split_whitespace().count(), 2);
    }
}
