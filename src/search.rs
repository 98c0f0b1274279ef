//! Tag and path search.
//!
//! A query is split into shell-style tokens. An image matches when every
//! token occurs (case-insensitively, as a substring) in its relpath, its
//! filename, or one of its tags. Matches are ordered least-rated first, then
//! by best average, so search naturally surfaces images that need ratings.
//!
//! With `search.mode = "fts"` the trigram index narrows the candidate rows
//! before the substring predicate runs; the predicate is always applied, so
//! both modes return the same rows.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::Result;
use crate::models::SearchHit;

/// Splits a query into tokens with shell-style quoting.
///
/// Whitespace separates tokens, single and double quotes group a span, and a
/// backslash escapes the next character outside single quotes. An
/// unterminated quote falls back to plain whitespace splitting.
pub fn tokenize(query: &str) -> Vec<String> {
    match shell_split(query) {
        Some(tokens) => tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        None => query.split_whitespace().map(str::to_string).collect(),
    }
}

fn shell_split(input: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        other => current.push(other),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => {
                            let next = chars.next()?;
                            if !matches!(next, '"' | '\\') {
                                current.push('\\');
                            }
                            current.push(next);
                        }
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_token = true;
                current.push(chars.next()?);
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Some(tokens)
}

/// Escapes LIKE wildcards so a token matches literally (`ESCAPE '\'`).
pub fn like_escape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// FTS5 MATCH expression narrowing to rows containing every token of at
/// least three characters. `None` when no token is long enough; shorter
/// substrings cannot be answered by the trigram index.
pub fn fts_prefilter(tokens: &[String]) -> Option<String> {
    let phrases: Vec<String> = tokens
        .iter()
        .filter(|t| t.chars().count() >= 3)
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join(" AND "))
    }
}

const TOKEN_PREDICATE: &str = "(i.relpath LIKE ? ESCAPE '\\' \
     OR i.filename LIKE ? ESCAPE '\\' \
     OR EXISTS (SELECT 1 FROM image_tags t WHERE t.relpath = i.relpath AND t.normalized_tag LIKE ? ESCAPE '\\'))";

/// Ordered matches for already-tokenized input, at most `limit` rows.
pub(crate) async fn matching_images(
    pool: &SqlitePool,
    tokens: &[String],
    use_fts: bool,
    limit: i64,
) -> Result<Vec<SearchHit>> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut clauses: Vec<&str> = vec![TOKEN_PREDICATE; tokens.len()];
    let prefilter = if use_fts { fts_prefilter(tokens) } else { None };
    if prefilter.is_some() {
        clauses.push("i.seq IN (SELECT rowid FROM images_fts WHERE images_fts MATCH ?)");
    }

    let sql = format!(
        "SELECT i.relpath, i.id, i.filename, i.category, i.rating_count, i.rating_avg \
         FROM images i WHERE {} \
         ORDER BY i.rating_count ASC, i.rating_avg DESC, i.relpath ASC \
         LIMIT ?",
        clauses.join(" AND ")
    );

    let mut query = sqlx::query_as::<_, (String, String, String, Option<String>, i64, f64)>(&sql);
    for token in tokens {
        let pattern = format!("%{}%", like_escape(token));
        let tag_pattern = format!("%{}%", like_escape(&token.to_lowercase()));
        query = query.bind(pattern.clone()).bind(pattern).bind(tag_pattern);
    }
    if let Some(expr) = prefilter {
        query = query.bind(expr);
    }
    let rows = query.bind(limit).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|(relpath, id, filename, category, count, avg)| SearchHit {
            relpath,
            id,
            filename,
            category,
            count,
            avg,
        })
        .collect())
}

/// Searches by path, filename, and tags. `limit` is clamped to the
/// configured candidate window.
///
/// Tags are compared lowercased, so any letter case matches. Path and
/// filename matching uses SQLite `LIKE`, which folds ASCII letters only:
/// `café` finds a tag `CAFÉ` but not a directory named `CAFÉ`.
pub async fn search(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    limit: i64,
) -> Result<Vec<SearchHit>> {
    let tokens = tokenize(query);
    let limit = limit.clamp(1, config.selection.window);
    matching_images(pool, &tokens, config.search.use_fts(), limit).await
}

pub async fn run_search(config: &Config, query: &str, limit: i64) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let hits = search(&pool, config, query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {} (count {}, avg {:.2})", i + 1, hit.relpath, hit.count, hit.avg);
        println!("    id: {}", hit.id);
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_plain() {
        assert_eq!(tokenize("  sunset   beach "), toks(&["sunset", "beach"]));
    }

    #[test]
    fn test_tokenize_quoted_span_is_one_token() {
        assert_eq!(
            tokenize(r#"sunset "golden hour" 'red sky'"#),
            toks(&["sunset", "golden hour", "red sky"])
        );
    }

    #[test]
    fn test_tokenize_adjacent_quotes_join() {
        assert_eq!(tokenize(r#"pre"fix"ed"#), toks(&["prefixed"]));
    }

    #[test]
    fn test_tokenize_backslash_escape() {
        assert_eq!(tokenize(r"golden\ hour"), toks(&["golden hour"]));
    }

    #[test]
    fn test_tokenize_unterminated_quote_falls_back() {
        assert_eq!(tokenize(r#"it's sunny"#), toks(&["it's", "sunny"]));
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
        assert!(tokenize(r#""""#).is_empty());
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("100%_done\\"), "100\\%\\_done\\\\");
        assert_eq!(like_escape("plain"), "plain");
    }

    #[test]
    fn test_fts_prefilter_skips_short_tokens() {
        assert_eq!(fts_prefilter(&toks(&["a", "ok"])), None);
        assert_eq!(
            fts_prefilter(&toks(&["sunset", "ab", "say \"hi\""])),
            Some("\"sunset\" AND \"say \"\"hi\"\"\"".to_string())
        );
    }
}
