//! Helpers for putting SQL into log fields.
//!
//! SQL text goes through [`sanitize_sql`] before it is attached to a tracing
//! event, so literal values (which may be credentials or personal data)
//! never reach the logs.

/// Longest statement text recorded in a log field.
pub const MAX_LOGGED_SQL: usize = 256;

/// Replace string and numeric literals with `?` and cap the length.
#[must_use]
pub fn sanitize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len().min(MAX_LOGGED_SQL));
    let mut chars = sql.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                // Doubled quotes are escapes inside the literal.
                loop {
                    match chars.next() {
                        Some(q) if q == c => {
                            if chars.peek() == Some(&c) {
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                out.push('?');
            }
            d if d.is_ascii_digit() && !continues_word(&out) => {
                while chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_digit() || *n == '.')
                {
                    chars.next();
                }
                out.push('?');
            }
            other => out.push(other),
        }

        if out.len() > MAX_LOGGED_SQL {
            let mut cut = MAX_LOGGED_SQL;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("...");
            break;
        }
    }
    out
}

fn continues_word(text: &str) -> bool {
    text.chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Statement verb used as a low-cardinality log label.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let verb = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();

    const VERBS: &[&str] = &[
        "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "REPLACE", "CALL", "CREATE", "ALTER",
        "DROP", "TRUNCATE", "GRANT", "REVOKE", "COMMIT", "ROLLBACK",
    ];
    VERBS
        .iter()
        .find(|v| v.eq_ignore_ascii_case(verb))
        .copied()
        .unwrap_or("OTHER")
}
