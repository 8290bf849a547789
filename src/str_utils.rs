/// Utility functions for SQL text handling: quote-aware scanning, statement
/// splitting and transaction-keyword detection.
use regex::Regex;

static TRANSACTION_KEYWORD_REGEX: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"(?i)\b(BEGIN|COMMIT|ROLLBACK|SAVEPOINT|START\s+TRANSACTION|END\s+TRANSACTION)\b")
        .unwrap()
});

/// Check if a position in SQL is inside quotes (handles both single and double quotes)
pub fn is_in_quotes(sql: &str, pos: usize) -> bool {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escaped = false;

    for ch in sql.chars().take(pos + 1) {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' => escaped = true,
            '\'' => {
                if !in_double_quote {
                    in_single_quote = !in_single_quote;
                }
            }
            '"' => {
                if !in_single_quote {
                    in_double_quote = !in_double_quote;
                }
            }
            _ => {}
        }
    }

    in_single_quote || in_double_quote
}

/// Split multi-statement SQL into individual statements (respects quote boundaries)
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current_statement = String::new();
    let mut in_string = false;
    let mut string_char = '"';

    for ch in sql.chars() {
        if ch == '"' && !in_string {
            in_string = true;
            string_char = '"';
        } else if ch == '\'' && !in_string {
            in_string = true;
            string_char = '\'';
        } else if ch == string_char && in_string {
            in_string = false;
        } else if ch == ';' && !in_string {
            let trimmed = current_statement.trim();
            if !trimmed.is_empty() {
                statements.push(trimmed.to_string());
            }
            current_statement.clear();
            continue;
        }

        current_statement.push(ch);
    }

    let trimmed = current_statement.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }

    statements
}

/// Find an explicit transaction-control keyword in command text.
/// Word-boundary matched so identifiers like `beginning` do not trip it.
pub fn find_transaction_keyword(sql: &str) -> Option<String> {
    TRANSACTION_KEYWORD_REGEX
        .find(sql)
        .map(|keyword| keyword.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_detection_handles_both_quote_styles() {
        let sql = "select '@not_a_param' from \"tab@le\" where x = @real";
        let first_at = sql.find("@not_a_param").unwrap();
        let second_at = sql.find("tab@le").unwrap() + 3;
        let third_at = sql.find("@real").unwrap();

        assert!(is_in_quotes(sql, first_at));
        assert!(is_in_quotes(sql, second_at));
        assert!(!is_in_quotes(sql, third_at));
    }

    #[test]
    fn split_respects_quoted_semicolons() {
        let statements = split_sql_statements(
            "insert into t values ('a;b'); update t set name = 'x'; select * from t;",
        );
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "insert into t values ('a;b')");
        assert_eq!(statements[2], "select * from t");
    }

    #[test]
    fn split_single_statement_without_terminator() {
        let statements = split_sql_statements("select 1");
        assert_eq!(statements, vec!["select 1".to_string()]);
    }

    #[test]
    fn transaction_keywords_are_word_bounded() {
        assert_eq!(
            find_transaction_keyword("BEGIN; insert into t values (1)"),
            Some("BEGIN".to_string())
        );
        assert_eq!(
            find_transaction_keyword("commit work").as_deref(),
            Some("commit")
        );
        assert_eq!(
            find_transaction_keyword("update t set beginning = 1 where committed_at is null"),
            None
        );
    }
}
