//! Query text normalization and kind classification.

/// The classified statement kind of a normalized query, as stored on a
/// cluster. `Ddl` covers CREATE/DROP/ALTER; anything else unrecognized is
/// `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl QueryKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Ddl => "DDL",
            Self::Other => "OTHER",
        }
    }
}

/// Removes `-- line` and `/* block */` comments, replacing each with a
/// single space so adjacent tokens don't get glued together.
fn strip_comments(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '-' && chars.get(i + 1) == Some(&'-') {
            i += 2;
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            out.push(' ');
            continue;
        }
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            out.push(' ');
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Lowercases ASCII, strips comments, collapses whitespace runs to a single
/// space, trims both ends, and drops trailing semicolons. Idempotent:
/// `normalize(normalize(s)) == normalize(s)` for every input.
#[must_use]
pub fn normalize(input: &str) -> String {
    let stripped = strip_comments(input);
    let lowered = stripped.to_ascii_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = true; // trims leading whitespace for free
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    while out.ends_with(';') {
        out.pop();
        while out.ends_with(' ') {
            out.pop();
        }
    }
    out
}

/// Classifies a query by its first token. Expects already-normalized
/// (lowercase) input; an empty string classifies as [`QueryKind::Other`].
#[must_use]
pub fn classify_kind(normalized: &str) -> QueryKind {
    match normalized.split_whitespace().next().unwrap_or("") {
        "select" => QueryKind::Select,
        "insert" => QueryKind::Insert,
        "update" => QueryKind::Update,
        "delete" => QueryKind::Delete,
        "create" | "drop" | "alter" => QueryKind::Ddl,
        _ => QueryKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "SELECT * FROM users WHERE id = 1;",
            "select   *   from   users   where id = 1",
            "-- comment\nSELECT 1",
            "/* block */ SELECT 1 /* trailing */",
            "   \t\n  ",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(&once);
            assert_eq!(once, twice, "input={input:?}");
        }
    }

    #[test]
    fn collapses_whitespace_and_strips_semicolon() {
        assert_eq!(
            normalize("SELECT * FROM users WHERE id = 1;"),
            normalize("select   *   from   users   where id = 1")
        );
    }

    #[test]
    fn strips_line_and_block_comments() {
        assert_eq!(normalize("SELECT 1 -- trailing comment"), "select 1");
        assert_eq!(normalize("SELECT /* mid */ 1"), "select 1");
    }

    #[test]
    fn whitespace_and_comment_only_input_is_empty_other() {
        let normalized = normalize("  -- just a comment\n  ");
        assert!(normalized.is_empty());
        assert_eq!(classify_kind(&normalized), QueryKind::Other);
    }

    #[test]
    fn classifies_ddl_statements() {
        assert_eq!(classify_kind("create table x"), QueryKind::Ddl);
        assert_eq!(classify_kind("drop table x"), QueryKind::Ddl);
        assert_eq!(classify_kind("alter table x"), QueryKind::Ddl);
    }

    #[test]
    fn classifies_dml_statements() {
        assert_eq!(classify_kind("select 1"), QueryKind::Select);
        assert_eq!(classify_kind("insert into x values (1)"), QueryKind::Insert);
        assert_eq!(classify_kind("update x set a = 1"), QueryKind::Update);
        assert_eq!(classify_kind("delete from x"), QueryKind::Delete);
        assert_eq!(classify_kind("vacuum"), QueryKind::Other);
    }
}
