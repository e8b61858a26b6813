//! Keyword-based statement classification and preview translation.
//!
//! The statement is split into tokens with sqlparser's PostgreSQL tokenizer,
//! so keyword searches never match inside string literals, quoted
//! identifiers, comments or sub-queries. No syntax tree is built: only the
//! leading keyword and a handful of clause keywords at the top nesting level
//! are recognized, and previews are rendered from the original source text.

use super::{
    Classification, PreviewError, PreviewStatement, PreviewTranslator, StatementAccess,
    StatementType,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token as SqlToken, Tokenizer};

/// Keywords that make a CTE or EXPLAIN body mutating.
const DATA_MODIFYING: &[&str] = &["INSERT", "UPDATE", "DELETE", "MERGE"];

/// Words that can never be a target table or alias.
const RESERVED: &[&str] = &[
    "AS", "FROM", "ONLY", "RETURNING", "SELECT", "SET", "USING", "VALUES", "WHERE",
];

/// Translator that rewrites UPDATE, DELETE and INSERT into SELECTs.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordTranslator;

impl KeywordTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl PreviewTranslator for KeywordTranslator {
    fn classify(&self, sql: &str) -> Classification {
        let Ok(stmt) = Statement::parse(sql) else {
            return Classification::new(StatementAccess::Mutating, StatementType::Unknown);
        };
        let Some(lead) = stmt.leading_word() else {
            return Classification::new(StatementAccess::Mutating, StatementType::Unknown);
        };

        let statement_type = StatementType::from_keyword(stmt.text(lead));
        let single = !stmt.has_statement_separator();

        let read_only = single
            && match statement_type {
                // SELECT ... INTO creates a table
                StatementType::Select => stmt.find_keyword(lead, &["INTO"]).is_none(),
                StatementType::Show | StatementType::Values | StatementType::Table => true,
                StatementType::Explain => !stmt.contains_word(&["ANALYZE", "ANALYSE"]),
                StatementType::With => !stmt.contains_word(DATA_MODIFYING),
                _ => false,
            };

        let access = if read_only {
            StatementAccess::ReadOnly
        } else {
            StatementAccess::Mutating
        };
        Classification::new(access, statement_type)
    }

    fn translate(&self, sql: &str) -> Result<PreviewStatement, PreviewError> {
        let stmt = Statement::parse(sql)?;
        if stmt.tokens.is_empty() {
            return Err(PreviewError::Empty);
        }
        if stmt.has_statement_separator() {
            return Err(PreviewError::MultipleStatements);
        }

        let lead = stmt
            .leading_word()
            .ok_or(PreviewError::Unsupported(StatementType::Unknown))?;
        let statement_type = StatementType::from_keyword(stmt.text(lead));
        if lead != 0 {
            return Err(PreviewError::Unsupported(statement_type));
        }

        let preview = match statement_type {
            StatementType::Update => stmt.update_preview()?,
            StatementType::Delete => stmt.delete_preview()?,
            StatementType::Insert => stmt.insert_preview()?,
            other => return Err(PreviewError::Unsupported(other)),
        };

        renumber_placeholders(&preview)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Param,
    Literal,
    Number,
    LParen,
    RParen,
    Semicolon,
    Symbol,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    /// Parenthesis nesting level the token sits at.
    depth: usize,
    /// Word followed by a `.` that still awaits the next name part.
    qualified: bool,
}

struct Statement<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
}

impl<'a> Statement<'a> {
    fn parse(sql: &'a str) -> Result<Self, PreviewError> {
        let mut tokens = tokenize(sql)?;
        while tokens
            .last()
            .is_some_and(|t| t.kind == TokenKind::Semicolon)
        {
            tokens.pop();
        }
        Ok(Self { sql, tokens })
    }

    fn text(&self, idx: usize) -> &'a str {
        let token = self.tokens[idx];
        &self.sql[token.start..token.end]
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }

    fn is_word(&self, idx: usize, keyword: &str) -> bool {
        idx < self.len()
            && self.tokens[idx].kind == TokenKind::Word
            && self.text(idx).eq_ignore_ascii_case(keyword)
    }

    /// Index of the first statement keyword, skipping opening parentheses.
    fn leading_word(&self) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| t.kind != TokenKind::LParen)
            .filter(|&idx| self.tokens[idx].kind == TokenKind::Word)
    }

    fn has_statement_separator(&self) -> bool {
        self.tokens.iter().any(|t| t.kind == TokenKind::Semicolon)
    }

    /// Any of `keywords` at any nesting level.
    fn contains_word(&self, keywords: &[&str]) -> bool {
        (0..self.len()).any(|idx| keywords.iter().any(|kw| self.is_word(idx, kw)))
    }

    /// First top-level occurrence of any of `keywords` at or after `from`.
    fn find_keyword(&self, from: usize, keywords: &[&str]) -> Option<usize> {
        self.find_keyword_before(from, self.len(), keywords)
    }

    fn find_keyword_before(&self, from: usize, to: usize, keywords: &[&str]) -> Option<usize> {
        (from..to).find(|&idx| {
            self.tokens[idx].depth == 0 && keywords.iter().any(|kw| self.is_word(idx, kw))
        })
    }

    fn is_identifier(&self, idx: usize) -> bool {
        idx < self.len()
            && self.tokens[idx].kind == TokenKind::Word
            && !RESERVED.iter().any(|kw| self.is_word(idx, kw))
    }

    fn matching_paren(&self, open: usize) -> Option<usize> {
        let depth = self.tokens[open].depth;
        (open + 1..self.len())
            .find(|&idx| self.tokens[idx].kind == TokenKind::RParen && self.tokens[idx].depth == depth)
    }

    /// Renders tokens `[from, to)` with comments dropped and each run of
    /// whitespace collapsed to a single space.
    fn render(&self, from: usize, to: usize) -> String {
        let mut out = String::new();
        for idx in from..to {
            if idx > from && self.tokens[idx].start > self.tokens[idx - 1].end {
                out.push(' ');
            }
            out.push_str(self.text(idx));
        }
        out
    }

    /// Optional `[AS] alias` between the target table and the next clause.
    fn alias(&self, from: usize, to: usize) -> Option<String> {
        match to.checked_sub(from)? {
            0 => Some(String::new()),
            1 if self.is_identifier(from) => Some(self.render(from, to)),
            2 if self.is_word(from, "AS") && self.is_identifier(from + 1) => {
                Some(self.render(from, to))
            }
            _ => None,
        }
    }

    fn target(&self, idx: usize, statement: StatementType) -> Result<String, PreviewError> {
        if self.is_identifier(idx) {
            Ok(self.text(idx).to_string())
        } else {
            Err(PreviewError::MissingTarget(statement))
        }
    }

    /// `UPDATE [ONLY] t [[AS] a] SET … [WHERE c] [RETURNING …]`
    fn update_preview(&self) -> Result<String, PreviewError> {
        let mut idx = 1;
        if self.is_word(idx, "ONLY") {
            idx += 1;
        }
        let table = self.target(idx, StatementType::Update)?;

        let set = self
            .find_keyword(idx + 1, &["SET"])
            .ok_or(PreviewError::MissingTarget(StatementType::Update))?;
        let alias = self
            .alias(idx + 1, set)
            .ok_or(PreviewError::MissingTarget(StatementType::Update))?;

        let end = self.find_keyword(set, &["RETURNING"]).unwrap_or(self.len());
        if self.find_keyword_before(set, end, &["FROM"]).is_some() {
            return Err(PreviewError::UnsupportedClause {
                statement: StatementType::Update,
                clause: "FROM".to_string(),
            });
        }

        let condition = self
            .find_keyword_before(set, end, &["WHERE"])
            .map(|where_idx| self.render(where_idx, end));

        Ok(select_from(&table, &alias, condition.as_deref()))
    }

    /// `DELETE FROM [ONLY] t [[AS] a] [WHERE c] [RETURNING …]`
    fn delete_preview(&self) -> Result<String, PreviewError> {
        if !self.is_word(1, "FROM") {
            return Err(PreviewError::MissingTarget(StatementType::Delete));
        }
        let mut idx = 2;
        if self.is_word(idx, "ONLY") {
            idx += 1;
        }
        let table = self.target(idx, StatementType::Delete)?;

        let end = self
            .find_keyword(idx + 1, &["RETURNING"])
            .unwrap_or(self.len());
        if self.find_keyword_before(idx + 1, end, &["USING"]).is_some() {
            return Err(PreviewError::UnsupportedClause {
                statement: StatementType::Delete,
                clause: "USING".to_string(),
            });
        }

        let where_idx = self.find_keyword_before(idx + 1, end, &["WHERE"]);
        let alias = self
            .alias(idx + 1, where_idx.unwrap_or(end))
            .ok_or(PreviewError::MissingTarget(StatementType::Delete))?;
        let condition = where_idx.map(|where_idx| self.render(where_idx, end));

        Ok(select_from(&table, &alias, condition.as_deref()))
    }

    /// `INSERT INTO t [AS a] [(cols)] {VALUES … | SELECT …} [ON CONFLICT …] [RETURNING …]`
    ///
    /// The preview reports the rows that would be inserted.
    fn insert_preview(&self) -> Result<String, PreviewError> {
        if !self.is_word(1, "INTO") {
            return Err(PreviewError::MissingTarget(StatementType::Insert));
        }
        self.target(2, StatementType::Insert)?;

        let mut idx = 3;
        if self.is_word(idx, "AS") {
            idx += 2;
        }

        let mut columns = String::new();
        if idx < self.len() && self.tokens[idx].kind == TokenKind::LParen && !self.starts_query(idx + 1)
        {
            let close = self
                .matching_paren(idx)
                .ok_or(PreviewError::Unterminated("parenthesis"))?;
            columns = self.render(idx, close + 1);
            idx = close + 1;
        }

        let end = self.insert_body_end(idx);

        if self.is_word(idx, "VALUES") {
            let mut sql = format!("SELECT * FROM ({}) AS preview", self.render(idx, end));
            if !columns.is_empty() {
                sql.push(' ');
                sql.push_str(&columns);
            }
            Ok(sql)
        } else if self.starts_query(idx) {
            Ok(self.render(idx, end))
        } else if self.is_word(idx, "DEFAULT") || self.is_word(idx, "OVERRIDING") {
            Err(PreviewError::UnsupportedClause {
                statement: StatementType::Insert,
                clause: self.text(idx).to_ascii_uppercase(),
            })
        } else {
            Err(PreviewError::Unsupported(StatementType::Insert))
        }
    }

    /// True if the tokens at `idx` open a sub-query (`SELECT`, `WITH`, or `(SELECT …`).
    fn starts_query(&self, idx: usize) -> bool {
        let mut idx = idx;
        while idx < self.len() && self.tokens[idx].kind == TokenKind::LParen {
            idx += 1;
        }
        self.is_word(idx, "SELECT") || self.is_word(idx, "WITH")
    }

    fn insert_body_end(&self, from: usize) -> usize {
        (from..self.len())
            .find(|&idx| {
                self.tokens[idx].depth == 0
                    && (self.is_word(idx, "RETURNING")
                        || (self.is_word(idx, "ON") && self.is_word(idx + 1, "CONFLICT")))
            })
            .unwrap_or(self.len())
    }
}

fn select_from(table: &str, alias: &str, condition: Option<&str>) -> String {
    let mut sql = format!("SELECT * FROM {table}");
    if !alias.is_empty() {
        sql.push(' ');
        sql.push_str(alias);
    }
    if let Some(condition) = condition {
        sql.push(' ');
        sql.push_str(condition);
    }
    sql
}

/// Renumbers the placeholders of `sql` to `$1…$k` in order of first appearance.
fn renumber_placeholders(sql: &str) -> Result<PreviewStatement, PreviewError> {
    let tokens = tokenize(sql)?;
    let mut out = String::with_capacity(sql.len());
    let mut positions: Vec<usize> = Vec::new();
    let mut last = 0;

    for token in tokens.iter().filter(|t| t.kind == TokenKind::Param) {
        let Some(original) = sql[token.start + 1..token.end]
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
        else {
            continue;
        };

        let slot = match positions.iter().position(|&p| p == original - 1) {
            Some(slot) => slot,
            None => {
                positions.push(original - 1);
                positions.len() - 1
            }
        };

        out.push_str(&sql[last..token.start]);
        out.push('$');
        out.push_str(&(slot + 1).to_string());
        last = token.end;
    }
    out.push_str(&sql[last..]);

    Ok(PreviewStatement {
        sql: out,
        parameter_positions: positions,
    })
}

/// Splits `sql` into tokens with byte spans, dropping whitespace and comments.
///
/// Adjacent `name.name` words are merged so qualified names are one token.
fn tokenize(sql: &str) -> Result<Vec<Token>, PreviewError> {
    let dialect = PostgreSqlDialect {};
    let raw = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| PreviewError::Tokenize(e.to_string()))?;

    let mut offsets = SpanCursor::new(sql);
    let starts: Vec<usize> = raw.iter().map(|t| offsets.byte_offset(&t.location)).collect();

    let mut tokens: Vec<Token> = Vec::new();
    let mut depth = 0usize;

    for (idx, item) in raw.iter().enumerate() {
        let start = starts[idx];
        let end = starts.get(idx + 1).copied().unwrap_or(sql.len());

        let kind = match &item.token {
            SqlToken::Whitespace(_) => continue,
            SqlToken::Word(_) => {
                if let Some(prev) = tokens.last_mut() {
                    if prev.kind == TokenKind::Word && prev.qualified && prev.end == start {
                        prev.end = end;
                        prev.qualified = false;
                        continue;
                    }
                }
                TokenKind::Word
            }
            SqlToken::Period => {
                if let Some(prev) = tokens.last_mut() {
                    let next_is_word =
                        matches!(raw.get(idx + 1).map(|t| &t.token), Some(SqlToken::Word(_)));
                    if prev.kind == TokenKind::Word && prev.end == start && next_is_word {
                        prev.end = end;
                        prev.qualified = true;
                        continue;
                    }
                }
                TokenKind::Symbol
            }
            SqlToken::Placeholder(p) if is_positional(p) => TokenKind::Param,
            SqlToken::SingleQuotedString(_)
            | SqlToken::EscapedStringLiteral(_)
            | SqlToken::NationalStringLiteral(_)
            | SqlToken::HexStringLiteral(_)
            | SqlToken::DollarQuotedString(_) => TokenKind::Literal,
            SqlToken::Number(_, _) => TokenKind::Number,
            SqlToken::LParen => {
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    start,
                    end,
                    depth,
                    qualified: false,
                });
                depth += 1;
                continue;
            }
            SqlToken::RParen => {
                depth = depth.saturating_sub(1);
                TokenKind::RParen
            }
            SqlToken::SemiColon => TokenKind::Semicolon,
            _ => TokenKind::Symbol,
        };

        tokens.push(Token {
            kind,
            start,
            end,
            depth,
            qualified: false,
        });
    }

    Ok(tokens)
}

/// `$n` with a positive index.
fn is_positional(placeholder: &str) -> bool {
    placeholder
        .strip_prefix('$')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Converts the tokenizer's 1-based line/column positions (columns count
/// characters) into byte offsets. Positions must be visited in order.
struct SpanCursor<'a> {
    sql: &'a str,
    line: u64,
    column: u64,
    offset: usize,
}

impl<'a> SpanCursor<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    fn byte_offset(&mut self, location: &Location) -> usize {
        let sql = self.sql;
        for ch in sql[self.offset..].chars() {
            if (self.line, self.column) >= (location.line, location.column) {
                break;
            }
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.offset += ch.len_utf8();
        }
        self.offset
    }
}
