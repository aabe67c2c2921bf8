//! SQL insert-statement dump codec
//!
//! Format:
//! ```text
//! INSERT INTO "Items" ("Id", "OwnerId", "Name") VALUES (7, 42, 'it''s mine');
//! -- Error exporting from Ratings: no such table: Ratings
//! ```
//!
//! The output is a serialization format, never executed against the source
//! store. Every literal re-parses to the exact value it came from.

use crate::dump::{Dump, DumpEntry, DumpRecord};
use crate::error::{ProtoError, ProtoResult};
use crate::value::Value;

/// Render a dump as one statement or comment per line
pub fn to_sql(dump: &Dump) -> String {
    let mut out = String::new();
    for entry in &dump.entries {
        match entry {
            DumpEntry::Row(record) => write_insert(&mut out, record),
            DumpEntry::Comment(text) => {
                out.push_str("-- ");
                out.push_str(&text.replace(['\r', '\n'], " "));
            }
        }
        out.push('\n');
    }
    out
}

fn write_insert(out: &mut String, record: &DumpRecord) {
    out.push_str("INSERT INTO ");
    out.push_str(&quote_ident(&record.table));
    out.push_str(" (");
    for (i, column) in record.columns.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&quote_ident(column));
    }
    out.push_str(") VALUES (");
    for (i, value) in record.values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&literal(value));
    }
    out.push_str(");");
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a value as a SQL literal
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        // Debug keeps a decimal point ("1.0") so reals never re-parse as integers
        Value::Real(f) => format!("{f:?}"),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Blob(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
    }
}

/// Parse text produced by [`to_sql`]
pub fn parse_sql(input: &str) -> ProtoResult<Dump> {
    let mut parser = Parser::new(input);
    let mut dump = Dump::new();

    loop {
        parser.skip_whitespace();
        if parser.at_end() {
            break;
        }
        if parser.eat("--") {
            let text = parser.rest_of_line();
            dump.push_comment(text.strip_prefix(' ').unwrap_or(&text));
            continue;
        }
        dump.push_row(parser.insert_statement()?);
    }

    Ok(dump)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ProtoError {
        ProtoError::DumpParse {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// Consume `token` if it comes next (case-insensitive)
    fn eat(&mut self, token: &str) -> bool {
        let len = token.chars().count();
        if self.pos + len > self.chars.len() {
            return false;
        }
        let matches = self.chars[self.pos..self.pos + len]
            .iter()
            .zip(token.chars())
            .all(|(a, b)| a.eq_ignore_ascii_case(&b));
        if matches {
            for _ in 0..len {
                self.bump();
            }
        }
        matches
    }

    fn expect(&mut self, token: &str) -> ProtoResult<()> {
        self.skip_whitespace();
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{token}`")))
        }
    }

    fn rest_of_line(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.bump();
        }
        if text.ends_with('\r') {
            text.pop();
        }
        text
    }

    fn insert_statement(&mut self) -> ProtoResult<DumpRecord> {
        self.expect("INSERT")?;
        self.expect("INTO")?;
        self.skip_whitespace();
        let table = self.quoted('"')?;

        self.expect("(")?;
        let columns = self.list(|p| p.quoted('"'))?;
        self.expect("VALUES")?;
        self.expect("(")?;
        let values = self.list(Self::value)?;
        self.expect(";")?;

        if columns.len() != values.len() {
            return Err(self.error(format!(
                "{} columns but {} values for {table}",
                columns.len(),
                values.len()
            )));
        }

        Ok(DumpRecord {
            table,
            columns,
            values,
        })
    }

    /// Comma-separated items up to the closing paren; `()` is an empty list
    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> ProtoResult<T>,
    ) -> ProtoResult<Vec<T>> {
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.eat(")") {
            return Ok(items);
        }
        loop {
            self.skip_whitespace();
            items.push(item(self)?);
            self.skip_whitespace();
            if !self.eat(",") {
                self.expect(")")?;
                return Ok(items);
            }
        }
    }

    /// Read a `quote`-delimited token where a doubled quote is a literal quote
    fn quoted(&mut self, quote: char) -> ProtoResult<String> {
        if self.peek() != Some(quote) {
            return Err(self.error(format!("expected {quote}")));
        }
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        out.push(quote);
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated quoted token")),
            }
        }
    }

    fn value(&mut self) -> ProtoResult<Value> {
        match self.peek() {
            Some('\'') => Ok(Value::Text(self.quoted('\'')?)),
            Some('X') | Some('x') if self.chars.get(self.pos + 1) == Some(&'\'') => {
                self.bump();
                let hex_text = self.quoted('\'')?;
                let bytes = hex::decode(&hex_text)
                    .map_err(|e| self.error(format!("invalid blob literal: {e}")))?;
                Ok(Value::Blob(bytes))
            }
            Some(_) => {
                let token = self.bare_token();
                if token.eq_ignore_ascii_case("NULL") {
                    return Ok(Value::Null);
                }
                number(&token).ok_or_else(|| self.error(format!("invalid literal `{token}`")))
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn bare_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' || c == ')' {
                break;
            }
            token.push(c);
            self.bump();
        }
        token
    }
}

fn number(token: &str) -> Option<Value> {
    let is_real = token.contains(['.', 'e', 'E'])
        || matches!(token, "inf" | "-inf" | "NaN");
    if is_real {
        token.parse::<f64>().ok().map(Value::Real)
    } else {
        token.parse::<i64>().ok().map(Value::Integer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(values: Vec<Value>) -> DumpRecord {
        let columns = (0..values.len()).map(|i| format!("c{i}")).collect();
        DumpRecord::new("T", columns, values)
    }

    #[test]
    fn test_text_quotes_are_doubled() {
        assert_eq!(literal(&Value::Text("it's mine".into())), "'it''s mine'");
    }

    #[test]
    fn test_null_distinct_from_text_null() {
        assert_eq!(literal(&Value::Null), "NULL");
        assert_eq!(literal(&Value::Text("NULL".into())), "'NULL'");
        assert_eq!(literal(&Value::Text(String::new())), "''");
    }

    #[test]
    fn test_real_keeps_decimal_point() {
        assert_eq!(literal(&Value::Real(1.0)), "1.0");
        assert_eq!(literal(&Value::Integer(1)), "1");
    }

    #[test]
    fn test_blob_literal() {
        assert_eq!(literal(&Value::Blob(vec![0x0a, 0xff])), "X'0AFF'");
    }

    #[test]
    fn test_identifier_quotes_are_doubled() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_insert_line_shape() {
        let mut dump = Dump::new();
        dump.push_row(DumpRecord::new(
            "Items",
            vec!["id".into(), "OwnerId".into(), "name".into()],
            vec![
                Value::Integer(7),
                Value::Integer(42),
                Value::Text("it's mine".into()),
            ],
        ));
        assert_eq!(
            to_sql(&dump),
            "INSERT INTO \"Items\" (\"id\", \"OwnerId\", \"name\") VALUES (7, 42, 'it''s mine');\n"
        );
    }

    #[test]
    fn test_comment_newlines_folded() {
        let mut dump = Dump::new();
        dump.push_comment("Error exporting from X:\nline two");
        assert_eq!(to_sql(&dump), "-- Error exporting from X: line two\n");
    }

    #[test]
    fn test_reparse_tricky_text() {
        let tricky = [
            "it's mine",
            "''",
            "NULL",
            "",
            "multi\nline\r\nvalue",
            "semi; colon, paren) -- not a comment",
            "nul\0byte",
            "\"double\"",
        ];
        let mut dump = Dump::new();
        for text in tricky {
            dump.push_row(record(vec![Value::Text(text.to_string()), Value::Null]));
        }

        let parsed = parse_sql(&to_sql(&dump)).unwrap();
        assert_eq!(parsed, dump);
    }

    #[test]
    fn test_reparse_numbers_and_blobs() {
        let dump = {
            let mut d = Dump::new();
            d.push_row(record(vec![
                Value::Integer(i64::MIN),
                Value::Integer(0),
                Value::Real(-2.5e-10),
                Value::Real(3.0),
                Value::Blob(vec![]),
                Value::Blob(vec![1, 2, 3]),
            ]));
            d
        };
        assert_eq!(parse_sql(&to_sql(&dump)).unwrap(), dump);
    }

    #[test]
    fn test_empty_record_reparses() {
        let mut dump = Dump::new();
        dump.push_row(DumpRecord::new("Secrets", vec![], vec![]));
        dump.push_row(record(vec![Value::Integer(1)]));

        let text = to_sql(&dump);
        assert!(text.starts_with("INSERT INTO \"Secrets\" () VALUES ();\n"));
        assert_eq!(parse_sql(&text).unwrap(), dump);
    }

    #[test]
    fn test_parse_rejects_arity_mismatch() {
        let err = parse_sql("INSERT INTO \"T\" (\"a\", \"b\") VALUES (1);\n").unwrap_err();
        assert!(matches!(err, ProtoError::DumpParse { line: 1, .. }));
    }

    #[test]
    fn test_parse_rejects_unterminated_text() {
        assert!(parse_sql("INSERT INTO \"T\" (\"a\") VALUES ('oops);\n").is_err());
    }
}
