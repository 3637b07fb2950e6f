//! SQL lexing and statement splitting.
//!
//! The lexer understands just enough SQLite syntax to find statement
//! boundaries and bind parameters: literals, quoted identifiers, comments,
//! parameters and a handful of keywords. Everything else is an opaque word
//! or operator.

/// Keywords the splitter and binder care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Begin,
    Case,
    Commit,
    Create,
    Deferred,
    End,
    Exclusive,
    Explain,
    Immediate,
    Rollback,
    Temp,
    Temporary,
    Transaction,
    Trigger,
}

impl Keyword {
    const ALL: [(&'static str, Keyword); 14] = [
        ("BEGIN", Keyword::Begin),
        ("CASE", Keyword::Case),
        ("COMMIT", Keyword::Commit),
        ("CREATE", Keyword::Create),
        ("DEFERRED", Keyword::Deferred),
        ("END", Keyword::End),
        ("EXCLUSIVE", Keyword::Exclusive),
        ("EXPLAIN", Keyword::Explain),
        ("IMMEDIATE", Keyword::Immediate),
        ("ROLLBACK", Keyword::Rollback),
        ("TEMP", Keyword::Temp),
        ("TEMPORARY", Keyword::Temporary),
        ("TRANSACTION", Keyword::Transaction),
        ("TRIGGER", Keyword::Trigger),
    ];

    fn from_word(word: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(word))
            .map(|(_, keyword)| *keyword)
    }
}

/// Lexical class of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Semicolon,
    Keyword(Keyword),
    /// Bare or quoted identifier, or any word that is not a tracked keyword.
    Identifier,
    StringLiteral,
    NumericLiteral,
    BlobLiteral,
    /// `?`, `?NNN`, `:name`, `@name`, `$name` or `#name`.
    Parameter,
    Operator,
    /// `/*` with no closing `*/` before the end of input.
    UnterminatedComment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Byte-oriented lexer. Every token boundary falls on an ASCII byte or the
/// end of input, so slicing the source by token spans is always valid UTF-8.
#[derive(Clone, Debug)]
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.source.as_bytes()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes().get(self.pos + offset).copied()
    }

    fn eat_while(&mut self, predicate: impl Fn(u8) -> bool) {
        while self.peek_at(0).is_some_and(&predicate) {
            self.pos += 1;
        }
    }

    /// Skips whitespace and complete comments. Returns `true` when an
    /// unterminated block comment starts at the current position.
    fn skip_trivia(&mut self) -> bool {
        loop {
            match (self.peek_at(0), self.peek_at(1)) {
                (Some(byte), _) if byte.is_ascii_whitespace() => self.pos += 1,
                (Some(b'-'), Some(b'-')) => self.eat_while(|byte| byte != b'\n'),
                (Some(b'/'), Some(b'*')) => {
                    match self.source[self.pos + 2..].find("*/") {
                        Some(close) => self.pos += 2 + close + 2,
                        None => return true,
                    }
                }
                _ => return false,
            }
        }
    }

    /// Consumes a quoted run closed by `close`, where a doubled `close` is an
    /// escape. Unterminated quotes run to the end of input.
    fn eat_quoted(&mut self, close: u8, doubled_escape: bool) {
        self.pos += 1;
        while let Some(byte) = self.peek_at(0) {
            self.pos += 1;
            if byte == close {
                if doubled_escape && self.peek_at(0) == Some(close) {
                    self.pos += 1;
                    continue;
                }
                return;
            }
        }
    }

    fn eat_number(&mut self) {
        if self.peek_at(0) == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            self.eat_while(|byte| byte.is_ascii_hexdigit());
            return;
        }
        self.eat_while(|byte| byte.is_ascii_digit());
        if self.peek_at(0) == Some(b'.') {
            self.pos += 1;
            self.eat_while(|byte| byte.is_ascii_digit());
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|byte| byte.is_ascii_digit()) {
                self.pos += 1 + sign;
                self.eat_while(|byte| byte.is_ascii_digit());
            }
        }
    }

    fn eat_dollar_parameter_tail(&mut self) {
        loop {
            self.eat_while(is_ident_byte);
            if self.peek_at(0) == Some(b':') && self.peek_at(1) == Some(b':') {
                self.pos += 2;
                continue;
            }
            break;
        }
        if self.peek_at(0) == Some(b'(') {
            if let Some(close) = self.source[self.pos..].find(')') {
                self.pos += close + 1;
            }
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        let unterminated_comment = self.skip_trivia();
        let start = self.pos;
        if unterminated_comment {
            self.pos = self.source.len();
            return Some(Token {
                kind: TokenKind::UnterminatedComment,
                start,
                end: self.pos,
            });
        }
        let first = self.peek_at(0)?;

        let kind = match first {
            b';' => {
                self.pos += 1;
                TokenKind::Semicolon
            }
            b'\'' => {
                self.eat_quoted(b'\'', true);
                TokenKind::StringLiteral
            }
            b'"' | b'`' => {
                self.eat_quoted(first, true);
                TokenKind::Identifier
            }
            b'[' => {
                self.eat_quoted(b']', false);
                TokenKind::Identifier
            }
            b'x' | b'X' if self.peek_at(1) == Some(b'\'') => {
                self.pos += 1;
                self.eat_quoted(b'\'', false);
                TokenKind::BlobLiteral
            }
            b'0'..=b'9' => {
                self.eat_number();
                TokenKind::NumericLiteral
            }
            b'.' if self.peek_at(1).is_some_and(|byte| byte.is_ascii_digit()) => {
                self.eat_number();
                TokenKind::NumericLiteral
            }
            b'?' => {
                self.pos += 1;
                self.eat_while(|byte| byte.is_ascii_digit());
                TokenKind::Parameter
            }
            b':' | b'@' | b'#' if self.peek_at(1).is_some_and(is_ident_byte) => {
                self.pos += 1;
                self.eat_while(is_ident_byte);
                TokenKind::Parameter
            }
            b'$' if self.peek_at(1).is_some_and(is_ident_byte) => {
                self.pos += 1;
                self.eat_dollar_parameter_tail();
                TokenKind::Parameter
            }
            byte if is_ident_start(byte) => {
                self.eat_while(is_ident_byte);
                match Keyword::from_word(&self.source[start..self.pos]) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Identifier,
                }
            }
            _ => {
                self.pos += 1;
                TokenKind::Operator
            }
        };

        Some(Token {
            kind,
            start,
            end: self.pos,
        })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte >= 0x80
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

/// Diagnostic state left behind by the most recent split step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitInfo {
    /// Kind of the last token consumed, `None` if no token was seen.
    pub last_token: Option<TokenKind>,
    /// Input ended inside a `CREATE TRIGGER ... BEGIN` body.
    pub incomplete_trigger: bool,
    /// Input ended inside a `/* ...` comment.
    pub incomplete_comment: bool,
}

impl SplitInfo {
    /// True when the caller should wait for more input before executing.
    pub fn needs_more_input(&self) -> bool {
        self.incomplete_trigger || self.incomplete_comment
    }
}

/// Lazy, restartable iterator over the statements of a script.
///
/// Statements are yielded without their terminating `;` or surrounding
/// trivia; empty statements are skipped.
#[derive(Clone, Debug)]
pub struct StatementSplitter<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    info: SplitInfo,
    done: bool,
}

impl<'a> StatementSplitter<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: Lexer::new(source),
            info: SplitInfo::default(),
            done: false,
        }
    }

    pub fn info(&self) -> SplitInfo {
        self.info
    }

    /// Restarts the iteration from the beginning of the script.
    pub fn rewind(&mut self) {
        *self = Self::new(self.source);
    }

    fn at_create_trigger(&self) -> bool {
        let mut ahead = self.lexer.clone();
        let second = ahead.next_token().map(|token| token.kind);
        let third = ahead.next_token().map(|token| token.kind);
        match (second, third) {
            (Some(TokenKind::Keyword(Keyword::Trigger)), _) => true,
            (
                Some(TokenKind::Keyword(Keyword::Temp | Keyword::Temporary)),
                Some(TokenKind::Keyword(Keyword::Trigger)),
            ) => true,
            _ => false,
        }
    }
}

impl<'a> Iterator for StatementSplitter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }

        let mut start = None;
        let mut end = 0;
        let mut in_trigger = false;
        let mut case_depth = 0usize;

        loop {
            let Some(token) = self.lexer.next_token() else {
                self.done = true;
                break;
            };
            if token.kind == TokenKind::UnterminatedComment {
                self.info.incomplete_comment = true;
                self.done = true;
                break;
            }
            self.info.last_token = Some(token.kind);

            if start.is_none() {
                if token.kind == TokenKind::Semicolon {
                    continue;
                }
                start = Some(token.start);
                in_trigger = token.kind == TokenKind::Keyword(Keyword::Create)
                    && self.at_create_trigger();
            } else if in_trigger {
                // CASE ... END expressions may appear inside the trigger body
                match token.kind {
                    TokenKind::Keyword(Keyword::Case) => case_depth += 1,
                    TokenKind::Keyword(Keyword::End) if case_depth > 0 => case_depth -= 1,
                    TokenKind::Keyword(Keyword::End) => in_trigger = false,
                    _ => {}
                }
            } else if token.kind == TokenKind::Semicolon {
                break;
            }
            end = token.end;
        }

        self.info.incomplete_trigger = in_trigger;
        start.map(|start| &self.source[start..end])
    }
}

/// Splits a whole script, returning the statements and the final split state.
pub fn split_statements(source: &str) -> (Vec<&str>, SplitInfo) {
    let mut splitter = StatementSplitter::new(source);
    let statements = splitter.by_ref().collect();
    (statements, splitter.info())
}

/// Leading keywords of a statement, stopping at the first non-keyword.
pub(crate) fn leading_keywords(sql: &str) -> impl Iterator<Item = Option<Keyword>> + '_ {
    Lexer::new(sql).map(|token| match token.kind {
        TokenKind::Keyword(keyword) => Some(keyword),
        _ => None,
    })
}

/// `EXPLAIN ...` statements may bind fewer values than they reference.
pub(crate) fn is_explain(sql: &str) -> bool {
    matches!(leading_keywords(sql).next(), Some(Some(Keyword::Explain)))
}

/// True for bare `BEGIN`/`COMMIT`/`END`/`ROLLBACK` statements (optionally
/// with `TRANSACTION` or a locking mode), which the chunked executor manages
/// itself. `ROLLBACK TO savepoint` is not transaction control in this sense.
pub(crate) fn is_transaction_control(sql: &str) -> bool {
    let mut keywords = leading_keywords(sql);
    let leading = matches!(
        keywords.next(),
        Some(Some(
            Keyword::Begin | Keyword::Commit | Keyword::End | Keyword::Rollback
        ))
    );
    leading
        && keywords.all(|keyword| {
            matches!(
                keyword,
                Some(
                    Keyword::Transaction
                        | Keyword::Deferred
                        | Keyword::Immediate
                        | Keyword::Exclusive
                )
            )
        })
}

#[cfg(test)]
mod tests {
    use crate::split::{
        is_explain, is_transaction_control, split_statements, Keyword, Lexer, SplitInfo,
        StatementSplitter, TokenKind,
    };

    fn info(last_token: Option<TokenKind>) -> SplitInfo {
        SplitInfo {
            last_token,
            ..SplitInfo::default()
        }
    }

    const TRIGGER: &str = "CREATE TRIGGER update_updated_at AFTER UPDATE ON users FOR EACH ROW BEGIN UPDATE users SET updated_at = 0 WHERE id = NEW.id; END";

    #[test]
    fn empty_inputs_yield_nothing() {
        assert_eq!(split_statements(""), (vec![], info(None)));
        assert_eq!(
            split_statements(";;;;"),
            (vec![], info(Some(TokenKind::Semicolon)))
        );
        assert_eq!(split_statements("-- a simple comment"), (vec![], info(None)));
        assert_eq!(
            split_statements("/* a simple comment \n*/"),
            (vec![], info(None))
        );
    }

    #[test]
    fn single_statements() {
        assert_eq!(
            split_statements("select 1"),
            (vec!["select 1"], info(Some(TokenKind::NumericLiteral)))
        );
        assert_eq!(
            split_statements("select 1 ;"),
            (vec!["select 1"], info(Some(TokenKind::Semicolon)))
        );
        assert_eq!(
            split_statements("select 1; -- ops; a comment with semicolon"),
            (vec!["select 1"], info(Some(TokenKind::Semicolon)))
        );
        assert_eq!(
            split_statements("select 1; /* \nops;\n a comment with semicolon \n*/"),
            (vec!["select 1"], info(Some(TokenKind::Semicolon)))
        );
    }

    #[test]
    fn unterminated_block_comment_needs_more_input() {
        let (statements, split) = split_statements("/* a simple comment\n");
        assert!(statements.is_empty());
        assert_eq!(
            split,
            SplitInfo {
                last_token: None,
                incomplete_trigger: false,
                incomplete_comment: true,
            }
        );

        let (statements, split) = split_statements("select 1 /* \na simple comment\n");
        assert_eq!(statements, vec!["select 1"]);
        assert_eq!(split.last_token, Some(TokenKind::NumericLiteral));
        assert!(split.incomplete_comment);
        assert!(split.needs_more_input());

        let (statements, split) = split_statements("select 1; /* \na simple comment\n");
        assert_eq!(statements, vec!["select 1"]);
        assert_eq!(split.last_token, Some(TokenKind::Semicolon));
        assert!(split.incomplete_comment);
    }

    #[test]
    fn multiple_statements() {
        assert_eq!(
            split_statements("select 1; /* \na simple comment;\n*/ select 2;").0,
            vec!["select 1", "select 2"]
        );
        assert_eq!(
            split_statements("select 1;;;;;; ;;; ; ; ; ; select 2"),
            (
                vec!["select 1", "select 2"],
                info(Some(TokenKind::NumericLiteral))
            )
        );
        assert_eq!(
            split_statements(
                "sdfasdfigosdfg sadfgsd ggsadgf; sdfasdfasd; 1230kfvcasd; 213 dsf s 0 fs229dt"
            ),
            (
                vec![
                    "sdfasdfigosdfg sadfgsd ggsadgf",
                    "sdfasdfasd",
                    "1230kfvcasd",
                    "213 dsf s 0 fs229dt"
                ],
                info(Some(TokenKind::Identifier))
            )
        );
    }

    #[test]
    fn semicolons_inside_literals_do_not_split() {
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('a;b', \"c;d\", [e;f], `g;h`, x'3B'); SELECT 'it''s;'").0,
            vec![
                "INSERT INTO t VALUES ('a;b', \"c;d\", [e;f], `g;h`, x'3B')",
                "SELECT 'it''s;'"
            ]
        );
    }

    #[test]
    fn plain_scripts_match_naive_segment_count() {
        for script in [
            "a; b; c",
            ";a;;b;",
            "  select 1 ;\n select 2;select 3 ; ; ",
            "x",
        ] {
            let naive = script
                .split(';')
                .filter(|segment| !segment.trim().is_empty())
                .count();
            assert_eq!(split_statements(script).0.len(), naive, "script {script:?}");
        }
    }

    #[test]
    fn rejoined_statements_split_the_same_way() {
        let trigger = "CREATE TRIGGER t AFTER INSERT ON a BEGIN UPDATE b SET v = CASE NEW.x WHEN 1 THEN 'a;' ELSE CASE WHEN NEW.y THEN 2 END END; END";
        for (script, expected) in [
            (
                format!("{trigger}; SELECT 1;"),
                vec![trigger, "SELECT 1"],
            ),
            (
                "SELECT [a;b] FROM `c;d`;;SELECT \"e;\" AS [f;]".to_owned(),
                vec!["SELECT [a;b] FROM `c;d`", "SELECT \"e;\" AS [f;]"],
            ),
            (
                "SELECT 1; /* trailing; unterminated".to_owned(),
                vec!["SELECT 1"],
            ),
            (
                "SELECT 1 /* open; comment".to_owned(),
                vec!["SELECT 1"],
            ),
        ] {
            let (statements, _) = split_statements(&script);
            assert_eq!(statements, expected, "script {script:?}");

            let rejoined = statements.join(";\n");
            let (again, split) = split_statements(&rejoined);
            assert_eq!(again, expected, "rejoined {rejoined:?}");
            assert!(!split.needs_more_input(), "rejoined {rejoined:?}");
        }

        let (_, split) = split_statements("SELECT 1; /* trailing; unterminated");
        assert!(split.incomplete_comment);
        assert!(split.needs_more_input());
    }

    #[test]
    fn triggers_keep_their_bodies() {
        assert_eq!(
            split_statements(TRIGGER),
            (vec![TRIGGER], info(Some(TokenKind::Keyword(Keyword::End))))
        );

        let temp = TRIGGER.replacen("CREATE TRIGGER", "create temp trigger", 1);
        assert_eq!(split_statements(&temp).0, vec![temp.as_str()]);

        let script = format!("{TRIGGER}; SELECT 1");
        assert_eq!(split_statements(&script).0, vec![TRIGGER, "SELECT 1"]);
    }

    #[test]
    fn trigger_case_expressions_do_not_end_the_body() {
        let trigger = "CREATE TRIGGER t AFTER INSERT ON a BEGIN UPDATE b SET v = CASE WHEN NEW.x THEN 1 ELSE 0 END; DELETE FROM c; END";
        let script = format!("{trigger};select 2");
        assert_eq!(split_statements(&script).0, vec![trigger, "select 2"]);
    }

    #[test]
    fn incomplete_trigger_is_reported() {
        let partial = &TRIGGER[..TRIGGER.len() - 4];
        let (statements, split) = split_statements(partial);
        assert_eq!(statements, vec![partial]);
        assert_eq!(
            split,
            SplitInfo {
                last_token: Some(TokenKind::Semicolon),
                incomplete_trigger: true,
                incomplete_comment: false,
            }
        );

        let with_comment = format!("{partial} /* this is the trigger;");
        let (statements, split) = split_statements(&with_comment);
        assert_eq!(statements, vec![partial]);
        assert!(split.incomplete_trigger);
        assert!(split.incomplete_comment);
    }

    #[test]
    fn transaction_statements_are_split() {
        let (statements, _) = split_statements(
            "BEGIN TRANSACTION; CREATE TABLE test_table (id INTEGER PRIMARY KEY, value TEXT); INSERT INTO test_table (value) VALUES ('Value 1'); COMMIT;",
        );
        assert_eq!(
            statements,
            vec![
                "BEGIN TRANSACTION",
                "CREATE TABLE test_table (id INTEGER PRIMARY KEY, value TEXT)",
                "INSERT INTO test_table (value) VALUES ('Value 1')",
                "COMMIT"
            ]
        );
    }

    #[test]
    fn splitter_is_lazy_and_restartable() {
        let mut splitter = StatementSplitter::new("select 1; select 2; select 3");
        assert_eq!(splitter.next(), Some("select 1"));
        let fork = splitter.clone();
        assert_eq!(splitter.by_ref().count(), 2);
        assert_eq!(fork.collect::<Vec<_>>(), vec!["select 2", "select 3"]);

        splitter.rewind();
        assert_eq!(splitter.next(), Some("select 1"));
    }

    #[test]
    fn lexes_parameters() {
        let sql = "SELECT ?, ?12, :a, @b, $c::d(e), #f, a:b";
        let params: Vec<&str> = Lexer::new(sql)
            .filter(|token| token.kind == TokenKind::Parameter)
            .map(|token| token.text(sql))
            .collect();
        assert_eq!(params, vec!["?", "?12", ":a", "@b", "$c::d(e)", "#f", ":b"]);
    }

    #[test]
    fn classifies_statements() {
        assert!(is_explain("explain query plan select ?"));
        assert!(!is_explain("select 'explain'"));

        for sql in ["BEGIN", "begin immediate transaction", "COMMIT", "END TRANSACTION", "ROLLBACK"] {
            assert!(is_transaction_control(sql), "{sql}");
        }
        for sql in ["ROLLBACK TO sp1", "BEGIN; SELECT 1", "SELECT 1", "CREATE TABLE begin(x)"] {
            assert!(!is_transaction_control(sql), "{sql}");
        }
    }
}
