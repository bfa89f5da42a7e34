//! Script lexer: source text to token stream.
//!
//! Blocks are indentation based. A line indented by a multiple of four
//! columns (a tab counts as four) opens or closes blocks; any other
//! indentation continues the previous line. Newlines inside parentheses or
//! brackets are ignored.
//!
//! `[` directly after an identifier, literal, `)` or `]` (no whitespace) is
//! the history-reference operator; elsewhere it opens a tuple.

use crate::domain::error::LexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Varip,
    If,
    Else,
    For,
    To,
    By,
    While,
    Switch,
    And,
    Or,
    Not,
    True,
    False,
    Break,
    Continue,
    Const,
    Simple,
    Series,
    Import,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let kw = match word {
            "var" => Keyword::Var,
            "varip" => Keyword::Varip,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "to" => Keyword::To,
            "by" => Keyword::By,
            "while" => Keyword::While,
            "switch" => Keyword::Switch,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "const" => Keyword::Const,
            "simple" => Keyword::Simple,
            "series" => Keyword::Series,
            "import" => Keyword::Import,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    Reassign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Question,
    Colon,
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident,
    Int(i64),
    Float(f64),
    Str(String),
    Color(String),
    Keyword(Keyword),
    Op(Op),
    LParen,
    RParen,
    LBracket,
    HistoryOpen,
    RBracket,
    Comma,
    Dot,
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: usize,
}

impl Token {
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indented block".to_string(),
            TokenKind::Dedent => "end of block".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("'{}'", self.lexeme),
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input,
            pos: 0,
            tokens: Vec::new(),
            indents: vec![0],
            depth: 0,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.remaining().chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            lexeme: self.input[start..self.pos].to_string(),
            position: start,
        });
    }

    fn push_layout(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            lexeme: String::new(),
            position: self.pos,
        });
    }

    fn last_is_layout(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        )
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        self.handle_line_start();
        while let Some(ch) = self.peek() {
            match ch {
                '\n' => {
                    self.advance();
                    if self.depth == 0 {
                        self.handle_line_start();
                    }
                }
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '/' if self.peek_second() == Some('/') => self.skip_comment(),
                '0'..='9' => self.number()?,
                '.' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                '"' | '\'' => self.string(ch)?,
                '#' => self.color()?,
                c if c.is_alphabetic() || c == '_' => self.word(),
                _ => self.symbol()?,
            }
        }
        if !self.last_is_layout() {
            self.push_layout(TokenKind::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push_layout(TokenKind::Dedent);
        }
        self.push_layout(TokenKind::Eof);
        Ok(self.tokens)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Measure indentation of the line starting at `pos` and emit layout
    /// tokens. Blank and comment-only lines are skipped entirely.
    fn handle_line_start(&mut self) {
        loop {
            let mut width = 0;
            let line_start = self.pos;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width += 4,
                    _ => break,
                }
                self.advance();
            }
            match self.peek() {
                None => return,
                Some('\n') | Some('\r') => {
                    self.skip_comment();
                    if self.peek().is_some() {
                        self.advance();
                    }
                    continue;
                }
                Some('/') if self.peek_second() == Some('/') => {
                    self.skip_comment();
                    if self.peek().is_some() {
                        self.advance();
                    }
                    continue;
                }
                _ => {}
            }

            let current = *self.indents.last().unwrap_or(&0);
            if width % 4 != 0 && !self.tokens.is_empty() {
                // continuation of the previous logical line
                return;
            }
            if !self.last_is_layout() {
                self.push_layout(TokenKind::Newline);
            }
            if width > current {
                self.indents.push(width);
                self.tokens.push(Token {
                    kind: TokenKind::Indent,
                    lexeme: String::new(),
                    position: line_start,
                });
            } else {
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    self.push_layout(TokenKind::Dedent);
                }
            }
            return;
        }
    }

    fn number(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_second().is_none_or(|c| c.is_ascii_digit() || !c.is_alphabetic()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }
        let text = &self.input[start..self.pos];
        // Integer literals past i64 range are kept as floats.
        let kind = match text.parse::<i64>() {
            Ok(v) if !is_float => Some(TokenKind::Int(v)),
            _ => text.parse::<f64>().map(TokenKind::Float).ok(),
        };
        match kind {
            Some(kind) => {
                self.push(kind, start);
                Ok(())
            }
            None => Err(LexError {
                position: start,
                unexpected: text.chars().next().unwrap_or('0'),
            }),
        }
    }

    fn string(&mut self, quote: char) -> Result<(), LexError> {
        let start = self.pos;
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(LexError {
                        position: start,
                        unexpected: quote,
                    });
                }
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => {
                        return Err(LexError {
                            position: start,
                            unexpected: quote,
                        });
                    }
                },
                Some(c) if c == quote => break,
                Some(c) => value.push(c),
            }
        }
        self.push(TokenKind::Str(value), start);
        Ok(())
    }

    fn color(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        self.advance();
        let digits_start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.advance();
        }
        let digits = self.pos - digits_start;
        if digits != 6 && digits != 8 {
            return Err(LexError {
                position: start,
                unexpected: '#',
            });
        }
        let value = self.input[start..self.pos].to_string();
        self.push(TokenKind::Color(value), start);
        Ok(())
    }

    fn word(&mut self) {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let kind = match Keyword::from_word(&self.input[start..self.pos]) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident,
        };
        self.push(kind, start);
    }

    fn adjacent_to_operand(&self, start: usize) -> bool {
        let Some(last) = self.tokens.last() else {
            return false;
        };
        let touching = last.position + last.lexeme.len() == start;
        let operand = matches!(
            last.kind,
            TokenKind::Ident
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Keyword(Keyword::True)
                | TokenKind::Keyword(Keyword::False)
        );
        touching && operand
    }

    fn symbol(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let ch = self.peek().unwrap_or('\0');
        let two = |second: char| self.peek_second() == Some(second);
        let (kind, len) = match ch {
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            '[' if self.adjacent_to_operand(start) => (TokenKind::HistoryOpen, 1),
            '[' => (TokenKind::LBracket, 1),
            ']' => (TokenKind::RBracket, 1),
            ',' => (TokenKind::Comma, 1),
            '.' => (TokenKind::Dot, 1),
            '?' => (TokenKind::Op(Op::Question), 1),
            ':' if two('=') => (TokenKind::Op(Op::Reassign), 2),
            ':' => (TokenKind::Op(Op::Colon), 1),
            '=' if two('=') => (TokenKind::Op(Op::Eq), 2),
            '=' if two('>') => (TokenKind::Op(Op::Arrow), 2),
            '=' => (TokenKind::Op(Op::Assign), 1),
            '!' if two('=') => (TokenKind::Op(Op::NotEq), 2),
            '<' if two('=') => (TokenKind::Op(Op::Le), 2),
            '<' => (TokenKind::Op(Op::Lt), 1),
            '>' if two('=') => (TokenKind::Op(Op::Ge), 2),
            '>' => (TokenKind::Op(Op::Gt), 1),
            '+' if two('=') => (TokenKind::Op(Op::PlusAssign), 2),
            '+' => (TokenKind::Op(Op::Plus), 1),
            '-' if two('=') => (TokenKind::Op(Op::MinusAssign), 2),
            '-' => (TokenKind::Op(Op::Minus), 1),
            '*' if two('=') => (TokenKind::Op(Op::StarAssign), 2),
            '*' => (TokenKind::Op(Op::Star), 1),
            '/' if two('=') => (TokenKind::Op(Op::SlashAssign), 2),
            '/' => (TokenKind::Op(Op::Slash), 1),
            '%' if two('=') => (TokenKind::Op(Op::PercentAssign), 2),
            '%' => (TokenKind::Op(Op::Percent), 1),
            other => {
                return Err(LexError {
                    position: start,
                    unexpected: other,
                });
            }
        };
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::HistoryOpen => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += len;
        self.push(kind, start);
        Ok(())
    }
}

/// Tokenize `source`. The stream always ends with `Eof`, and every logical
/// line ends with `Newline`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn oversized_integer_becomes_float() {
        let tokens = tokenize("x = 99999999999999999999999\n").unwrap();
        assert!(matches!(tokens[2].kind, TokenKind::Float(v) if (v - 1e23).abs() < 1e9));
        let tokens = tokenize("x = 9223372036854775807\n").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Int(i64::MAX));
    }

    #[test]
    fn numbers_and_identifiers() {
        assert_eq!(
            kinds("x = 12 + 3.5"),
            vec![
                TokenKind::Ident,
                TokenKind::Op(Op::Assign),
                TokenKind::Int(12),
                TokenKind::Op(Op::Plus),
                TokenKind::Float(3.5),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reassign_and_compound_operators() {
        let k = kinds("a := 1\nb += 2");
        assert!(k.contains(&TokenKind::Op(Op::Reassign)));
        assert!(k.contains(&TokenKind::Op(Op::PlusAssign)));
    }

    #[test]
    fn history_bracket_is_distinguished_from_tuple() {
        let k = kinds("[a, b] = f(close[1])");
        assert_eq!(k[0], TokenKind::LBracket);
        assert!(k.contains(&TokenKind::HistoryOpen));
    }

    #[test]
    fn keywords_are_recognized() {
        let k = kinds("var x = not true and false");
        assert_eq!(k[0], TokenKind::Keyword(Keyword::Var));
        assert!(k.contains(&TokenKind::Keyword(Keyword::Not)));
        assert!(k.contains(&TokenKind::Keyword(Keyword::And)));
    }

    #[test]
    fn comments_are_skipped() {
        let k = kinds("//@version=5\n// note\nx = 1 // trailing\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident,
                TokenKind::Op(Op::Assign),
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        let k = kinds(r#"t = "a \"b\"" + 'c'"#);
        assert!(k.contains(&TokenKind::Str("a \"b\"".to_string())));
        assert!(k.contains(&TokenKind::Str("c".to_string())));
    }

    #[test]
    fn indentation_produces_blocks() {
        let k = kinds("if c\n    x := 1\ny = 2\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Ident,
                TokenKind::Op(Op::Reassign),
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Ident,
                TokenKind::Op(Op::Assign),
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn odd_indentation_continues_line() {
        let k = kinds("x = 1 +\n  2\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident,
                TokenKind::Op(Op::Assign),
                TokenKind::Int(1),
                TokenKind::Op(Op::Plus),
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_parens_are_ignored() {
        let k = kinds("f(1,\n    2)\n");
        assert!(!k[..k.len() - 2].contains(&TokenKind::Newline));
    }

    #[test]
    fn unexpected_character_reports_position() {
        let err = tokenize("x = 1 $ 2").unwrap_err();
        assert_eq!(err.position, 6);
        assert_eq!(err.unexpected, '$');
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(tokenize("x = \"abc").is_err());
    }

    #[test]
    fn color_literal() {
        let k = kinds("c = #FF0000");
        assert!(k.contains(&TokenKind::Color("#FF0000".to_string())));
    }

    #[test]
    fn dedent_closes_all_blocks_at_eof() {
        let k = kinds("if a\n    if b\n        x := 1");
        let dedents = k.iter().filter(|t| **t == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(k.last(), Some(&TokenKind::Eof));
    }
}
