//! Purpose: Tokenize script source into line-tagged tokens.
//! Exports: `Token`, `TokenKind`, `Keyword`, `tokenize`.
//! Role: First stage of the script evaluator; feeds `parser`.
//! Invariants: Newlines are significant except inside `(...)` and `[...]`.
//! Invariants: Consecutive newlines collapse into a single `Newline` token.
use super::syntax_error;
use crate::core::error::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Keyword {
    Import,
    From,
    As,
    Fn,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    Pass,
    Global,
    Raise,
    And,
    Or,
    Not,
    True,
    False,
    None,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let keyword = match word {
            "import" => Keyword::Import,
            "from" => Keyword::From,
            "as" => Keyword::As,
            "fn" => Keyword::Fn,
            "if" => Keyword::If,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "return" => Keyword::Return,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "pass" => Keyword::Pass,
            "global" => Keyword::Global,
            "raise" => Keyword::Raise,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "true" | "True" => Keyword::True,
            "false" | "False" => Keyword::False,
            "none" | "None" => Keyword::None,
            _ => return None,
        };
        Some(keyword)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(Keyword),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Newline,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, Error> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    brackets: Vec<char>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            brackets: Vec::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, Error> {
        while let Some(ch) = self.chars.next() {
            match ch {
                '\n' => {
                    self.newline();
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => {}
                '#' => {
                    while let Some(&next) = self.chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '(' | '[' | '{' => {
                    self.brackets.push(ch);
                    self.push(match ch {
                        '(' => TokenKind::LParen,
                        '[' => TokenKind::LBracket,
                        _ => TokenKind::LBrace,
                    });
                }
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if self.brackets.pop() != Some(expected) {
                        return Err(syntax_error(self.line, format!("unmatched '{ch}'")));
                    }
                    self.push(match ch {
                        ')' => TokenKind::RParen,
                        ']' => TokenKind::RBracket,
                        _ => TokenKind::RBrace,
                    });
                }
                ',' => self.push(TokenKind::Comma),
                ':' => self.push(TokenKind::Colon),
                ';' => self.push(TokenKind::Semicolon),
                '.' => {
                    if self.chars.peek().is_some_and(|next| next.is_ascii_digit()) {
                        self.number('.')?;
                    } else {
                        self.push(TokenKind::Dot);
                    }
                }
                '+' => self.with_assign(TokenKind::Plus, TokenKind::PlusAssign),
                '-' => self.with_assign(TokenKind::Minus, TokenKind::MinusAssign),
                '*' => self.with_assign(TokenKind::Star, TokenKind::StarAssign),
                '%' => self.push(TokenKind::Percent),
                '/' => {
                    if self.chars.next_if_eq(&'/').is_some() {
                        self.push(TokenKind::DoubleSlash);
                    } else {
                        self.with_assign(TokenKind::Slash, TokenKind::SlashAssign);
                    }
                }
                '=' => self.with_assign(TokenKind::Assign, TokenKind::EqualEqual),
                '<' => self.with_assign(TokenKind::Less, TokenKind::LessEqual),
                '>' => self.with_assign(TokenKind::Greater, TokenKind::GreaterEqual),
                '!' => {
                    if self.chars.next_if_eq(&'=').is_some() {
                        self.push(TokenKind::BangEqual);
                    } else {
                        return Err(syntax_error(self.line, "unexpected '!'"));
                    }
                }
                '"' | '\'' => self.string(ch)?,
                c if c.is_ascii_digit() => self.number(c)?,
                c if c.is_alphabetic() || c == '_' => self.word(c),
                other => {
                    return Err(syntax_error(
                        self.line,
                        format!("unexpected character '{other}'"),
                    ));
                }
            }
        }
        if let Some(open) = self.brackets.last() {
            return Err(syntax_error(self.line, format!("'{open}' was never closed")));
        }
        self.newline();
        self.push(TokenKind::Eof);
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn newline(&mut self) {
        if matches!(self.brackets.last(), Some('(') | Some('[')) {
            return;
        }
        let redundant = match self.tokens.last() {
            None => true,
            Some(token) => matches!(token.kind, TokenKind::Newline),
        };
        if !redundant {
            self.push(TokenKind::Newline);
        }
    }

    /// Pushes `assigned` when the next char is `=`, `plain` otherwise.
    fn with_assign(&mut self, plain: TokenKind, assigned: TokenKind) {
        if self.chars.next_if_eq(&'=').is_some() {
            self.push(assigned);
        } else {
            self.push(plain);
        }
    }

    fn string(&mut self, quote: char) -> Result<(), Error> {
        let start_line = self.line;
        let mut value = String::new();
        loop {
            let Some(ch) = self.chars.next() else {
                return Err(syntax_error(start_line, "unterminated string literal"));
            };
            match ch {
                c if c == quote => break,
                '\n' => return Err(syntax_error(start_line, "unterminated string literal")),
                '\\' => {
                    let escaped = self
                        .chars
                        .next()
                        .ok_or_else(|| syntax_error(start_line, "unterminated string literal"))?;
                    let decoded = match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        // Unknown escapes keep their backslash.
                        other => {
                            value.push('\\');
                            other
                        }
                    };
                    value.push(decoded);
                }
                c => value.push(c),
            }
        }
        self.push(TokenKind::Str(value));
        Ok(())
    }

    fn number(&mut self, first: char) -> Result<(), Error> {
        let mut text = String::from(first);
        let mut is_float = first == '.';
        while let Some(&next) = self.chars.peek() {
            if next.is_ascii_digit() || next == '_' {
                if next != '_' {
                    text.push(next);
                }
                self.chars.next();
            } else if next == '.' && !is_float {
                // `1.method` is not a float; require a digit or end after the dot.
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if lookahead.peek().is_some_and(|c| c.is_alphabetic() || *c == '_') {
                    break;
                }
                is_float = true;
                text.push(next);
                self.chars.next();
            } else {
                break;
            }
        }
        let kind = if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| syntax_error(self.line, format!("invalid number '{text}'")))?
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| syntax_error(self.line, format!("integer literal too large '{text}'")))?
        };
        self.push(kind);
        Ok(())
    }

    fn word(&mut self, first: char) {
        let mut text = String::from(first);
        while let Some(&next) = self.chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                text.push(next);
                self.chars.next();
            } else {
                break;
            }
        }
        match Keyword::from_word(&text) {
            Some(keyword) => self.push(TokenKind::Keyword(keyword)),
            None => self.push(TokenKind::Name(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Keyword, TokenKind, tokenize};

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn newlines_inside_parens_are_ignored() {
        assert_eq!(
            kinds("f(1,\n 2)\n"),
            vec![
                TokenKind::Name("f".into()),
                TokenKind::LParen,
                TokenKind::Int(1),
                TokenKind::Comma,
                TokenKind::Int(2),
                TokenKind::RParen,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_braces_are_kept() {
        let tokens = kinds("{\nx\n}");
        assert_eq!(tokens[1], TokenKind::Newline);
    }

    #[test]
    fn operators_and_keywords() {
        assert_eq!(
            kinds("x += 1 // 2 != 3 and not None"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::PlusAssign,
                TokenKind::Int(1),
                TokenKind::DoubleSlash,
                TokenKind::Int(2),
                TokenKind::BangEqual,
                TokenKind::Int(3),
                TokenKind::Keyword(Keyword::And),
                TokenKind::Keyword(Keyword::Not),
                TokenKind::Keyword(Keyword::None),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_and_numbers() {
        assert_eq!(
            kinds("'a\\n\"b' 2.5 .5 1_000"),
            vec![
                TokenKind::Str("a\n\"b".into()),
                TokenKind::Float(2.5),
                TokenKind::Float(0.5),
                TokenKind::Int(1000),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unknown_escape_keeps_backslash() {
        assert_eq!(
            kinds(r#""\q\d" '\\'"#),
            vec![
                TokenKind::Str("\\q\\d".into()),
                TokenKind::Str("\\".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_lines_counted() {
        let tokens = tokenize("# header\n\nx = 1 # trailing\ny").expect("tokenize");
        let y = tokens
            .iter()
            .find(|token| token.kind == TokenKind::Name("y".into()))
            .expect("y");
        assert_eq!(y.line, 4);
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = tokenize("x = \"oops").expect_err("error");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn unbalanced_brackets_are_rejected() {
        assert!(tokenize("(1, 2").is_err());
        assert!(tokenize("1)").is_err());
    }
}
