use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use tracing::debug;

#[derive(Clone, Copy, Hash, Debug, Eq, PartialEq)]
pub enum TokenClass {
    Semicolon,
    String,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    TypeIndicator,
    Number,
    Identifier,
    Assign,
    Comma,
    Operator,
    Keyword,
    Unknown,
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
pub struct Position(pub u64, pub u64);

impl Position {
    pub fn line(&self) -> u64 { self.0 }
    pub fn column(&self) -> u64 { self.1 }
}

/// Half-open source range; `end` points just past the last character.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Span {
        Span { start, end }
    }

    pub fn to(&self, other: Span) -> Span {
        Span { start: self.start, end: other.end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start.0, self.start.1)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Token<'a>(pub TokenClass, pub &'a str, pub Span);

impl<'a> Token<'a> {
    pub fn class(&self) -> TokenClass { self.0 }
    pub fn text(&self) -> &'a str     { self.1 }
    pub fn span(&self) -> Span        { self.2 }

    pub fn is(&self, class: TokenClass, text: &str) -> bool {
        self.0 == class && self.1 == text
    }
}

const KEYWORDS: &[&str] = &[
    "var", "if", "else", "while", "return", "true", "false", "builtin",
];

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: u64,
    column: u64,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            input,
            chars: input.char_indices().peekable(),
            line: 1,
            column: 0,
        }
    }

    fn position(&self) -> Position {
        Position(self.line, self.column + 1)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.input.len(), |&(i, _)| i)
    }

    fn next_char(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().map(|&(_, c)| c) == Some(expected) {
            self.next_char();
            true
        } else {
            false
        }
    }

    fn eat_while<F: Fn(char) -> bool>(&mut self, pred: F) {
        while let Some(&(_, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            self.next_char();
        }
    }

    /// Consumes everything up to and including `target`, returning the text
    /// before it. Returns `None` when the input ends first.
    pub fn eat_until(&mut self, target: char) -> Option<&'a str> {
        let begin = self.offset();
        loop {
            let end = self.offset();
            match self.next_char() {
                Some(c) if c == target => return Some(&self.input[begin..end]),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.eat_while(char::is_whitespace);
            let offset = self.offset();
            if self.input[offset..].starts_with("//") {
                self.eat_until('\n');
            } else {
                return;
            }
        }
    }

    pub fn get_token(&mut self) -> Option<Token<'a>> {
        self.skip_trivia();

        let start = self.position();
        let begin = self.offset();
        let c = self.next_char()?;

        let class = match c {
            ';' => TokenClass::Semicolon,
            '(' => TokenClass::LeftParen,
            ')' => TokenClass::RightParen,
            '[' => TokenClass::LeftBracket,
            ']' => TokenClass::RightBracket,
            '{' => TokenClass::LeftBrace,
            '}' => TokenClass::RightBrace,
            ':' => TokenClass::TypeIndicator,
            ',' => TokenClass::Comma,
            '=' => {
                if self.eat('=') { TokenClass::Operator } else { TokenClass::Assign }
            }
            '!' => {
                self.eat('=');
                TokenClass::Operator
            }
            '+' | '-' | '*' | '~' => TokenClass::Operator,
            '"' => {
                return Some(match self.eat_until('"') {
                    Some(contents) => Token(TokenClass::String, contents, Span::new(start, self.position())),
                    None => Token(TokenClass::Unknown, &self.input[begin..], Span::new(start, self.position())),
                });
            }
            '0'..='9' => {
                self.eat_while(|c| c.is_ascii_digit());
                TokenClass::Number
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                self.eat_while(|c| c.is_ascii_alphanumeric() || c == '_');
                let end = self.offset();
                if KEYWORDS.contains(&&self.input[begin..end]) {
                    TokenClass::Keyword
                } else {
                    TokenClass::Identifier
                }
            }
            _ => TokenClass::Unknown,
        };

        let end = self.offset();
        Some(Token(class, &self.input[begin..end], Span::new(start, self.position())))
    }

    pub fn get_tokens(mut self) -> Vec<Token<'a>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.get_token() {
            tokens.push(token);
        }
        debug!(count = tokens.len(), "lexed tokens");
        tokens
    }
}

pub fn lex(input: &str) -> Vec<Token<'_>> {
    Lexer::new(input).get_tokens()
}


#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Lexer, Position, Span, Token, TokenClass, lex};

    fn classes(input: &str) -> Vec<(TokenClass, &str)> {
        lex(input).into_iter().map(|t| (t.0, t.1)).collect()
    }

    fn at(line: u64, col: u64, end_col: u64) -> Span {
        Span::new(Position(line, col), Position(line, end_col))
    }

    #[test]
    fn sequence() {
        assert_eq!(lex("var x: i32 = 12;"), vec![
            Token(TokenClass::Keyword,       "var", at(1, 1, 4)),
            Token(TokenClass::Identifier,    "x",   at(1, 5, 6)),
            Token(TokenClass::TypeIndicator, ":",   at(1, 6, 7)),
            Token(TokenClass::Identifier,    "i32", at(1, 8, 11)),
            Token(TokenClass::Assign,        "=",   at(1, 12, 13)),
            Token(TokenClass::Number,        "12",  at(1, 14, 16)),
            Token(TokenClass::Semicolon,     ";",   at(1, 16, 17)),
        ]);
    }

    #[test]
    fn punctuation_and_operators() {
        assert_eq!(classes("( ) [ ] { } , : = == != ! ~ + - *"), vec![
            (TokenClass::LeftParen,     "("),
            (TokenClass::RightParen,    ")"),
            (TokenClass::LeftBracket,   "["),
            (TokenClass::RightBracket,  "]"),
            (TokenClass::LeftBrace,     "{"),
            (TokenClass::RightBrace,    "}"),
            (TokenClass::Comma,         ","),
            (TokenClass::TypeIndicator, ":"),
            (TokenClass::Assign,        "="),
            (TokenClass::Operator,      "=="),
            (TokenClass::Operator,      "!="),
            (TokenClass::Operator,      "!"),
            (TokenClass::Operator,      "~"),
            (TokenClass::Operator,      "+"),
            (TokenClass::Operator,      "-"),
            (TokenClass::Operator,      "*"),
        ]);
    }

    #[test]
    fn keywords() {
        assert_eq!(classes("if iff else elsee while return returned true false builtin var_"), vec![
            (TokenClass::Keyword,    "if"),
            (TokenClass::Identifier, "iff"),
            (TokenClass::Keyword,    "else"),
            (TokenClass::Identifier, "elsee"),
            (TokenClass::Keyword,    "while"),
            (TokenClass::Keyword,    "return"),
            (TokenClass::Identifier, "returned"),
            (TokenClass::Keyword,    "true"),
            (TokenClass::Keyword,    "false"),
            (TokenClass::Keyword,    "builtin"),
            (TokenClass::Identifier, "var_"),
        ]);
    }

    #[test]
    fn newlines() {
        assert_eq!(lex("a=1;\n  b"), vec![
            Token(TokenClass::Identifier, "a", at(1, 1, 2)),
            Token(TokenClass::Assign,     "=", at(1, 2, 3)),
            Token(TokenClass::Number,     "1", at(1, 3, 4)),
            Token(TokenClass::Semicolon,  ";", at(1, 4, 5)),
            Token(TokenClass::Identifier, "b", at(2, 3, 4)),
        ]);
    }

    #[test]
    fn strings_are_verbatim() {
        assert_eq!(lex("\"hi there;\" x"), vec![
            Token(TokenClass::String,     "hi there;", at(1, 1, 12)),
            Token(TokenClass::Identifier, "x",         at(1, 13, 14)),
        ]);
    }

    #[test]
    fn unterminated_string() {
        assert_eq!(classes("x \"abc"), vec![
            (TokenClass::Identifier, "x"),
            (TokenClass::Unknown,    "\"abc"),
        ]);
    }

    #[test]
    fn unknown_characters() {
        assert_eq!(classes("a $ b"), vec![
            (TokenClass::Identifier, "a"),
            (TokenClass::Unknown,    "$"),
            (TokenClass::Identifier, "b"),
        ]);
    }

    #[test]
    fn comments() {
        assert_eq!(classes("// header\nreturn 1; // trailing\n// last"), vec![
            (TokenClass::Keyword,   "return"),
            (TokenClass::Number,    "1"),
            (TokenClass::Semicolon, ";"),
        ]);
    }

    #[test]
    fn get_token_until_end() {
        let mut lexer = Lexer::new("f(x)");
        assert_eq!(lexer.get_token().map(|t| t.0), Some(TokenClass::Identifier));
        assert_eq!(lexer.get_token().map(|t| t.0), Some(TokenClass::LeftParen));
        assert_eq!(lexer.get_token().map(|t| t.0), Some(TokenClass::Identifier));
        assert_eq!(lexer.get_token().map(|t| t.0), Some(TokenClass::RightParen));
        assert_eq!(lexer.get_token(), None);
        assert_eq!(lexer.get_token(), None);
    }

    #[test]
    fn eat_until() {
        let mut lexer = Lexer::new("abc;def");
        assert_eq!(lexer.eat_until(';'), Some("abc"));
        assert_eq!(lexer.eat_until(';'), None);
    }
}
