use self::TokenKind::*;
use anyhow::{bail, Result};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::Chars,
};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    // punctuation
    Dot,
    Comma,
    LeftParentheses,
    RightParentheses,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Semicolon,

    // operators
    Plus,
    Minus,
    Times,
    Divide,
    Assign,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Not,

    // values
    IntegerValue,
    DoubleValue,
    StringValue,
    BoolValue,
    NullValue,
    Identifier,

    // types
    IntType,
    DoubleType,
    StringType,
    BoolType,
    VoidType,

    // reserved words
    Struct,
    Array,
    List,
    For,
    While,
    If,
    ElseIf,
    Else,
    New,
    Return,
    Append,
    Clear,
    Pop,
    Max,
    Min,

    EndOfFile,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:?} \"{}\" {}:{}",
            self.kind, self.lexeme, self.line, self.column
        )
    }
}

pub const EOF_CHAR: char = '\0';

pub struct Lexer<'a> {
    chars: Chars<'a>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Self {
            chars: input.chars(),
            line: 1,
            column: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        loop {
            self.skip_while(char::is_whitespace);
            if self.peek_nth(0) == '/' && self.peek_nth(1) == '/' {
                self.skip_while(|c| c != '\n');
                continue;
            }
            break;
        }

        if self.is_eof() {
            return Ok(Token::new(EndOfFile, "", self.line, self.column + 1));
        }

        let first_char = self.read_char();
        let (line, column) = (self.line, self.column);
        let token = |kind: TokenKind, lexeme: &str| Token::new(kind, lexeme, line, column);

        let token = match first_char {
            '.' => token(Dot, "."),
            ',' => token(Comma, ","),
            '(' => token(LeftParentheses, "("),
            ')' => token(RightParentheses, ")"),
            '[' => token(LeftBracket, "["),
            ']' => token(RightBracket, "]"),
            '{' => token(LeftBrace, "{"),
            '}' => token(RightBrace, "}"),
            ';' => token(Semicolon, ";"),
            '+' => token(Plus, "+"),
            '-' => token(Minus, "-"),
            '*' => token(Times, "*"),
            '/' => token(Divide, "/"),
            '=' => self.next_char_or(token(Assign, "="), '=', token(Equal, "==")),
            '<' => self.next_char_or(token(LessThan, "<"), '=', token(LessThanOrEqual, "<=")),
            '>' => self.next_char_or(
                token(GreaterThan, ">"),
                '=',
                token(GreaterThanOrEqual, ">="),
            ),
            '!' => {
                if self.peek_nth(0) != '=' {
                    bail!("! not a valid character at line {}, column {}", line, column);
                }
                self.read_char();
                token(NotEqual, "!=")
            }
            '"' => {
                let value = self.take_while(|c| c != '"' && c != '\n');
                if self.peek_nth(0) != '"' {
                    bail!("Missing closed quotation at line {}, column {}", line, column);
                }
                self.read_char();
                token(StringValue, &value)
            }
            c if c.is_ascii_digit() => {
                if c == '0' && self.peek_nth(0).is_ascii_digit() {
                    bail!(
                        "No leading zeros are allowed at line {}, column {}",
                        line,
                        column
                    );
                }
                let mut number = c.to_string();
                number.push_str(&self.take_while(|c| c.is_ascii_digit()));
                if self.peek_nth(0) == '.' {
                    number.push(self.read_char());
                    let fraction = self.take_while(|c| c.is_ascii_digit());
                    if fraction.is_empty() {
                        bail!(
                            "Double must have digits following decimal at line {}, column {}",
                            line,
                            column
                        );
                    }
                    number.push_str(&fraction);
                    token(DoubleValue, &number)
                } else {
                    token(IntegerValue, &number)
                }
            }
            c if c.is_alphabetic() => {
                let mut identifier = c.to_string();
                identifier.push_str(&self.take_while(Self::is_identifier_char));
                token(Self::lookup_identifier(&identifier), &identifier)
            }
            illegal => bail!(
                "Invalid symbol '{}' at line {}, column {}",
                illegal,
                line,
                column
            ),
        };
        Ok(token)
    }

    /// Every token of the input, ending with the end-of-file token.
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let next_token = self.next_token()?;
            let finished = next_token.kind == EndOfFile;
            tokens.push(next_token);
            if finished {
                break;
            }
        }
        Ok(tokens)
    }

    fn read_char(&mut self) -> char {
        match self.chars.next() {
            Some('\n') => {
                self.line += 1;
                self.column = 0;
                '\n'
            }
            Some(c) => {
                self.column += 1;
                c
            }
            None => EOF_CHAR,
        }
    }

    fn peek_nth(&self, n: usize) -> char {
        self.chars.clone().nth(n).unwrap_or(EOF_CHAR)
    }

    fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> String {
        let mut chars = String::new();
        while !self.is_eof() && predicate(self.peek_nth(0)) {
            chars.push(self.read_char());
        }
        chars
    }

    fn skip_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while !self.is_eof() && predicate(self.peek_nth(0)) {
            self.read_char();
        }
    }

    fn is_identifier_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    fn lookup_identifier(identifier: &str) -> TokenKind {
        match identifier {
            "true" | "false" => BoolValue,
            "null" => NullValue,
            "and" => And,
            "or" => Or,
            "not" => Not,
            "int" => IntType,
            "double" => DoubleType,
            "string" => StringType,
            "bool" => BoolType,
            "void" => VoidType,
            "struct" => Struct,
            "array" => Array,
            "list" => List,
            "for" => For,
            "while" => While,
            "if" => If,
            "elseif" => ElseIf,
            "else" => Else,
            "new" => New,
            "return" => Return,
            "append" => Append,
            "clear" => Clear,
            "pop" => Pop,
            "max" => Max,
            "min" => Min,
            _ => Identifier,
        }
    }

    fn next_char_or(&mut self, default: Token, next_char: char, token: Token) -> Token {
        match self.peek_nth(0) {
            c if c == next_char => {
                self.read_char();
                token
            }
            _ => default,
        }
    }
}
