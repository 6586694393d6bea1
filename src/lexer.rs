use crate::ast::Position;
use crate::error::{CompileError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// A keyword fragment or operator word (`move`, `steps`, `=`, `<`, `+`).
    Word,
    /// Literal content of a `[ ]` slot.
    Text,
    /// Content of a `[ ... v]` dropdown slot, marker stripped.
    Dropdown,
    /// `{name}` argument reference inside a custom-block body.
    ArgRef,
    /// `{<name>}` boolean argument reference.
    BoolArgRef,
    LParen,
    RParen,
    LAngle,
    RAngle,
    Comment,
    End,
    Else,
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub typ: TokenType,
    pub value: String,
    pub pos: Position,
}

/// Tokenizes scratchblocks-style source. `[ ]` and `{ }` content is captured
/// verbatim as a single token since neither nests; `( )` and `< >` are
/// structural so expressions inside them can recurse. Indentation carries no
/// meaning and is skipped.
pub struct Lexer<'a> {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    _source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::starting_at(source, 1)
    }

    /// Lexes a chunk carved out of a larger document, reporting positions
    /// relative to that document rather than the chunk.
    pub fn starting_at(source: &'a str, first_line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: first_line,
            column: 1,
            _source: source,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        while !self.at_end() {
            let ch = self.peek();
            if is_ignorable_format_char(ch) {
                self.advance();
                continue;
            }
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
                continue;
            }
            if ch == '\n' {
                let pos = self.pos();
                self.advance();
                tokens.push(Token {
                    typ: TokenType::Newline,
                    value: "\n".to_string(),
                    pos,
                });
                continue;
            }
            if ch == '/' && self.peek_at(1) == '/' {
                tokens.push(self.read_comment());
                continue;
            }
            let pos = self.pos();
            match ch {
                '[' => tokens.push(self.read_bracket()?),
                '{' => tokens.push(self.read_brace()?),
                '(' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::LParen,
                        value: "(".to_string(),
                        pos,
                    });
                }
                ')' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::RParen,
                        value: ")".to_string(),
                        pos,
                    });
                }
                ']' => {
                    return Err(CompileError::new(
                        ErrorKind::Lex,
                        "']' without a matching '['",
                        pos,
                    ));
                }
                '}' => {
                    return Err(CompileError::new(
                        ErrorKind::Lex,
                        "'}' without a matching '{'",
                        pos,
                    ));
                }
                '<' | '>' => {
                    if self.angle_is_operator(ch) {
                        self.advance();
                        tokens.push(Token {
                            typ: TokenType::Word,
                            value: ch.to_string(),
                            pos,
                        });
                    } else {
                        self.advance();
                        tokens.push(Token {
                            typ: if ch == '<' {
                                TokenType::LAngle
                            } else {
                                TokenType::RAngle
                            },
                            value: ch.to_string(),
                            pos,
                        });
                    }
                }
                _ => tokens.push(self.read_word()),
            }
        }
        tokens.push(Token {
            typ: TokenType::Eof,
            value: String::new(),
            pos: self.pos(),
        });
        Ok(tokens)
    }

    /// `<` and `>` double as the less-than/greater-than operator words.
    /// They act as operators only when padded by whitespace on both sides,
    /// e.g. `<(score) < [10]>`; everywhere else they delimit a predicate.
    fn angle_is_operator(&self, _ch: char) -> bool {
        let prev_is_space = if self.index == 0 {
            false
        } else {
            matches!(self.chars[self.index - 1], ' ' | '\t')
        };
        let next_is_space = matches!(self.peek_at(1), ' ' | '\t' | '\n' | '\0');
        prev_is_space && next_is_space
    }

    fn read_bracket(&mut self) -> Result<Token, CompileError> {
        let pos = self.pos();
        self.advance();
        let mut content = String::new();
        while !self.at_end() {
            let ch = self.peek();
            if ch == ']' {
                self.advance();
                return Ok(match content.strip_suffix(" v") {
                    Some(value) => Token {
                        typ: TokenType::Dropdown,
                        value: value.to_string(),
                        pos,
                    },
                    None => Token {
                        typ: TokenType::Text,
                        value: content,
                        pos,
                    },
                });
            }
            if ch == '\n' {
                break;
            }
            content.push(self.advance());
        }
        Err(CompileError::new(
            ErrorKind::Lex,
            "unterminated '[' slot",
            pos,
        ))
    }

    fn read_brace(&mut self) -> Result<Token, CompileError> {
        let pos = self.pos();
        self.advance();
        let mut content = String::new();
        while !self.at_end() {
            let ch = self.peek();
            if ch == '}' {
                self.advance();
                let trimmed = content.trim();
                let token = match trimmed
                    .strip_prefix('<')
                    .and_then(|rest| rest.strip_suffix('>'))
                {
                    Some(inner) => Token {
                        typ: TokenType::BoolArgRef,
                        value: inner.trim().to_string(),
                        pos,
                    },
                    None => Token {
                        typ: TokenType::ArgRef,
                        value: trimmed.to_string(),
                        pos,
                    },
                };
                return Ok(token);
            }
            if ch == '\n' {
                break;
            }
            content.push(self.advance());
        }
        Err(CompileError::new(
            ErrorKind::Lex,
            "unterminated '{' argument reference",
            pos,
        ))
    }

    fn read_comment(&mut self) -> Token {
        let pos = self.pos();
        self.advance();
        self.advance();
        let mut content = String::new();
        while !self.at_end() && self.peek() != '\n' {
            content.push(self.advance());
        }
        Token {
            typ: TokenType::Comment,
            value: content.trim().to_string(),
            pos,
        }
    }

    fn read_word(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_whitespace() || matches!(ch, '[' | ']' | '(' | ')' | '{' | '}' | '<' | '>') {
                break;
            }
            text.push(self.advance());
        }
        let typ = match text.as_str() {
            "end" => TokenType::End,
            "else" => TokenType::Else,
            _ => TokenType::Word,
        };
        Token { typ, value: text, pos }
    }

    fn at_end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> char {
        if self.at_end() {
            '\0'
        } else {
            self.chars[self.index]
        }
    }

    fn peek_at(&self, offset: usize) -> char {
        *self.chars.get(self.index + offset).unwrap_or(&'\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.index];
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

fn is_ignorable_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}' // BOM / zero width no-break space
            | '\u{200b}' // zero width space
            | '\u{200c}' // zero width non-joiner
            | '\u{200d}' // zero width joiner
            | '\u{2060}' // word joiner
    )
}
