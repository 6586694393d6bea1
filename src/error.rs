use crate::ast::Position;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingKind {
    UnmatchedEnd,
    UnmatchedElse,
    UnclosedBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Syntax,
    UnknownBlock,
    Nesting(NestingKind),
    UndeclaredArgument,
    Reference,
}

impl ErrorKind {
    fn label(&self) -> &'static str {
        match self {
            ErrorKind::Lex => "lex error",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::UnknownBlock => "unknown block",
            ErrorKind::Nesting(NestingKind::UnmatchedEnd) => "unmatched 'end'",
            ErrorKind::Nesting(NestingKind::UnmatchedElse) => "unmatched 'else'",
            ErrorKind::Nesting(NestingKind::UnclosedBlock) => "unclosed block",
            ErrorKind::UndeclaredArgument => "undeclared argument",
            ErrorKind::Reference => "unresolved reference",
        }
    }
}

/// Any failure produced while turning source text into a block graph.
/// Always carries the source position the failure was detected at.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Position,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, pos: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (line {}, column {})",
            self.kind.label(),
            self.message,
            self.pos.line,
            self.pos.column
        )
    }
}

impl Error for CompileError {}

/// Integrity violation found while rendering a block graph back to text.
/// Signals a producer bug in the graph, not a user syntax error, so it
/// aborts the whole fragment instead of emitting partial text.
#[derive(Debug, Clone)]
pub struct MalformedGraphError {
    pub message: String,
}

impl MalformedGraphError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for MalformedGraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed block graph: {}", self.message)
    }
}

impl Error for MalformedGraphError {}
