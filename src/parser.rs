use crate::ast::{
    BoolExpr, CustomDefinition, DefPiece, ParamKind, Position, Script, SlotValue, Statement,
    ValueExpr,
};
use crate::catalog::{self, Catalog, CatalogEntry, Flavor, PieceShape, Segment, SlotKind, WrapKind};
use crate::error::{CompileError, ErrorKind, NestingKind};
use crate::lexer::{Token, TokenType};
use crate::resolver::{IdentifierNamespace, RefKind, Scope};
use regex::Regex;
use std::sync::OnceLock;

/// One grouped element of a statement line: a literal word, or a slot
/// (bracket text, dropdown, argument reference, or a nested `( )`/`< >`
/// group).
#[derive(Debug, Clone)]
enum Piece {
    Word { text: String, pos: Position },
    Slot { slot: SlotPiece, pos: Position },
}

#[derive(Debug, Clone)]
enum SlotPiece {
    Text(String),
    Dropdown(String),
    ArgRef(String),
    BoolArgRef(String),
    Paren(Vec<Piece>),
    Angle(Vec<Piece>),
}

impl Piece {
    fn pos(&self) -> Position {
        match self {
            Piece::Word { pos, .. } | Piece::Slot { pos, .. } => *pos,
        }
    }
}

struct Frame {
    opener: Statement,
    in_else: bool,
}

/// Parses the token stream of one script (scripts are blank-line separated
/// chunks of the source; the caller does that split). Custom-block
/// definitions from the whole source are supplied up front so calls can
/// reference definitions that appear later in the file.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    index: usize,
    resolver: &'a IdentifierNamespace,
    scope: Scope,
    definitions: Vec<CustomDefinition>,
    params: Vec<(String, ParamKind)>,
    catalog: &'static Catalog,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: Vec<Token>,
        resolver: &'a IdentifierNamespace,
        scope: Scope,
        definitions: Vec<CustomDefinition>,
    ) -> Self {
        Self {
            tokens,
            index: 0,
            resolver,
            scope,
            definitions,
            params: Vec::new(),
            catalog: Catalog::global(),
        }
    }

    pub fn parse_script(&mut self) -> Result<Script, CompileError> {
        let mut script = Script {
            definition: None,
            statements: Vec::new(),
            trailing_comments: Vec::new(),
        };
        let mut stack: Vec<Frame> = Vec::new();
        let mut def_open = false;
        let mut def_closed = false;
        let mut pending_comments: Vec<String> = Vec::new();
        let mut last_pos = Position::new(1, 1);

        loop {
            let Some((line, comment, pos)) = self.next_line() else {
                break;
            };
            last_pos = pos;
            if line.is_empty() {
                if let Some(comment) = comment {
                    pending_comments.push(comment);
                }
                continue;
            }
            match line[0].typ {
                TokenType::End => {
                    if let Some(frame) = stack.pop() {
                        let opener = frame.opener;
                        push_statement(&mut script, &mut stack, opener);
                    } else if def_open {
                        def_open = false;
                        def_closed = true;
                    } else {
                        return Err(CompileError::new(
                            ErrorKind::Nesting(NestingKind::UnmatchedEnd),
                            "'end' with no open block",
                            pos,
                        ));
                    }
                    continue;
                }
                TokenType::Else => {
                    let Some(frame) = stack.last_mut() else {
                        return Err(CompileError::new(
                            ErrorKind::Nesting(NestingKind::UnmatchedElse),
                            "'else' outside of an 'if' block",
                            pos,
                        ));
                    };
                    if frame.opener.opcode != "control_if" {
                        return Err(CompileError::new(
                            ErrorKind::Nesting(NestingKind::UnmatchedElse),
                            format!("'else' is not valid inside '{}'", frame.opener.opcode),
                            pos,
                        ));
                    }
                    frame.opener.opcode = "control_if_else".to_string();
                    frame.opener.else_substack = Some(Vec::new());
                    frame.in_else = true;
                    continue;
                }
                TokenType::Word if line[0].value == "define" => {
                    if script.definition.is_some()
                        || !script.statements.is_empty()
                        || !stack.is_empty()
                    {
                        return Err(CompileError::new(
                            ErrorKind::Syntax,
                            "'define' must start its own script",
                            pos,
                        ));
                    }
                    let definition = parse_define_line(&line)?;
                    self.params = definition
                        .params()
                        .into_iter()
                        .map(|(name, kind)| (name.to_string(), kind))
                        .collect();
                    script.definition = Some(definition);
                    def_open = true;
                    continue;
                }
                _ => {}
            }

            if def_closed {
                return Err(CompileError::new(
                    ErrorKind::Syntax,
                    "statement after the definition's 'end'",
                    pos,
                ));
            }

            let pieces = build_pieces(&line)?;
            let mut statement = self.parse_statement(&pieces, pos)?;
            if !pending_comments.is_empty() || comment.is_some() {
                let mut lines = std::mem::take(&mut pending_comments);
                lines.extend(comment);
                statement.comment = Some(lines.join("\n"));
            }
            let wrap = self
                .catalog
                .entry(&statement.opcode)
                .map(|entry| entry.wrap)
                .unwrap_or(WrapKind::None);
            if wrap == WrapKind::None {
                push_statement(&mut script, &mut stack, statement);
            } else {
                stack.push(Frame {
                    opener: statement,
                    in_else: false,
                });
            }
        }

        if let Some(frame) = stack.last() {
            return Err(CompileError::new(
                ErrorKind::Nesting(NestingKind::UnclosedBlock),
                format!("missing 'end' for '{}'", frame.opener.opcode),
                last_pos,
            ));
        }
        if def_open {
            return Err(CompileError::new(
                ErrorKind::Nesting(NestingKind::UnclosedBlock),
                "missing 'end' for the definition",
                last_pos,
            ));
        }
        script.trailing_comments = pending_comments;
        Ok(script)
    }

    /// Pulls the next line's tokens, stripping the newline and a trailing
    /// comment. Returns None at end of input.
    fn next_line(&mut self) -> Option<(Vec<Token>, Option<String>, Position)> {
        while self.check(TokenType::Newline) {
            self.index += 1;
        }
        if self.check(TokenType::Eof) || self.index >= self.tokens.len() {
            return None;
        }
        let pos = self.tokens[self.index].pos;
        let mut line = Vec::new();
        let mut comment = None;
        while self.index < self.tokens.len() {
            let token = &self.tokens[self.index];
            match token.typ {
                TokenType::Newline | TokenType::Eof => break,
                TokenType::Comment => {
                    comment = Some(token.value.clone());
                    self.index += 1;
                }
                _ => {
                    line.push(token.clone());
                    self.index += 1;
                }
            }
        }
        if self.check(TokenType::Newline) {
            self.index += 1;
        }
        Some((line, comment, pos))
    }

    fn check(&self, typ: TokenType) -> bool {
        self.tokens
            .get(self.index)
            .map(|token| token.typ == typ)
            .unwrap_or(false)
    }

    fn parse_statement(&self, pieces: &[Piece], pos: Position) -> Result<Statement, CompileError> {
        let shapes = piece_shapes(pieces);
        if let Some(entry) = self.catalog.lookup(Flavor::Stack, &shapes) {
            let mut statement = self.build_from_entry(entry, pieces, pos)?;
            self.disambiguate_effect(&mut statement);
            return Ok(statement);
        }
        if let Some(statement) = self.match_custom_call(pieces, pos)? {
            return Ok(statement);
        }
        Err(CompileError::new(
            ErrorKind::UnknownBlock,
            format!("no block matches '{}'", display_pieces(pieces)),
            pos,
        ))
    }

    /// looks_* and sound_* effect blocks share their wording; the effect
    /// name picks the family.
    fn disambiguate_effect(&self, statement: &mut Statement) {
        let effect = match statement.slot("EFFECT") {
            Some(SlotValue::Dropdown { value }) => value.clone(),
            _ => return,
        };
        if let Some((opcode, value_slot)) = catalog::disambiguate_effect(&statement.opcode, &effect)
        {
            statement.opcode = opcode.to_string();
            for (name, _) in statement.slots.iter_mut() {
                if name == "CHANGE" {
                    *name = value_slot.to_string();
                }
            }
        }
    }

    fn build_from_entry(
        &self,
        entry: &CatalogEntry,
        pieces: &[Piece],
        pos: Position,
    ) -> Result<Statement, CompileError> {
        let mut statement = Statement::new(pos, entry.opcode);
        let mut piece_iter = pieces.iter();
        for segment in &entry.segments {
            let piece = piece_iter.next();
            match (segment, piece) {
                (Segment::Word(_), Some(Piece::Word { .. })) => {}
                (Segment::Slot { name, kind }, Some(piece)) => {
                    let value = self.build_slot(*kind, piece)?;
                    statement.slots.push((name.clone(), value));
                }
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::Syntax,
                        format!("malformed '{}' statement", entry.opcode),
                        pos,
                    ));
                }
            }
        }
        Ok(statement)
    }

    fn build_slot(&self, kind: SlotKind, piece: &Piece) -> Result<SlotValue, CompileError> {
        let pos = piece.pos();
        let Piece::Slot { slot, .. } = piece else {
            return Err(CompileError::new(
                ErrorKind::Syntax,
                "expected a slot, found a keyword",
                pos,
            ));
        };
        match kind {
            SlotKind::Dropdown => match slot {
                SlotPiece::Dropdown(value) | SlotPiece::Text(value) => Ok(SlotValue::Dropdown {
                    value: value.clone(),
                }),
                _ => Err(CompileError::new(
                    ErrorKind::Syntax,
                    "expected a dropdown value",
                    pos,
                )),
            },
            SlotKind::Boolean => match slot {
                SlotPiece::Angle(inner) => {
                    let expr = self.parse_boolean(inner, pos)?;
                    Ok(SlotValue::Bool(expr))
                }
                SlotPiece::BoolArgRef(name) | SlotPiece::ArgRef(name) => {
                    self.require_param(name, pos)?;
                    Ok(SlotValue::Bool(BoolExpr::Arg {
                        pos,
                        name: name.clone(),
                    }))
                }
                _ => Err(CompileError::new(
                    ErrorKind::Syntax,
                    "expected a boolean slot",
                    pos,
                )),
            },
            SlotKind::Color => {
                let text = match slot {
                    SlotPiece::Paren(inner) => match inner.as_slice() {
                        [Piece::Word { text, .. }] => text.clone(),
                        _ => String::new(),
                    },
                    SlotPiece::Text(text) => text.clone(),
                    _ => String::new(),
                };
                if !is_hex_color(&text) {
                    return Err(CompileError::new(
                        ErrorKind::Syntax,
                        "expected a color literal such as (#aabbcc)",
                        pos,
                    ));
                }
                Ok(SlotValue::Value(ValueExpr::Color { pos, hex: text }))
            }
            SlotKind::Broadcast => match slot {
                SlotPiece::Dropdown(value) | SlotPiece::Text(value) => Ok(SlotValue::Dropdown {
                    value: value.clone(),
                }),
                SlotPiece::Paren(inner) => self.paren_slot_value(inner, pos),
                SlotPiece::ArgRef(name) => {
                    self.require_param(name, pos)?;
                    Ok(SlotValue::Value(ValueExpr::Arg {
                        pos,
                        name: name.clone(),
                    }))
                }
                _ => Err(CompileError::new(
                    ErrorKind::Syntax,
                    "expected a broadcast name",
                    pos,
                )),
            },
            SlotKind::Number | SlotKind::Text => match slot {
                SlotPiece::Text(text) => Ok(SlotValue::Value(ValueExpr::Literal {
                    pos,
                    text: text.clone(),
                    numeric: false,
                })),
                SlotPiece::Dropdown(value) => Ok(SlotValue::Dropdown {
                    value: value.clone(),
                }),
                SlotPiece::ArgRef(name) => {
                    self.require_param(name, pos)?;
                    Ok(SlotValue::Value(ValueExpr::Arg {
                        pos,
                        name: name.clone(),
                    }))
                }
                SlotPiece::BoolArgRef(name) => {
                    self.require_param(name, pos)?;
                    Ok(SlotValue::Bool(BoolExpr::Arg {
                        pos,
                        name: name.clone(),
                    }))
                }
                SlotPiece::Paren(inner) => self.paren_slot_value(inner, pos),
                SlotPiece::Angle(inner) => {
                    let expr = self.parse_boolean(inner, pos)?;
                    Ok(SlotValue::Bool(expr))
                }
            },
        }
    }

    fn paren_slot_value(&self, inner: &[Piece], pos: Position) -> Result<SlotValue, CompileError> {
        if inner.is_empty() {
            return Ok(SlotValue::Empty);
        }
        Ok(SlotValue::Value(self.parse_value(inner, pos)?))
    }

    /// Content of a `( )` group in value position: a plain number, a color,
    /// a nested reporter, an inline binary expression, or a variable/list
    /// name.
    fn parse_value(&self, pieces: &[Piece], pos: Position) -> Result<ValueExpr, CompileError> {
        if let [Piece::Word { text, pos }] = pieces {
            if is_number(text) {
                return Ok(ValueExpr::Literal {
                    pos: *pos,
                    text: text.clone(),
                    numeric: true,
                });
            }
            if is_hex_color(text) {
                return Ok(ValueExpr::Color {
                    pos: *pos,
                    hex: text.clone(),
                });
            }
        }
        if let [Piece::Slot {
            slot: SlotPiece::Paren(inner),
            pos,
        }] = pieces
        {
            // collapse double wrapping like ((score))
            return self.parse_value(inner, *pos);
        }
        if let [Piece::Slot {
            slot: SlotPiece::ArgRef(name),
            pos,
        }] = pieces
        {
            self.require_param(name, *pos)?;
            return Ok(ValueExpr::Arg {
                pos: *pos,
                name: name.clone(),
            });
        }
        if let Some(expr) = self.parse_binary_math(pieces, pos)? {
            return Ok(expr);
        }
        let shapes = piece_shapes(pieces);
        if let Some(entry) = self.catalog.lookup(Flavor::Reporter, &shapes) {
            let statement = self.build_from_entry(entry, pieces, pos)?;
            return Ok(ValueExpr::Reporter(Box::new(statement)));
        }
        if pieces
            .iter()
            .all(|piece| matches!(piece, Piece::Word { .. }))
        {
            return Ok(self.variable_reporter(pieces, pos));
        }
        Err(CompileError::new(
            ErrorKind::UnknownBlock,
            format!("no reporter matches '{}'", display_pieces(pieces)),
            pos,
        ))
    }

    /// Inline `a + b` style expressions where the operands may be bare
    /// numbers or names instead of parenthesized slots.
    fn parse_binary_math(
        &self,
        pieces: &[Piece],
        pos: Position,
    ) -> Result<Option<ValueExpr>, CompileError> {
        if pieces.len() != 3 {
            return Ok(None);
        }
        let Piece::Word { text: op, .. } = &pieces[1] else {
            return Ok(None);
        };
        let opcode = match op.as_str() {
            "+" => "operator_add",
            "-" => "operator_subtract",
            "*" => "operator_multiply",
            "/" => "operator_divide",
            "mod" => "operator_mod",
            _ => return Ok(None),
        };
        let left = self.operand_value(&pieces[0])?;
        let right = self.operand_value(&pieces[2])?;
        let mut statement = Statement::new(pos, opcode);
        statement.slots.push(("NUM1".to_string(), left));
        statement.slots.push(("NUM2".to_string(), right));
        Ok(Some(ValueExpr::Reporter(Box::new(statement))))
    }

    fn operand_value(&self, piece: &Piece) -> Result<SlotValue, CompileError> {
        match piece {
            Piece::Word { text, pos } => {
                if is_number(text) {
                    Ok(SlotValue::Value(ValueExpr::Literal {
                        pos: *pos,
                        text: text.clone(),
                        numeric: true,
                    }))
                } else if self.resolver.contains(RefKind::Variable, &self.scope, text) {
                    Ok(SlotValue::Value(
                        self.variable_reporter(std::slice::from_ref(piece), *pos),
                    ))
                } else {
                    Ok(SlotValue::Value(ValueExpr::Literal {
                        pos: *pos,
                        text: text.clone(),
                        numeric: false,
                    }))
                }
            }
            _ => self.build_slot(SlotKind::Number, piece),
        }
    }

    /// A paren group of plain words: a list reporter when the name is a
    /// known list, otherwise a variable reporter.
    fn variable_reporter(&self, pieces: &[Piece], pos: Position) -> ValueExpr {
        let name = display_words(pieces);
        let (opcode, slot) = if self.resolver.contains(RefKind::List, &self.scope, &name) {
            ("data_listcontents", "LIST")
        } else {
            ("data_variable", "VARIABLE")
        };
        let mut statement = Statement::new(pos, opcode);
        statement
            .slots
            .push((slot.to_string(), SlotValue::Dropdown { value: name }));
        ValueExpr::Reporter(Box::new(statement))
    }

    /// Boolean expression over pieces: `or` loosest, then `and`, then the
    /// `not` prefix, with `< >` nesting as explicit grouping.
    fn parse_boolean(&self, pieces: &[Piece], pos: Position) -> Result<BoolExpr, CompileError> {
        if pieces.is_empty() {
            return Ok(BoolExpr::Empty);
        }
        if let Some(split) = find_last_word(pieces, "or") {
            let left = self.parse_boolean(&pieces[..split], pos)?;
            let right = self.parse_boolean(&pieces[split + 1..], pieces[split].pos())?;
            return Ok(BoolExpr::Or(Box::new(left), Box::new(right)));
        }
        if let Some(split) = find_last_word(pieces, "and") {
            let left = self.parse_boolean(&pieces[..split], pos)?;
            let right = self.parse_boolean(&pieces[split + 1..], pieces[split].pos())?;
            return Ok(BoolExpr::And(Box::new(left), Box::new(right)));
        }
        if let Piece::Word { text, .. } = &pieces[0] {
            if text == "not" {
                let inner = self.parse_boolean(&pieces[1..], pos)?;
                return Ok(BoolExpr::Not(Box::new(inner)));
            }
        }
        match pieces {
            [Piece::Slot {
                slot: SlotPiece::Angle(inner),
                pos,
            }] => return self.parse_boolean(inner, *pos),
            [Piece::Slot {
                slot: SlotPiece::BoolArgRef(name) | SlotPiece::ArgRef(name),
                pos,
            }] => {
                self.require_param(name, *pos)?;
                return Ok(BoolExpr::Arg {
                    pos: *pos,
                    name: name.clone(),
                });
            }
            _ => {}
        }
        if let Some(expr) = self.parse_bare_comparison(pieces, pos)? {
            return Ok(expr);
        }
        let shapes = piece_shapes(pieces);
        if let Some(entry) = self.catalog.lookup(Flavor::Boolean, &shapes) {
            let statement = self.build_from_entry(entry, pieces, pos)?;
            return Ok(BoolExpr::Pred(Box::new(statement)));
        }
        Err(CompileError::new(
            ErrorKind::UnknownBlock,
            format!("no predicate matches '{}'", display_pieces(pieces)),
            pos,
        ))
    }

    /// Comparisons whose operands are bare words, e.g. `<score = 10>`.
    fn parse_bare_comparison(
        &self,
        pieces: &[Piece],
        pos: Position,
    ) -> Result<Option<BoolExpr>, CompileError> {
        if pieces.len() != 3 {
            return Ok(None);
        }
        let Piece::Word { text: op, .. } = &pieces[1] else {
            return Ok(None);
        };
        let opcode = match op.as_str() {
            ">" => "operator_gt",
            "<" => "operator_lt",
            "=" => "operator_equals",
            _ => return Ok(None),
        };
        if !matches!(pieces[0], Piece::Word { .. }) && !matches!(pieces[2], Piece::Word { .. }) {
            // both sides are proper slots, the catalog pattern handles it
            return Ok(None);
        }
        let left = self.operand_value(&pieces[0])?;
        let right = self.operand_value(&pieces[2])?;
        let mut statement = Statement::new(pos, opcode);
        statement.slots.push(("OPERAND1".to_string(), left));
        statement.slots.push(("OPERAND2".to_string(), right));
        Ok(Some(BoolExpr::Pred(Box::new(statement))))
    }

    fn match_custom_call(
        &self,
        pieces: &[Piece],
        pos: Position,
    ) -> Result<Option<Statement>, CompileError> {
        'defs: for definition in &self.definitions {
            if definition.pieces.len() != pieces.len() {
                continue;
            }
            for (def_piece, piece) in definition.pieces.iter().zip(pieces) {
                let ok = match (def_piece, piece) {
                    (DefPiece::Label(label), Piece::Word { text, .. }) => label == text,
                    (DefPiece::Param { .. }, Piece::Slot { .. }) => true,
                    _ => false,
                };
                if !ok {
                    continue 'defs;
                }
            }
            let mut statement = Statement::new(pos, catalog::PROCEDURES_CALL);
            statement.custom_call = Some(definition.proccode());
            for (def_piece, piece) in definition.pieces.iter().zip(pieces) {
                if let DefPiece::Param { name, kind } = def_piece {
                    let slot_kind = match kind {
                        ParamKind::StringNumber => SlotKind::Text,
                        ParamKind::Boolean => SlotKind::Boolean,
                    };
                    let value = self.build_slot(slot_kind, piece)?;
                    statement.slots.push((name.clone(), value));
                }
            }
            return Ok(Some(statement));
        }
        Ok(None)
    }

    fn require_param(&self, name: &str, pos: Position) -> Result<(), CompileError> {
        if self.params.iter().any(|(param, _)| param == name) {
            return Ok(());
        }
        Err(CompileError::new(
            ErrorKind::UndeclaredArgument,
            format!(
                "argument '{}' is not a parameter of the enclosing definition",
                name
            ),
            pos,
        ))
    }
}

fn push_statement(script: &mut Script, stack: &mut [Frame], statement: Statement) {
    if let Some(frame) = stack.last_mut() {
        if frame.in_else {
            frame
                .opener
                .else_substack
                .get_or_insert_with(Vec::new)
                .push(statement);
        } else {
            frame.opener.substack.push(statement);
        }
    } else {
        script.statements.push(statement);
    }
}

/// Parses a `define` header line: label words interleaved with `(param)`
/// and `<param>` placeholders, with an optional trailing `#norefresh`.
pub fn parse_define_line(line: &[Token]) -> Result<CustomDefinition, CompileError> {
    let pos = line[0].pos;
    let mut pieces = Vec::new();
    let mut warp = false;
    let mut index = 1;
    while index < line.len() {
        let token = &line[index];
        match token.typ {
            TokenType::Word => {
                if token.value == "#norefresh" {
                    warp = true;
                } else {
                    pieces.push(DefPiece::Label(token.value.clone()));
                }
                index += 1;
            }
            TokenType::Text => {
                pieces.push(DefPiece::Param {
                    name: token.value.clone(),
                    kind: ParamKind::StringNumber,
                });
                index += 1;
            }
            TokenType::LParen | TokenType::LAngle => {
                let close = if token.typ == TokenType::LParen {
                    TokenType::RParen
                } else {
                    TokenType::RAngle
                };
                let kind = if close == TokenType::RParen {
                    ParamKind::StringNumber
                } else {
                    ParamKind::Boolean
                };
                let mut words = Vec::new();
                index += 1;
                while index < line.len() && line[index].typ != close {
                    if line[index].typ != TokenType::Word {
                        return Err(CompileError::new(
                            ErrorKind::Syntax,
                            "parameter names may only contain words",
                            line[index].pos,
                        ));
                    }
                    words.push(line[index].value.clone());
                    index += 1;
                }
                if index >= line.len() {
                    return Err(CompileError::new(
                        ErrorKind::Syntax,
                        "unterminated parameter in definition",
                        token.pos,
                    ));
                }
                index += 1;
                if words.is_empty() {
                    return Err(CompileError::new(
                        ErrorKind::Syntax,
                        "empty parameter name in definition",
                        token.pos,
                    ));
                }
                pieces.push(DefPiece::Param {
                    name: words.join(" "),
                    kind,
                });
            }
            _ => {
                return Err(CompileError::new(
                    ErrorKind::Syntax,
                    "unexpected token in definition header",
                    token.pos,
                ));
            }
        }
    }
    if pieces.is_empty() {
        return Err(CompileError::new(
            ErrorKind::Syntax,
            "definition has no name",
            pos,
        ));
    }
    Ok(CustomDefinition { pos, pieces, warp })
}

/// Returns true when the line is a `define` header; used by the prescan
/// that collects definitions before any script parses.
pub fn is_define_line(line: &[Token]) -> bool {
    line.first()
        .map(|token| token.typ == TokenType::Word && token.value == "define")
        .unwrap_or(false)
}

/// Splits a token stream into lines, comments stripped. Used by the
/// definition prescan; `Parser::next_line` does the same job statefully.
pub fn token_lines(tokens: &[Token]) -> Vec<&[Token]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        if token.typ == TokenType::Newline || token.typ == TokenType::Eof {
            if index > start {
                lines.push(&tokens[start..index]);
            }
            start = index + 1;
        }
    }
    if start < tokens.len() {
        lines.push(&tokens[start..]);
    }
    lines
}

fn build_pieces(tokens: &[Token]) -> Result<Vec<Piece>, CompileError> {
    let mut pieces = Vec::new();
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        match token.typ {
            TokenType::Word => {
                pieces.push(Piece::Word {
                    text: token.value.clone(),
                    pos: token.pos,
                });
                index += 1;
            }
            TokenType::Text => {
                pieces.push(Piece::Slot {
                    slot: SlotPiece::Text(token.value.clone()),
                    pos: token.pos,
                });
                index += 1;
            }
            TokenType::Dropdown => {
                pieces.push(Piece::Slot {
                    slot: SlotPiece::Dropdown(token.value.clone()),
                    pos: token.pos,
                });
                index += 1;
            }
            TokenType::ArgRef => {
                pieces.push(Piece::Slot {
                    slot: SlotPiece::ArgRef(token.value.clone()),
                    pos: token.pos,
                });
                index += 1;
            }
            TokenType::BoolArgRef => {
                pieces.push(Piece::Slot {
                    slot: SlotPiece::BoolArgRef(token.value.clone()),
                    pos: token.pos,
                });
                index += 1;
            }
            TokenType::LParen | TokenType::LAngle => {
                let close = if token.typ == TokenType::LParen {
                    TokenType::RParen
                } else {
                    TokenType::RAngle
                };
                let end = find_group_end(tokens, index, token.typ, close).ok_or_else(|| {
                    CompileError::new(
                        ErrorKind::Syntax,
                        format!(
                            "missing matching '{}'",
                            if close == TokenType::RParen { ")" } else { ">" }
                        ),
                        token.pos,
                    )
                })?;
                let inner = build_pieces(&tokens[index + 1..end])?;
                let slot = if token.typ == TokenType::LParen {
                    paren_group_slot(inner)
                } else {
                    SlotPiece::Angle(inner)
                };
                pieces.push(Piece::Slot {
                    slot,
                    pos: token.pos,
                });
                index = end + 1;
            }
            TokenType::RParen | TokenType::RAngle => {
                return Err(CompileError::new(
                    ErrorKind::Syntax,
                    format!("unexpected '{}'", token.value),
                    token.pos,
                ));
            }
            TokenType::End | TokenType::Else => {
                return Err(CompileError::new(
                    ErrorKind::Syntax,
                    format!("'{}' must stand on its own line", token.value),
                    token.pos,
                ));
            }
            TokenType::Comment | TokenType::Newline | TokenType::Eof => {
                index += 1;
            }
        }
    }
    Ok(pieces)
}

/// Round dropdowns like `(color v)` read as a paren group ending in the
/// bare word `v`.
fn paren_group_slot(inner: Vec<Piece>) -> SlotPiece {
    let all_words = inner.iter().all(|piece| matches!(piece, Piece::Word { .. }));
    if all_words && inner.len() >= 2 {
        if let Some(Piece::Word { text, .. }) = inner.last() {
            if text == "v" {
                let value = display_words(&inner[..inner.len() - 1]);
                return SlotPiece::Dropdown(value);
            }
        }
    }
    SlotPiece::Paren(inner)
}

fn find_group_end(
    tokens: &[Token],
    start: usize,
    open: TokenType,
    close: TokenType,
) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, token) in tokens.iter().enumerate().skip(start + 1) {
        if token.typ == open {
            depth += 1;
        } else if token.typ == close {
            if depth == 0 {
                return Some(offset);
            }
            depth -= 1;
        }
    }
    None
}

fn find_last_word(pieces: &[Piece], word: &str) -> Option<usize> {
    pieces
        .iter()
        .rposition(|piece| matches!(piece, Piece::Word { text, .. } if text == word))
}

fn piece_shapes(pieces: &[Piece]) -> Vec<PieceShape> {
    pieces
        .iter()
        .map(|piece| match piece {
            Piece::Word { text, .. } => PieceShape::Word(text.as_str()),
            Piece::Slot {
                slot: SlotPiece::Dropdown(_),
                ..
            } => PieceShape::Dropdown,
            Piece::Slot { .. } => PieceShape::Slot,
        })
        .collect()
}

fn display_words(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .filter_map(|piece| match piece {
            Piece::Word { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_pieces(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .map(|piece| match piece {
            Piece::Word { text, .. } => text.clone(),
            Piece::Slot { slot, .. } => match slot {
                SlotPiece::Text(text) => format!("[{}]", text),
                SlotPiece::Dropdown(value) => format!("[{} v]", value),
                SlotPiece::ArgRef(name) => format!("{{{}}}", name),
                SlotPiece::BoolArgRef(name) => format!("{{<{}>}}", name),
                SlotPiece::Paren(inner) => format!("({})", display_pieces(inner)),
                SlotPiece::Angle(inner) => format!("<{}>", display_pieces(inner)),
            },
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_number(text: &str) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    if body.is_empty() || body == "." {
        return false;
    }
    body.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
        && body.chars().filter(|ch| *ch == '.').count() <= 1
}

fn is_hex_color(text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^#([0-9a-fA-F]{6}|[0-9a-fA-F]{3})$").unwrap())
        .is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Result<Script, CompileError> {
        let resolver = IdentifierNamespace::new();
        parse_with(source, &resolver)
    }

    fn parse_with(source: &str, resolver: &IdentifierNamespace) -> Result<Script, CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut definitions = Vec::new();
        for line in token_lines(&tokens) {
            if is_define_line(line) {
                definitions.push(parse_define_line(line)?);
            }
        }
        let mut parser = Parser::new(tokens, resolver, Scope::Global, definitions);
        parser.parse_script()
    }

    #[test]
    fn nesting_balance() {
        let script = parse("repeat [10]\nmove [10] steps\nend\n").unwrap();
        assert_eq!(script.statements.len(), 1);
        let repeat = &script.statements[0];
        assert_eq!(repeat.opcode, "control_repeat");
        assert_eq!(repeat.substack.len(), 1);
        assert_eq!(repeat.substack[0].opcode, "motion_movesteps");
    }

    #[test]
    fn missing_end_is_a_nesting_error() {
        let err = parse("repeat [10]\nmove [10] steps\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Nesting(NestingKind::UnclosedBlock));
    }

    #[test]
    fn stray_end_is_a_nesting_error() {
        let err = parse("move [10] steps\nend\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Nesting(NestingKind::UnmatchedEnd));
    }

    #[test]
    fn else_upgrades_if_to_if_else() {
        let script = parse("if <mouse down?> then\nshow\nelse\nhide\nend\n").unwrap();
        let statement = &script.statements[0];
        assert_eq!(statement.opcode, "control_if_else");
        assert_eq!(statement.substack[0].opcode, "looks_show");
        assert_eq!(
            statement.else_substack.as_ref().unwrap()[0].opcode,
            "looks_hide"
        );
    }

    #[test]
    fn else_without_if_is_a_nesting_error() {
        let err = parse("forever\nelse\nend\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Nesting(NestingKind::UnmatchedElse));
        let err = parse("else\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Nesting(NestingKind::UnmatchedElse));
    }

    #[test]
    fn unknown_block_reports_the_line() {
        let err = parse("frobnicate [10] times\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownBlock);
        assert!(err.message.contains("frobnicate"));
    }

    #[test]
    fn nested_reporter_in_value_slot() {
        let script = parse("move (x position) steps\n").unwrap();
        let statement = &script.statements[0];
        match statement.slot("STEPS").unwrap() {
            SlotValue::Value(ValueExpr::Reporter(inner)) => {
                assert_eq!(inner.opcode, "motion_xposition");
            }
            other => panic!("expected reporter, got {:?}", other),
        }
    }

    #[test]
    fn literal_slot_stays_literal() {
        let script = parse("move [10] steps\n").unwrap();
        match script.statements[0].slot("STEPS").unwrap() {
            SlotValue::Value(ValueExpr::Literal { text, .. }) => assert_eq!(text, "10"),
            other => panic!("expected literal, got {:?}", other),
        }
    }

    #[test]
    fn boolean_precedence_and_binds_tighter_than_or() {
        let script =
            parse("wait until <<mouse down?> and <mouse down?> or <mouse down?>>\n").unwrap();
        let statement = &script.statements[0];
        match statement.slot("CONDITION").unwrap() {
            SlotValue::Bool(BoolExpr::Or(left, _)) => {
                assert!(matches!(**left, BoolExpr::And(_, _)));
            }
            other => panic!("expected or at the top, got {:?}", other),
        }
    }

    #[test]
    fn not_is_a_tight_prefix() {
        let script = parse("wait until <not <mouse down?> and <mouse down?>>\n").unwrap();
        match script.statements[0].slot("CONDITION").unwrap() {
            SlotValue::Bool(BoolExpr::And(left, _)) => {
                assert!(matches!(**left, BoolExpr::Not(_)));
            }
            other => panic!("expected and at the top, got {:?}", other),
        }
    }

    #[test]
    fn comparison_predicate_via_catalog() {
        let script = parse("wait until <(timer) > [10]>\n").unwrap();
        match script.statements[0].slot("CONDITION").unwrap() {
            SlotValue::Bool(BoolExpr::Pred(inner)) => {
                assert_eq!(inner.opcode, "operator_gt");
            }
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    #[test]
    fn define_header_with_params() {
        let script = parse("define jump (height) <fast>\nchange y by {height}\nend\n").unwrap();
        let definition = script.definition.as_ref().unwrap();
        assert_eq!(definition.proccode(), "jump %s %b");
        assert!(!definition.warp);
        assert_eq!(script.statements.len(), 1);
        match script.statements[0].slot("DY").unwrap() {
            SlotValue::Value(ValueExpr::Arg { name, .. }) => assert_eq!(name, "height"),
            other => panic!("expected arg reference, got {:?}", other),
        }
    }

    #[test]
    fn norefresh_marker_sets_warp() {
        let script = parse("define dash (speed) #norefresh\nend\n").unwrap();
        assert!(script.definition.unwrap().warp);
    }

    #[test]
    fn undeclared_argument_is_rejected() {
        let err = parse("define jump (height)\nchange y by {other}\nend\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndeclaredArgument);
        assert!(err.message.contains("other"));
    }

    #[test]
    fn argument_outside_definition_is_rejected() {
        let err = parse("change y by {height}\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndeclaredArgument);
    }

    #[test]
    fn definition_body_requires_end() {
        let err = parse("define jump (height)\nchange y by {height}\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Nesting(NestingKind::UnclosedBlock));
    }

    #[test]
    fn custom_call_matches_definition_shape() {
        let resolver = IdentifierNamespace::new();
        let def_tokens = Lexer::new("define jump (height)\nend\n").tokenize().unwrap();
        let definition = parse_define_line(token_lines(&def_tokens)[0]).unwrap();
        let call_tokens = Lexer::new("jump [10]\n").tokenize().unwrap();
        let mut parser = Parser::new(call_tokens, &resolver, Scope::Global, vec![definition]);
        let script = parser.parse_script().unwrap();
        let call = &script.statements[0];
        assert_eq!(call.opcode, "procedures_call");
        assert_eq!(call.custom_call.as_deref(), Some("jump %s"));
        assert_eq!(call.slots.len(), 1);
        assert_eq!(call.slots[0].0, "height");
    }

    #[test]
    fn comments_attach_to_the_following_statement() {
        let script = parse("// ready\nshow // go\n").unwrap();
        let statement = &script.statements[0];
        assert_eq!(statement.comment.as_deref(), Some("ready\ngo"));
    }

    #[test]
    fn trailing_comments_survive() {
        let script = parse("show\n// that is all\n").unwrap();
        assert_eq!(script.trailing_comments, vec!["that is all".to_string()]);
    }

    #[test]
    fn effect_name_swaps_to_the_sound_family() {
        let script = parse("set [pitch v] effect to [100]\n").unwrap();
        assert_eq!(script.statements[0].opcode, "sound_seteffectto");
        let script = parse("change [color v] effect by [25]\n").unwrap();
        assert_eq!(script.statements[0].opcode, "looks_changeeffectby");
    }

    #[test]
    fn dropdown_in_value_position_becomes_a_menu_slot() {
        let script = parse("go to [mouse-pointer v]\n").unwrap();
        let statement = &script.statements[0];
        assert_eq!(statement.opcode, "motion_goto");
        match statement.slot("TO").unwrap() {
            SlotValue::Dropdown { value } => assert_eq!(value, "mouse-pointer"),
            other => panic!("expected dropdown, got {:?}", other),
        }
    }

    #[test]
    fn variable_and_list_reporters_resolved_by_namespace() {
        let resolver = IdentifierNamespace::new();
        resolver.register(RefKind::List, Scope::Global, "inventory", "list_1");
        let script = parse_with("say (inventory)\nsay (score)\n", &resolver).unwrap();
        match script.statements[0].slot("MESSAGE").unwrap() {
            SlotValue::Value(ValueExpr::Reporter(inner)) => {
                assert_eq!(inner.opcode, "data_listcontents");
            }
            other => panic!("expected list reporter, got {:?}", other),
        }
        match script.statements[1].slot("MESSAGE").unwrap() {
            SlotValue::Value(ValueExpr::Reporter(inner)) => {
                assert_eq!(inner.opcode, "data_variable");
            }
            other => panic!("expected variable reporter, got {:?}", other),
        }
    }

    #[test]
    fn inline_math_with_bare_operands() {
        let script = parse("move (1 + 2) steps\n").unwrap();
        match script.statements[0].slot("STEPS").unwrap() {
            SlotValue::Value(ValueExpr::Reporter(inner)) => {
                assert_eq!(inner.opcode, "operator_add");
            }
            other => panic!("expected add reporter, got {:?}", other),
        }
    }

    #[test]
    fn color_literal_slot() {
        let script = parse("set pen color to (#a1b2c3)\n").unwrap();
        match script.statements[0].slot("COLOR").unwrap() {
            SlotValue::Value(ValueExpr::Color { hex, .. }) => assert_eq!(hex, "#a1b2c3"),
            other => panic!("expected color, got {:?}", other),
        }
        let err = parse("set pen color to [red]\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }
}
