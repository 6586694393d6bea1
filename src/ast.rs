#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// One statement line, after its text has been matched against a catalog
/// pattern. Reporters and predicates nested inside slots reuse this type;
/// the catalog entry for `opcode` says which flavor it is.
#[derive(Debug, Clone)]
pub struct Statement {
    pub pos: Position,
    pub opcode: String,
    /// Slot values in the catalog entry's declaration order, keyed by the
    /// entry's slot name. Custom-block calls key by argument id position.
    pub slots: Vec<(String, SlotValue)>,
    pub substack: Vec<Statement>,
    pub else_substack: Option<Vec<Statement>>,
    /// Proccode of the called definition, set only for custom-block calls.
    pub custom_call: Option<String>,
    pub comment: Option<String>,
}

impl Statement {
    pub fn new(pos: Position, opcode: impl Into<String>) -> Self {
        Self {
            pos,
            opcode: opcode.into(),
            slots: Vec::new(),
            substack: Vec::new(),
            else_substack: None,
            custom_call: None,
            comment: None,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&SlotValue> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone)]
pub enum SlotValue {
    Empty,
    Value(ValueExpr),
    Bool(BoolExpr),
    Dropdown { value: String },
}

#[derive(Debug, Clone)]
pub enum ValueExpr {
    /// Bracketed or parenthesized literal text; `numeric` records whether
    /// it came from a round slot holding a plain number.
    Literal {
        pos: Position,
        text: String,
        numeric: bool,
    },
    Color {
        pos: Position,
        hex: String,
    },
    Reporter(Box<Statement>),
    Arg {
        pos: Position,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub enum BoolExpr {
    Empty,
    Pred(Box<Statement>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Not(Box<BoolExpr>),
    Arg { pos: Position, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    StringNumber,
    Boolean,
}

impl ParamKind {
    pub fn proccode_marker(&self) -> &'static str {
        match self {
            ParamKind::StringNumber => "%s",
            ParamKind::Boolean => "%b",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            ParamKind::StringNumber => "",
            ParamKind::Boolean => "false",
        }
    }
}

#[derive(Debug, Clone)]
pub enum DefPiece {
    Label(String),
    Param { name: String, kind: ParamKind },
}

#[derive(Debug, Clone)]
pub struct CustomDefinition {
    pub pos: Position,
    pub pieces: Vec<DefPiece>,
    pub warp: bool,
}

impl CustomDefinition {
    /// The mutation proccode: label words with each parameter replaced by
    /// its `%s`/`%b` marker.
    pub fn proccode(&self) -> String {
        let mut parts = Vec::new();
        for piece in &self.pieces {
            match piece {
                DefPiece::Label(text) => parts.push(text.clone()),
                DefPiece::Param { kind, .. } => parts.push(kind.proccode_marker().to_string()),
            }
        }
        parts.join(" ")
    }

    pub fn params(&self) -> Vec<(&str, ParamKind)> {
        self.pieces
            .iter()
            .filter_map(|piece| match piece {
                DefPiece::Param { name, kind } => Some((name.as_str(), *kind)),
                DefPiece::Label(_) => None,
            })
            .collect()
    }

    pub fn param_kind(&self, name: &str) -> Option<ParamKind> {
        self.params()
            .into_iter()
            .find(|(param, _)| *param == name)
            .map(|(_, kind)| kind)
    }
}

/// One top-level script: either a custom-block definition with its body,
/// or a plain chain of statements.
#[derive(Debug, Clone)]
pub struct Script {
    pub definition: Option<CustomDefinition>,
    pub statements: Vec<Statement>,
    /// `//` comments that sat on their own lines at the end of the script.
    pub trailing_comments: Vec<String>,
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.definition.is_none() && self.statements.is_empty() && self.trailing_comments.is_empty()
    }
}
