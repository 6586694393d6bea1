use crate::error::MalformedGraphError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub type BlockId = String;

/// A literal value sitting in a shadow slot. Numbers keep their source
/// spelling so rendering them back does not reformat `1.50` into `1.5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(String),
    Text(String),
    Color(String),
    Broadcast { name: String, id: String },
    Variable { name: String, id: String },
    List { name: String, id: String },
}

impl Literal {
    pub fn as_text(&self) -> &str {
        match self {
            Literal::Number(text) | Literal::Text(text) | Literal::Color(text) => text,
            Literal::Broadcast { name, .. }
            | Literal::Variable { name, .. }
            | Literal::List { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// A bare literal behind the slot: `[1, literal]`.
    Shadow(Literal),
    /// A reporter plugged into the slot, possibly obscuring the default
    /// shadow literal: `[3, id, shadow]`, or `[2, id]` without one.
    Block {
        id: BlockId,
        obscured: Option<Literal>,
    },
    /// A predicate in a boolean slot: `[2, id]`, no shadow ever.
    Boolean(BlockId),
    /// The first statement of a C-block body: `[2, id]`.
    Substack(BlockId),
    /// A dropdown backed by a menu shadow block: `[1, id]`.
    MenuShadow(BlockId),
}

impl Input {
    pub fn referenced_id(&self) -> Option<&str> {
        match self {
            Input::Shadow(_) => None,
            Input::Block { id, .. }
            | Input::Boolean(id)
            | Input::Substack(id)
            | Input::MenuShadow(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub value: String,
    pub ref_id: Option<String>,
}

impl Field {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ref_id: None,
        }
    }

    pub fn with_id(value: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ref_id: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mutation {
    pub proccode: String,
    pub argument_ids: Vec<String>,
    pub argument_names: Vec<String>,
    pub argument_defaults: Vec<String>,
    pub warp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub opcode: String,
    pub parent: Option<BlockId>,
    pub next: Option<BlockId>,
    pub inputs: BTreeMap<String, Input>,
    pub fields: BTreeMap<String, Field>,
    pub shadow: bool,
    pub top_level: bool,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub mutation: Option<Mutation>,
    pub comment: Option<String>,
}

impl Block {
    pub fn new(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            parent: None,
            next: None,
            inputs: BTreeMap::new(),
            fields: BTreeMap::new(),
            shadow: false,
            top_level: false,
            x: None,
            y: None,
            mutation: None,
            comment: None,
        }
    }
}

/// Arena of block nodes keyed by id. All links between nodes are ids into
/// this map, which keeps malformed graphs (dangling references, cycles)
/// detectable instead of causing unbounded traversal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockGraph {
    pub blocks: BTreeMap<BlockId, Block>,
    /// `//` comment lines that stood on their own at the end of a script.
    pub trailing_comments: Vec<String>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<BlockId>, block: Block) {
        self.blocks.insert(id.into(), block);
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Wires `next`/`parent` both ways between two statement blocks.
    pub fn link_next(&mut self, prev: &str, next: &str) {
        if let Some(block) = self.blocks.get_mut(prev) {
            block.next = Some(next.to_string());
        }
        if let Some(block) = self.blocks.get_mut(next) {
            block.parent = Some(prev.to_string());
        }
    }

    /// Top-level entry ids ordered by position, then id, so output order is
    /// stable for identical layouts.
    pub fn top_level_ids(&self) -> Vec<&BlockId> {
        let mut ids: Vec<&BlockId> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.top_level)
            .map(|(id, _)| id)
            .collect();
        ids.sort_by(|a, b| {
            let block_a = &self.blocks[*a];
            let block_b = &self.blocks[*b];
            let key_a = (block_a.y.unwrap_or(0.0), block_a.x.unwrap_or(0.0));
            let key_b = (block_b.y.unwrap_or(0.0), block_b.x.unwrap_or(0.0));
            key_a
                .partial_cmp(&key_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        ids
    }

    /// Absorbs another fragment. Ids are expected to be unique across
    /// fragments since they come from one shared allocator per pass.
    pub fn merge(&mut self, other: BlockGraph) {
        self.blocks.extend(other.blocks);
        self.trailing_comments.extend(other.trailing_comments);
    }

    /// Serializes into the container's block-map shape (the `blocks` object
    /// of a target in project.json).
    pub fn to_project_json(&self) -> Value {
        let mut out = Map::new();
        for (id, block) in &self.blocks {
            out.insert(id.clone(), block_to_json(block));
        }
        Value::Object(out)
    }

    /// Reads a block map produced by this crate or by the container
    /// environment itself.
    pub fn from_project_json(value: &Value) -> Result<Self, MalformedGraphError> {
        let map = value.as_object().ok_or_else(|| {
            MalformedGraphError::new("block map is not a JSON object")
        })?;
        let mut graph = BlockGraph::new();
        for (id, raw) in map {
            graph.insert(id.clone(), block_from_json(id, raw)?);
        }
        Ok(graph)
    }
}

fn literal_to_json(literal: &Literal) -> Value {
    match literal {
        Literal::Number(text) => json!([4, text]),
        Literal::Text(text) => json!([10, text]),
        Literal::Color(text) => json!([9, text]),
        Literal::Broadcast { name, id } => json!([11, name, id]),
        Literal::Variable { name, id } => json!([12, name, id]),
        Literal::List { name, id } => json!([13, name, id]),
    }
}

fn literal_from_json(value: &Value) -> Result<Literal, MalformedGraphError> {
    let items = value
        .as_array()
        .ok_or_else(|| MalformedGraphError::new("literal input is not an array"))?;
    let code = items.first().and_then(Value::as_i64).unwrap_or(0);
    let text = |index: usize| -> String {
        match items.get(index) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            _ => String::new(),
        }
    };
    match code {
        4..=8 => Ok(Literal::Number(text(1))),
        9 => Ok(Literal::Color(text(1))),
        10 => Ok(Literal::Text(text(1))),
        11 => Ok(Literal::Broadcast {
            name: text(1),
            id: text(2),
        }),
        12 => Ok(Literal::Variable {
            name: text(1),
            id: text(2),
        }),
        13 => Ok(Literal::List {
            name: text(1),
            id: text(2),
        }),
        other => Err(MalformedGraphError::new(format!(
            "unknown literal code {} in input",
            other
        ))),
    }
}

fn input_to_json(input: &Input) -> Value {
    match input {
        Input::Shadow(literal) => json!([1, literal_to_json(literal)]),
        Input::MenuShadow(id) => json!([1, id]),
        Input::Block {
            id,
            obscured: Some(literal),
        } => json!([3, id, literal_to_json(literal)]),
        Input::Block { id, obscured: None } => json!([2, id]),
        Input::Boolean(id) => json!([2, id]),
        Input::Substack(id) => json!([2, id]),
    }
}

fn input_from_json(name: &str, value: &Value) -> Result<Input, MalformedGraphError> {
    let items = value
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| MalformedGraphError::new(format!("input {} is not an array", name)))?;
    let mode = items[0].as_i64().unwrap_or(0);
    match mode {
        1 => match items.get(1) {
            Some(Value::String(id)) => Ok(Input::MenuShadow(id.clone())),
            Some(inner) => Ok(Input::Shadow(literal_from_json(inner)?)),
            None => Err(MalformedGraphError::new(format!("input {} has no payload", name))),
        },
        2 => match items.get(1) {
            Some(Value::String(id)) => {
                if name.starts_with("SUBSTACK") {
                    Ok(Input::Substack(id.clone()))
                } else if name == "CONDITION" || name.starts_with("OPERAND") {
                    Ok(Input::Boolean(id.clone()))
                } else {
                    Ok(Input::Block {
                        id: id.clone(),
                        obscured: None,
                    })
                }
            }
            Some(inner) => Ok(Input::Shadow(literal_from_json(inner)?)),
            None => Err(MalformedGraphError::new(format!("input {} has no payload", name))),
        },
        3 => {
            let id = items
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    MalformedGraphError::new(format!("input {} mode 3 without block id", name))
                })?
                .to_string();
            let obscured = match items.get(2) {
                Some(inner) if inner.is_array() => Some(literal_from_json(inner)?),
                _ => None,
            };
            Ok(Input::Block { id, obscured })
        }
        other => Err(MalformedGraphError::new(format!(
            "input {} has unknown mode {}",
            name, other
        ))),
    }
}

fn block_to_json(block: &Block) -> Value {
    let mut inputs = Map::new();
    for (name, input) in &block.inputs {
        inputs.insert(name.clone(), input_to_json(input));
    }
    let mut fields = Map::new();
    for (name, field) in &block.fields {
        let id_value = match &field.ref_id {
            Some(id) => json!(id),
            None => Value::Null,
        };
        fields.insert(name.clone(), json!([field.value, id_value]));
    }

    let mut out = Map::new();
    out.insert("opcode".to_string(), json!(block.opcode));
    out.insert(
        "next".to_string(),
        block.next.as_ref().map(|id| json!(id)).unwrap_or(Value::Null),
    );
    out.insert(
        "parent".to_string(),
        block
            .parent
            .as_ref()
            .map(|id| json!(id))
            .unwrap_or(Value::Null),
    );
    out.insert("inputs".to_string(), Value::Object(inputs));
    out.insert("fields".to_string(), Value::Object(fields));
    out.insert("shadow".to_string(), json!(block.shadow));
    out.insert("topLevel".to_string(), json!(block.top_level));
    if block.top_level {
        out.insert("x".to_string(), json!(block.x.unwrap_or(0.0)));
        out.insert("y".to_string(), json!(block.y.unwrap_or(0.0)));
    }
    if let Some(mutation) = &block.mutation {
        out.insert("mutation".to_string(), mutation_to_json(mutation));
    }
    Value::Object(out)
}

fn mutation_to_json(mutation: &Mutation) -> Value {
    let mut out = Map::new();
    out.insert("tagName".to_string(), json!("mutation"));
    out.insert("children".to_string(), json!([]));
    out.insert("proccode".to_string(), json!(mutation.proccode));
    // argument vectors are JSON arrays encoded as strings, per the
    // container format
    out.insert(
        "argumentids".to_string(),
        json!(serde_json::to_string(&mutation.argument_ids).unwrap_or_default()),
    );
    if !mutation.argument_names.is_empty() {
        out.insert(
            "argumentnames".to_string(),
            json!(serde_json::to_string(&mutation.argument_names).unwrap_or_default()),
        );
        out.insert(
            "argumentdefaults".to_string(),
            json!(serde_json::to_string(&mutation.argument_defaults).unwrap_or_default()),
        );
    }
    out.insert(
        "warp".to_string(),
        json!(if mutation.warp { "true" } else { "false" }),
    );
    Value::Object(out)
}

fn mutation_from_json(value: &Value) -> Mutation {
    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    };
    Mutation {
        proccode: value
            .get("proccode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        argument_ids: string_list("argumentids"),
        argument_names: string_list("argumentnames"),
        argument_defaults: string_list("argumentdefaults"),
        warp: matches!(
            value.get("warp"),
            Some(Value::String(flag)) if flag == "true"
        ) || matches!(value.get("warp"), Some(Value::Bool(true))),
    }
}

fn block_from_json(id: &str, value: &Value) -> Result<Block, MalformedGraphError> {
    let object = value
        .as_object()
        .ok_or_else(|| MalformedGraphError::new(format!("block {} is not an object", id)))?;
    let opcode = object
        .get("opcode")
        .and_then(Value::as_str)
        .ok_or_else(|| MalformedGraphError::new(format!("block {} has no opcode", id)))?;

    let mut block = Block::new(opcode);
    block.next = object
        .get("next")
        .and_then(Value::as_str)
        .map(str::to_string);
    block.parent = object
        .get("parent")
        .and_then(Value::as_str)
        .map(str::to_string);
    block.shadow = object
        .get("shadow")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    block.top_level = object
        .get("topLevel")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    block.x = object.get("x").and_then(Value::as_f64);
    block.y = object.get("y").and_then(Value::as_f64);

    if let Some(inputs) = object.get("inputs").and_then(Value::as_object) {
        for (name, raw) in inputs {
            block
                .inputs
                .insert(name.clone(), input_from_json(name, raw)?);
        }
    }
    if let Some(fields) = object.get("fields").and_then(Value::as_object) {
        for (name, raw) in fields {
            let items = raw.as_array().ok_or_else(|| {
                MalformedGraphError::new(format!("field {} of block {} is not an array", name, id))
            })?;
            let value = match items.first() {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Number(number)) => number.to_string(),
                _ => String::new(),
            };
            let ref_id = items
                .get(1)
                .and_then(Value::as_str)
                .map(str::to_string);
            block.fields.insert(name.clone(), Field { value, ref_id });
        }
    }
    if let Some(mutation) = object.get("mutation") {
        block.mutation = Some(mutation_from_json(mutation));
    }
    Ok(block)
}
