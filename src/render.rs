use crate::catalog::{self, Catalog, Flavor, Segment, SlotKind, WrapKind};
use crate::error::MalformedGraphError;
use crate::graph::{Block, BlockGraph, Input, Literal};
use std::collections::HashSet;

const INDENT: &str = "    ";

/// Renders a block graph back to source text. Scripts come out in layout
/// order, separated by blank lines; chains that lost their anchor render
/// last as scripts of their own.
pub fn render(graph: &BlockGraph) -> Result<String, MalformedGraphError> {
    let mut renderer = Renderer {
        graph,
        catalog: Catalog::global(),
        visited: HashSet::new(),
    };
    let mut scripts: Vec<String> = Vec::new();

    for id in graph.top_level_ids() {
        if renderer.visited.contains(id.as_str()) {
            continue;
        }
        scripts.push(renderer.render_script(id)?);
    }

    // orphans: no parent, or a parent id that is not in the graph
    let orphan_heads: Vec<String> = graph
        .blocks
        .iter()
        .filter(|(id, block)| {
            !renderer.visited.contains(id.as_str())
                && !block.shadow
                && block
                    .parent
                    .as_ref()
                    .map(|parent| !graph.blocks.contains_key(parent))
                    .unwrap_or(true)
        })
        .map(|(id, _)| id.clone())
        .collect();
    for id in orphan_heads {
        if !renderer.visited.contains(id.as_str()) {
            scripts.push(renderer.render_script(&id)?);
        }
    }

    // anything still unvisited is linked in a loop with no entry point;
    // walking it trips the cycle check
    let leftovers: Vec<String> = graph
        .blocks
        .iter()
        .filter(|(id, block)| !renderer.visited.contains(id.as_str()) && !block.shadow)
        .map(|(id, _)| id.clone())
        .collect();
    for id in leftovers {
        if !renderer.visited.contains(id.as_str()) {
            scripts.push(renderer.render_script(&id)?);
        }
    }

    if !graph.trailing_comments.is_empty() {
        let block: Vec<String> = graph
            .trailing_comments
            .iter()
            .map(|comment| format!("// {}", comment))
            .collect();
        scripts.push(block.join("\n"));
    }

    if scripts.is_empty() {
        return Ok(String::new());
    }
    Ok(scripts.join("\n\n") + "\n")
}

struct Renderer<'a> {
    graph: &'a BlockGraph,
    catalog: &'static Catalog,
    visited: HashSet<String>,
}

impl<'a> Renderer<'a> {
    fn render_script(&mut self, head: &str) -> Result<String, MalformedGraphError> {
        let block = self
            .graph
            .get(head)
            .ok_or_else(|| MalformedGraphError::new(format!("dangling block id '{}'", head)))?;
        // a stray reporter renders as a bare expression line
        let flavor = self.catalog.entry(&block.opcode).map(|entry| entry.flavor);
        if matches!(flavor, Some(Flavor::Reporter) | Some(Flavor::Boolean))
            || block.opcode == catalog::ARG_REPORTER_STRING
            || block.opcode == catalog::ARG_REPORTER_BOOLEAN
        {
            return self.reporter_text(head);
        }
        let mut lines = Vec::new();
        self.render_chain(head, 0, &mut lines)?;
        Ok(lines.join("\n"))
    }

    fn render_chain(
        &mut self,
        head: &str,
        indent: usize,
        lines: &mut Vec<String>,
    ) -> Result<(), MalformedGraphError> {
        let mut current = Some(head.to_string());
        while let Some(id) = current {
            if !self.visited.insert(id.clone()) {
                return Err(MalformedGraphError::new(format!(
                    "cycle detected at block '{}'",
                    id
                )));
            }
            let block = self
                .graph
                .get(&id)
                .ok_or_else(|| MalformedGraphError::new(format!("dangling block id '{}'", id)))?
                .clone();

            if block.opcode == catalog::PROCEDURES_DEFINITION {
                lines.push(self.define_line(&block)?);
                if let Some(next) = &block.next {
                    self.render_chain(next, indent + 1, lines)?;
                }
                lines.push("end".to_string());
                return Ok(());
            }

            let pad = INDENT.repeat(indent);
            if let Some(comment) = &block.comment {
                for line in comment.split('\n') {
                    lines.push(format!("{}// {}", pad, line));
                }
            }
            lines.push(format!("{}{}", pad, self.statement_line(&block)?));

            let wrap = self
                .catalog
                .entry(&block.opcode)
                .map(|entry| entry.wrap)
                .unwrap_or(WrapKind::None);
            if wrap != WrapKind::None {
                if let Some(Input::Substack(sub)) = block.inputs.get("SUBSTACK") {
                    self.render_chain(sub, indent + 1, lines)?;
                }
                if wrap == WrapKind::SubstackElse {
                    lines.push(format!("{}else", pad));
                    if let Some(Input::Substack(sub)) = block.inputs.get("SUBSTACK2") {
                        self.render_chain(sub, indent + 1, lines)?;
                    }
                }
                lines.push(format!("{}end", pad));
            }

            current = block.next.clone();
        }
        Ok(())
    }

    fn statement_line(&mut self, block: &Block) -> Result<String, MalformedGraphError> {
        if block.opcode == catalog::PROCEDURES_CALL {
            return self.call_line(block);
        }
        let entry = self.catalog.entry(&block.opcode).ok_or_else(|| {
            MalformedGraphError::new(format!("unknown opcode '{}'", block.opcode))
        })?;
        let mut parts = Vec::new();
        for segment in entry.segments.clone() {
            match segment {
                Segment::Word(word) => parts.push(word),
                Segment::Slot { name, kind } => parts.push(self.slot_text(block, &name, kind)?),
            }
        }
        Ok(parts.join(" "))
    }

    fn slot_text(
        &mut self,
        block: &Block,
        name: &str,
        kind: SlotKind,
    ) -> Result<String, MalformedGraphError> {
        if kind == SlotKind::Dropdown {
            // dropdowns live in a field, except menu-backed ones (pen color
            // params and the like) which sit in an input as a menu shadow
            if let Some(field) = block.fields.get(name) {
                let display = if self.catalog.is_menu_opcode(&block.opcode) {
                    catalog::display_menu_value(&block.opcode, name, &field.value)
                } else {
                    field.value.clone()
                };
                return Ok(format!("[{} v]", display));
            }
        }
        self.input_text(block, name, kind)
    }

    fn input_text(
        &mut self,
        block: &Block,
        name: &str,
        kind: SlotKind,
    ) -> Result<String, MalformedGraphError> {
        let Some(input) = block.inputs.get(name) else {
            return Ok(match kind {
                SlotKind::Boolean => "<>".to_string(),
                SlotKind::Color => "(#000000)".to_string(),
                SlotKind::Dropdown => "[ v]".to_string(),
                _ => "[]".to_string(),
            });
        };
        match input {
            Input::Shadow(literal) => Ok(literal_text(literal)),
            Input::MenuShadow(id) => {
                self.visited.insert(id.clone());
                let menu = self.graph.get(id).ok_or_else(|| {
                    MalformedGraphError::new(format!("dangling menu id '{}'", id))
                })?;
                let (field_name, field) = menu.fields.iter().next().ok_or_else(|| {
                    MalformedGraphError::new(format!(
                        "menu block '{}' carries no field",
                        menu.opcode
                    ))
                })?;
                let display = catalog::display_menu_value(&menu.opcode, field_name, &field.value);
                Ok(format!("[{} v]", display))
            }
            Input::Block { id, .. } => self.reporter_text(id),
            Input::Boolean(id) => self.reporter_text(id),
            Input::Substack(id) => Err(MalformedGraphError::new(format!(
                "statement block '{}' plugged into value slot {}",
                id, name
            ))),
        }
    }

    fn reporter_text(&mut self, id: &str) -> Result<String, MalformedGraphError> {
        if !self.visited.insert(id.to_string()) {
            return Err(MalformedGraphError::new(format!(
                "cycle detected at block '{}'",
                id
            )));
        }
        let block = self
            .graph
            .get(id)
            .ok_or_else(|| MalformedGraphError::new(format!("dangling block id '{}'", id)))?
            .clone();
        match block.opcode.as_str() {
            "argument_reporter_string_number" => {
                return Ok(format!("{{{}}}", field_value(&block, "VALUE")));
            }
            "argument_reporter_boolean" => {
                return Ok(format!("{{<{}>}}", field_value(&block, "VALUE")));
            }
            "data_variable" => return Ok(format!("({})", field_value(&block, "VARIABLE"))),
            "data_listcontents" => return Ok(format!("({})", field_value(&block, "LIST"))),
            _ => {}
        }
        let entry = self.catalog.entry(&block.opcode).ok_or_else(|| {
            MalformedGraphError::new(format!("unknown opcode '{}'", block.opcode))
        })?;
        let flavor = entry.flavor;
        let mut parts = Vec::new();
        for segment in entry.segments.clone() {
            match segment {
                Segment::Word(word) => parts.push(word),
                Segment::Slot { name, kind } => parts.push(self.slot_text(&block, &name, kind)?),
            }
        }
        let inner = parts.join(" ");
        Ok(match flavor {
            Flavor::Boolean => format!("<{}>", inner),
            _ => format!("({})", inner),
        })
    }

    fn call_line(&mut self, block: &Block) -> Result<String, MalformedGraphError> {
        let mutation = block.mutation.as_ref().ok_or_else(|| {
            MalformedGraphError::new("procedures_call without a mutation record")
        })?;
        let mut parts = Vec::new();
        let mut arg_index = 0usize;
        for token in mutation.proccode.split_whitespace() {
            match token {
                "%s" | "%n" | "%b" => {
                    let arg_id = mutation.argument_ids.get(arg_index).ok_or_else(|| {
                        MalformedGraphError::new(format!(
                            "proccode '{}' names more arguments than argumentids",
                            mutation.proccode
                        ))
                    })?;
                    arg_index += 1;
                    let kind = if token == "%b" {
                        SlotKind::Boolean
                    } else {
                        SlotKind::Text
                    };
                    parts.push(self.input_text(block, arg_id, kind)?);
                }
                word => parts.push(word.to_string()),
            }
        }
        Ok(parts.join(" "))
    }

    fn define_line(&mut self, block: &Block) -> Result<String, MalformedGraphError> {
        let proto_id = block
            .inputs
            .get("custom_block")
            .and_then(|input| input.referenced_id())
            .ok_or_else(|| {
                MalformedGraphError::new("definition block without a prototype input")
            })?;
        self.visited.insert(proto_id.to_string());
        let prototype = self.graph.get(proto_id).ok_or_else(|| {
            MalformedGraphError::new(format!("dangling prototype id '{}'", proto_id))
        })?;
        // argument reporter shadows inside the prototype never render on
        // their own
        for input in prototype.inputs.values() {
            if let Some(inner) = input.referenced_id() {
                self.visited.insert(inner.to_string());
            }
        }
        let mutation = prototype.mutation.as_ref().ok_or_else(|| {
            MalformedGraphError::new("prototype block without a mutation record")
        })?;
        let mut parts = vec!["define".to_string()];
        let mut arg_index = 0usize;
        for token in mutation.proccode.split_whitespace() {
            match token {
                "%s" | "%n" | "%b" => {
                    let name = mutation
                        .argument_names
                        .get(arg_index)
                        .map(String::as_str)
                        .unwrap_or("arg");
                    arg_index += 1;
                    if token == "%b" {
                        parts.push(format!("<{}>", name));
                    } else {
                        parts.push(format!("({})", name));
                    }
                }
                word => parts.push(word.to_string()),
            }
        }
        if mutation.warp {
            parts.push("#norefresh".to_string());
        }
        Ok(parts.join(" "))
    }
}

fn field_value(block: &Block, name: &str) -> String {
    block
        .fields
        .get(name)
        .map(|field| field.value.clone())
        .unwrap_or_default()
}

fn literal_text(literal: &Literal) -> String {
    match literal {
        Literal::Number(text) | Literal::Text(text) => format!("[{}]", text),
        Literal::Color(text) => format!("({})", text),
        Literal::Broadcast { name, .. } => format!("[{} v]", name),
        Literal::Variable { name, .. } | Literal::List { name, .. } => format!("({})", name),
    }
}
