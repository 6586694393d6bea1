use crate::ast::{BoolExpr, CustomDefinition, ParamKind, Script, SlotValue, Statement, ValueExpr};
use crate::catalog::{self, Catalog, SlotKind, WrapKind};
use crate::diag::Diagnostics;
use crate::error::{CompileError, ErrorKind};
use crate::graph::{Block, BlockGraph, BlockId, Field, Input, Literal, Mutation};
use crate::resolver::{IdentifierNamespace, RefKind, Scope};
use std::collections::HashMap;

/// Vertical distance between top-level scripts in the emitted layout.
const SCRIPT_GAP_Y: f64 = 240.0;
const SCRIPT_X: f64 = 0.0;

#[derive(Debug, Clone)]
struct DefRecord {
    arg_ids: Vec<String>,
    arg_names: Vec<String>,
    arg_kinds: Vec<ParamKind>,
    warp: bool,
}

/// Lowers parsed scripts into the block-graph arena. One builder per
/// compile pass; it owns the id allocator so ids stay unique across all
/// scripts of an actor.
pub struct GraphBuilder<'a> {
    resolver: &'a IdentifierNamespace,
    scope: Scope,
    strict: bool,
    catalog: &'static Catalog,
    graph: BlockGraph,
    counter: usize,
    arg_counter: usize,
    definitions: HashMap<String, DefRecord>,
    next_y: f64,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(resolver: &'a IdentifierNamespace, scope: Scope, strict: bool) -> Self {
        Self {
            resolver,
            scope,
            strict,
            catalog: Catalog::global(),
            graph: BlockGraph::new(),
            counter: 0,
            arg_counter: 0,
            definitions: HashMap::new(),
            next_y: 0.0,
        }
    }

    /// Collects every definition before any script is emitted, so calls can
    /// precede the definition they name.
    pub fn register_definitions(&mut self, scripts: &[Script], diagnostics: &mut Diagnostics) {
        for script in scripts {
            let Some(definition) = &script.definition else {
                continue;
            };
            let proccode = definition.proccode();
            if self.definitions.contains_key(&proccode) {
                diagnostics.warning(
                    format!("duplicate definition of '{}'", proccode),
                    self.actor_name(),
                    Some(definition.pos.line),
                );
                continue;
            }
            let params = definition.params();
            let mut record = DefRecord {
                arg_ids: Vec::with_capacity(params.len()),
                arg_names: Vec::with_capacity(params.len()),
                arg_kinds: Vec::with_capacity(params.len()),
                warp: definition.warp,
            };
            for (name, kind) in params {
                self.arg_counter += 1;
                record.arg_ids.push(format!("arg_{}", self.arg_counter));
                record.arg_names.push(name.to_string());
                record.arg_kinds.push(kind);
            }
            self.definitions.insert(proccode, record);
        }
    }

    pub fn add_script(
        &mut self,
        script: &Script,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), CompileError> {
        if let Some(definition) = &script.definition {
            self.emit_definition(definition, &script.statements, diagnostics)?;
        } else if !script.statements.is_empty() {
            let chain = self.emit_chain(&script.statements, None, diagnostics)?;
            if let Some((first, _)) = chain {
                self.place_top_level(&first);
            }
        }
        self.graph
            .trailing_comments
            .extend(script.trailing_comments.iter().cloned());
        Ok(())
    }

    pub fn finish(self) -> BlockGraph {
        self.graph
    }

    /// Counter snapshot taken before a script is emitted; [`rollback`]
    /// removes everything allocated after it when that script fails, so one
    /// bad script does not leave half a chain in the graph.
    ///
    /// [`rollback`]: GraphBuilder::rollback
    pub fn mark(&self) -> usize {
        self.counter
    }

    pub fn rollback(&mut self, mark: usize) {
        self.graph.blocks.retain(|id, _| {
            id.strip_prefix("b_")
                .and_then(|n| n.parse::<usize>().ok())
                .map(|n| n <= mark)
                .unwrap_or(true)
        });
        self.counter = mark;
    }

    fn next_id(&mut self) -> BlockId {
        self.counter += 1;
        format!("b_{}", self.counter)
    }

    fn actor_name(&self) -> Option<&str> {
        match &self.scope {
            Scope::Actor(name) => Some(name.as_str()),
            Scope::Global => None,
        }
    }

    fn place_top_level(&mut self, id: &str) {
        if let Some(block) = self.graph.blocks.get_mut(id) {
            block.top_level = true;
            block.x = Some(SCRIPT_X);
            block.y = Some(self.next_y);
        }
        self.next_y += SCRIPT_GAP_Y;
    }

    fn emit_chain(
        &mut self,
        statements: &[Statement],
        parent: Option<&BlockId>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<(BlockId, BlockId)>, CompileError> {
        let mut first: Option<BlockId> = None;
        let mut prev: Option<BlockId> = None;
        for statement in statements {
            let id = self.emit_statement(statement, None, diagnostics)?;
            match &prev {
                Some(prev_id) => self.graph.link_next(prev_id, &id),
                None => {
                    if let Some(parent_id) = parent {
                        if let Some(block) = self.graph.blocks.get_mut(&id) {
                            block.parent = Some(parent_id.clone());
                        }
                    }
                    first = Some(id.clone());
                }
            }
            prev = Some(id);
        }
        Ok(first.map(|first| (first, prev.unwrap_or_default())))
    }

    fn emit_statement(
        &mut self,
        statement: &Statement,
        parent: Option<&BlockId>,
        diagnostics: &mut Diagnostics,
    ) -> Result<BlockId, CompileError> {
        if statement.custom_call.is_some() {
            return self.emit_call(statement, parent, diagnostics);
        }
        let id = self.next_id();
        let opcode = self.catalog.normalize_opcode(&statement.opcode).to_string();
        let entry = self.catalog.entry(&opcode).cloned();
        let mut block = Block::new(&opcode);
        block.parent = parent.cloned();

        for (name, value) in &statement.slots {
            if self.catalog.is_field_slot(&opcode, name) {
                let field = self.build_field(&opcode, name, value, statement, diagnostics)?;
                block.fields.insert(name.clone(), field);
            } else {
                let kind = entry
                    .as_ref()
                    .and_then(|entry| entry.slot_kind(name))
                    .unwrap_or(SlotKind::Text);
                if let Some(input) =
                    self.build_input(&id, &opcode, name, kind, value, diagnostics)?
                {
                    block.inputs.insert(name.clone(), input);
                }
            }
        }

        let wrap = entry.map(|entry| entry.wrap).unwrap_or(WrapKind::None);
        if wrap != WrapKind::None {
            if let Some((first, _)) = self.emit_chain(&statement.substack, Some(&id), diagnostics)?
            {
                block.inputs.insert("SUBSTACK".to_string(), Input::Substack(first));
            }
            if let Some(else_branch) = &statement.else_substack {
                if let Some((first, _)) = self.emit_chain(else_branch, Some(&id), diagnostics)? {
                    block
                        .inputs
                        .insert("SUBSTACK2".to_string(), Input::Substack(first));
                }
            }
        }

        block.comment = statement.comment.clone();
        self.graph.insert(id.clone(), block);
        Ok(id)
    }

    fn build_field(
        &mut self,
        opcode: &str,
        name: &str,
        value: &SlotValue,
        statement: &Statement,
        diagnostics: &mut Diagnostics,
    ) -> Result<Field, CompileError> {
        let text = match value {
            SlotValue::Dropdown { value } => value.clone(),
            SlotValue::Value(ValueExpr::Literal { text, .. }) => text.clone(),
            _ => {
                return Err(CompileError::new(
                    ErrorKind::Syntax,
                    format!("slot {} of {} only takes a dropdown value", name, opcode),
                    statement.pos,
                ));
            }
        };
        let ref_kind = match name {
            "VARIABLE" => Some(RefKind::Variable),
            "LIST" => Some(RefKind::List),
            "BROADCAST_OPTION" => Some(RefKind::Broadcast),
            _ => None,
        };
        if let Some(kind) = ref_kind {
            let id = self.resolve_reference(kind, &text, statement, diagnostics)?;
            return Ok(Field::with_id(text, id));
        }
        if self.catalog.is_menu_opcode(opcode) {
            return Ok(Field::plain(catalog::normalize_menu_value(
                opcode, name, &text,
            )));
        }
        Ok(Field::plain(text))
    }

    fn build_input(
        &mut self,
        host: &BlockId,
        opcode: &str,
        name: &str,
        kind: SlotKind,
        value: &SlotValue,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Input>, CompileError> {
        match value {
            SlotValue::Empty => Ok(empty_input(kind)),
            SlotValue::Dropdown { value } => {
                if kind == SlotKind::Broadcast {
                    let id = self.resolve_broadcast(value, diagnostics);
                    return Ok(Some(Input::Shadow(Literal::Broadcast {
                        name: value.clone(),
                        id,
                    })));
                }
                if let Some((menu_opcode, field)) = self.catalog.menu_shadow_for(opcode, name) {
                    let menu_id = self.next_id();
                    let mut menu = Block::new(menu_opcode);
                    menu.shadow = true;
                    menu.parent = Some(host.clone());
                    menu.fields.insert(
                        field.to_string(),
                        Field::plain(catalog::normalize_menu_value(menu_opcode, field, value)),
                    );
                    self.graph.insert(menu_id.clone(), menu);
                    return Ok(Some(Input::MenuShadow(menu_id)));
                }
                Ok(Some(Input::Shadow(Literal::Text(value.clone()))))
            }
            SlotValue::Value(ValueExpr::Literal { text, .. }) => {
                let literal = match kind {
                    SlotKind::Number => Literal::Number(text.clone()),
                    _ => Literal::Text(text.clone()),
                };
                Ok(Some(Input::Shadow(literal)))
            }
            SlotValue::Value(ValueExpr::Color { hex, .. }) => {
                Ok(Some(Input::Shadow(Literal::Color(hex.clone()))))
            }
            SlotValue::Value(ValueExpr::Reporter(inner)) => {
                let inner_id = self.emit_statement(inner, Some(host), diagnostics)?;
                Ok(Some(Input::Block {
                    id: inner_id,
                    obscured: obscured_default(kind),
                }))
            }
            SlotValue::Value(ValueExpr::Arg { name: arg, .. }) => {
                let inner_id =
                    self.emit_arg_reporter(catalog::ARG_REPORTER_STRING, arg, host, false);
                Ok(Some(Input::Block {
                    id: inner_id,
                    obscured: obscured_default(kind),
                }))
            }
            SlotValue::Bool(expr) => {
                let lowered = self.lower_bool(expr, host, diagnostics)?;
                Ok(lowered.map(|inner_id| {
                    if kind == SlotKind::Boolean {
                        Input::Boolean(inner_id)
                    } else {
                        Input::Block {
                            id: inner_id,
                            obscured: obscured_default(kind),
                        }
                    }
                }))
            }
        }
    }

    fn lower_bool(
        &mut self,
        expr: &BoolExpr,
        parent: &BlockId,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<BlockId>, CompileError> {
        match expr {
            BoolExpr::Empty => Ok(None),
            BoolExpr::Pred(statement) => {
                let id = self.emit_statement(statement, Some(parent), diagnostics)?;
                Ok(Some(id))
            }
            BoolExpr::And(left, right) | BoolExpr::Or(left, right) => {
                let opcode = if matches!(expr, BoolExpr::And(_, _)) {
                    "operator_and"
                } else {
                    "operator_or"
                };
                let id = self.next_id();
                let mut block = Block::new(opcode);
                block.parent = Some(parent.clone());
                if let Some(operand) = self.lower_bool(left, &id, diagnostics)? {
                    block
                        .inputs
                        .insert("OPERAND1".to_string(), Input::Boolean(operand));
                }
                if let Some(operand) = self.lower_bool(right, &id, diagnostics)? {
                    block
                        .inputs
                        .insert("OPERAND2".to_string(), Input::Boolean(operand));
                }
                self.graph.insert(id.clone(), block);
                Ok(Some(id))
            }
            BoolExpr::Not(inner) => {
                let id = self.next_id();
                let mut block = Block::new("operator_not");
                block.parent = Some(parent.clone());
                if let Some(operand) = self.lower_bool(inner, &id, diagnostics)? {
                    block
                        .inputs
                        .insert("OPERAND".to_string(), Input::Boolean(operand));
                }
                self.graph.insert(id.clone(), block);
                Ok(Some(id))
            }
            BoolExpr::Arg { name, .. } => Ok(Some(self.emit_arg_reporter(
                catalog::ARG_REPORTER_BOOLEAN,
                name,
                parent,
                false,
            ))),
        }
    }

    fn emit_arg_reporter(
        &mut self,
        opcode: &str,
        name: &str,
        parent: &BlockId,
        shadow: bool,
    ) -> BlockId {
        let id = self.next_id();
        let mut block = Block::new(opcode);
        block.parent = Some(parent.clone());
        block.shadow = shadow;
        block.fields.insert("VALUE".to_string(), Field::plain(name));
        self.graph.insert(id.clone(), block);
        id
    }

    fn emit_call(
        &mut self,
        statement: &Statement,
        parent: Option<&BlockId>,
        diagnostics: &mut Diagnostics,
    ) -> Result<BlockId, CompileError> {
        let proccode = statement.custom_call.clone().unwrap_or_default();
        let record = self.definitions.get(&proccode).cloned().ok_or_else(|| {
            CompileError::new(
                ErrorKind::Reference,
                format!("call to undefined custom block '{}'", proccode),
                statement.pos,
            )
        })?;
        let id = self.next_id();
        let mut block = Block::new(catalog::PROCEDURES_CALL);
        block.parent = parent.cloned();
        block.mutation = Some(Mutation {
            proccode,
            argument_ids: record.arg_ids.clone(),
            argument_names: Vec::new(),
            argument_defaults: Vec::new(),
            warp: record.warp,
        });
        for (index, (_, value)) in statement.slots.iter().enumerate() {
            let Some(arg_id) = record.arg_ids.get(index) else {
                break;
            };
            let kind = match record.arg_kinds.get(index) {
                Some(ParamKind::Boolean) => SlotKind::Boolean,
                _ => SlotKind::Text,
            };
            if let Some(input) =
                self.build_input(&id, catalog::PROCEDURES_CALL, arg_id, kind, value, diagnostics)?
            {
                block.inputs.insert(arg_id.clone(), input);
            }
        }
        block.comment = statement.comment.clone();
        self.graph.insert(id.clone(), block);
        Ok(id)
    }

    fn emit_definition(
        &mut self,
        definition: &CustomDefinition,
        body: &[Statement],
        diagnostics: &mut Diagnostics,
    ) -> Result<(), CompileError> {
        let proccode = definition.proccode();
        let record = self.definitions.get(&proccode).cloned().ok_or_else(|| {
            CompileError::new(
                ErrorKind::Reference,
                format!("definition '{}' was not registered", proccode),
                definition.pos,
            )
        })?;
        let def_id = self.next_id();
        let proto_id = self.next_id();

        let mut prototype = Block::new(catalog::PROCEDURES_PROTOTYPE);
        prototype.shadow = true;
        prototype.parent = Some(def_id.clone());
        for (index, arg_id) in record.arg_ids.iter().enumerate() {
            let kind = record.arg_kinds[index];
            let opcode = match kind {
                ParamKind::Boolean => catalog::ARG_REPORTER_BOOLEAN,
                ParamKind::StringNumber => catalog::ARG_REPORTER_STRING,
            };
            let reporter = self.emit_arg_reporter(opcode, &record.arg_names[index], &proto_id, true);
            prototype
                .inputs
                .insert(arg_id.clone(), Input::MenuShadow(reporter));
        }
        prototype.mutation = Some(Mutation {
            proccode,
            argument_ids: record.arg_ids.clone(),
            argument_names: record.arg_names.clone(),
            argument_defaults: record
                .arg_kinds
                .iter()
                .map(|kind| kind.default_value().to_string())
                .collect(),
            warp: record.warp,
        });
        self.graph.insert(proto_id.clone(), prototype);

        let mut def_block = Block::new(catalog::PROCEDURES_DEFINITION);
        def_block
            .inputs
            .insert("custom_block".to_string(), Input::MenuShadow(proto_id));
        self.graph.insert(def_id.clone(), def_block);
        self.place_top_level(&def_id);

        if let Some((first, _)) = self.emit_chain(body, None, diagnostics)? {
            self.graph.link_next(&def_id, &first);
        }
        Ok(())
    }

    fn resolve_broadcast(&mut self, name: &str, diagnostics: &mut Diagnostics) -> String {
        // broadcasts are always global; sending to an unknown name creates it
        let (id, fresh) =
            self.resolver
                .resolve_or_declare(RefKind::Broadcast, &self.scope, Scope::Global, name);
        if fresh {
            diagnostics.info(
                format!("broadcast '{}' declared on first use", name),
                self.actor_name(),
                None,
            );
        }
        id
    }

    fn resolve_reference(
        &mut self,
        kind: RefKind,
        name: &str,
        statement: &Statement,
        diagnostics: &mut Diagnostics,
    ) -> Result<String, CompileError> {
        let label = match kind {
            RefKind::Variable => "variable",
            RefKind::List => "list",
            RefKind::Broadcast => "broadcast",
            RefKind::Argument => "argument",
        };
        if self.strict {
            return self.resolver.resolve(kind, &self.scope, name).ok_or_else(|| {
                CompileError::new(
                    ErrorKind::Reference,
                    format!("undeclared {} '{}'", label, name),
                    statement.pos,
                )
            });
        }
        let declare_scope = match kind {
            RefKind::Broadcast => Scope::Global,
            _ => self.scope.clone(),
        };
        let (id, fresh) =
            self.resolver
                .resolve_or_declare(kind, &self.scope, declare_scope, name);
        if fresh {
            diagnostics.warning(
                format!("{} '{}' declared implicitly", label, name),
                self.actor_name(),
                Some(statement.pos.line),
            );
        }
        Ok(id)
    }
}

fn empty_input(kind: SlotKind) -> Option<Input> {
    match kind {
        SlotKind::Number => Some(Input::Shadow(Literal::Number(String::new()))),
        SlotKind::Text => Some(Input::Shadow(Literal::Text(String::new()))),
        SlotKind::Color => Some(Input::Shadow(Literal::Color("#000000".to_string()))),
        SlotKind::Boolean | SlotKind::Broadcast | SlotKind::Dropdown => None,
    }
}

fn obscured_default(kind: SlotKind) -> Option<Literal> {
    match kind {
        SlotKind::Number => Some(Literal::Number(String::new())),
        SlotKind::Text => Some(Literal::Text(String::new())),
        SlotKind::Color => Some(Literal::Color("#000000".to_string())),
        SlotKind::Boolean | SlotKind::Broadcast | SlotKind::Dropdown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::{is_define_line, parse_define_line, token_lines, Parser};

    fn build(source: &str) -> (BlockGraph, Diagnostics) {
        build_mode(source, false).unwrap()
    }

    fn build_mode(
        source: &str,
        strict: bool,
    ) -> Result<(BlockGraph, Diagnostics), CompileError> {
        let resolver = IdentifierNamespace::new();
        build_with(source, &resolver, strict)
    }

    fn build_with(
        source: &str,
        resolver: &IdentifierNamespace,
        strict: bool,
    ) -> Result<(BlockGraph, Diagnostics), CompileError> {
        let mut definitions = Vec::new();
        for chunk in source.split("\n\n") {
            let tokens = Lexer::new(chunk).tokenize()?;
            for line in token_lines(&tokens) {
                if is_define_line(line) {
                    definitions.push(parse_define_line(line)?);
                }
            }
        }
        let mut scripts = Vec::new();
        for chunk in source.split("\n\n") {
            let tokens = Lexer::new(chunk).tokenize()?;
            let mut parser = Parser::new(
                tokens,
                resolver,
                Scope::actor("Sprite1"),
                definitions.clone(),
            );
            scripts.push(parser.parse_script()?);
        }
        let mut diagnostics = Diagnostics::new();
        let mut builder = GraphBuilder::new(resolver, Scope::actor("Sprite1"), strict);
        builder.register_definitions(&scripts, &mut diagnostics);
        for script in &scripts {
            builder.add_script(script, &mut diagnostics)?;
        }
        Ok((builder.finish(), diagnostics))
    }

    fn find<'g>(graph: &'g BlockGraph, opcode: &str) -> (&'g String, &'g Block) {
        graph
            .blocks
            .iter()
            .find(|(_, block)| block.opcode == opcode)
            .unwrap_or_else(|| panic!("no {} block emitted", opcode))
    }

    #[test]
    fn chain_is_linked_both_ways() {
        let (graph, _) = build("when green flag clicked\nmove [10] steps\nsay [hi]\n");
        let (flag_id, flag) = find(&graph, "event_whenflagclicked");
        assert!(flag.top_level);
        let move_id = flag.next.as_ref().unwrap();
        let move_block = graph.get(move_id).unwrap();
        assert_eq!(move_block.parent.as_deref(), Some(flag_id.as_str()));
        assert_eq!(
            move_block.inputs["STEPS"],
            Input::Shadow(Literal::Number("10".to_string()))
        );
        let say = graph.get(move_block.next.as_ref().unwrap()).unwrap();
        assert_eq!(
            say.inputs["MESSAGE"],
            Input::Shadow(Literal::Text("hi".to_string()))
        );
    }

    #[test]
    fn reporter_obscures_the_default_shadow() {
        let (graph, _) = build("move (x position) steps\n");
        let (_, host) = find(&graph, "motion_movesteps");
        match &host.inputs["STEPS"] {
            Input::Block { id, obscured } => {
                assert_eq!(graph.get(id).unwrap().opcode, "motion_xposition");
                assert_eq!(obscured, &Some(Literal::Number(String::new())));
            }
            other => panic!("expected obscured input, got {:?}", other),
        }
    }

    #[test]
    fn menu_dropdown_becomes_a_shadow_block() {
        let (graph, _) = build("go to [mouse-pointer v]\n");
        let (host_id, host) = find(&graph, "motion_goto");
        let Input::MenuShadow(menu_id) = &host.inputs["TO"] else {
            panic!("expected menu shadow input");
        };
        let menu = graph.get(menu_id).unwrap();
        assert_eq!(menu.opcode, "motion_goto_menu");
        assert!(menu.shadow);
        assert_eq!(menu.parent.as_deref(), Some(host_id.as_str()));
        assert_eq!(menu.fields["TO"].value, "_mouse_");
    }

    #[test]
    fn variable_field_carries_resolved_id() {
        let resolver = IdentifierNamespace::new();
        let (graph, diagnostics) =
            build_with("set [score v] to [0]\n", &resolver, false).unwrap();
        let (_, set) = find(&graph, "data_setvariableto");
        let field = &set.fields["VARIABLE"];
        assert_eq!(field.value, "score");
        let id = field.ref_id.as_ref().unwrap();
        assert!(id.starts_with("var_"));
        assert!(resolver.contains(
            RefKind::Variable,
            &Scope::actor("Sprite1"),
            "score"
        ));
        assert_eq!(diagnostics.summary(), "0 error(s), 1 warning(s), 0 info");
    }

    #[test]
    fn strict_mode_rejects_unknown_variables() {
        let err = build_mode("set [score v] to [0]\n", true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        let resolver = IdentifierNamespace::new();
        resolver.register(RefKind::Variable, Scope::Global, "score", "var_9");
        let (graph, diagnostics) =
            build_with("set [score v] to [0]\n", &resolver, true).unwrap();
        let (_, set) = find(&graph, "data_setvariableto");
        assert_eq!(set.fields["VARIABLE"].ref_id.as_deref(), Some("var_9"));
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn broadcast_input_is_a_broadcast_literal() {
        let resolver = IdentifierNamespace::new();
        let (graph, _) = build_with("broadcast [go v]\n", &resolver, false).unwrap();
        let (_, cast) = find(&graph, "event_broadcast");
        match &cast.inputs["BROADCAST_INPUT"] {
            Input::Shadow(Literal::Broadcast { name, id }) => {
                assert_eq!(name, "go");
                assert_eq!(
                    resolver.resolve(RefKind::Broadcast, &Scope::Global, "go"),
                    Some(id.clone())
                );
            }
            other => panic!("expected broadcast literal, got {:?}", other),
        }
    }

    #[test]
    fn if_else_fills_both_substacks() {
        let (graph, _) = build("if <mouse down?> then\nshow\nelse\nhide\nend\n");
        let (if_id, if_block) = find(&graph, "control_if_else");
        let Input::Substack(then_id) = &if_block.inputs["SUBSTACK"] else {
            panic!("missing SUBSTACK");
        };
        let Input::Substack(else_id) = &if_block.inputs["SUBSTACK2"] else {
            panic!("missing SUBSTACK2");
        };
        assert_eq!(graph.get(then_id).unwrap().opcode, "looks_show");
        assert_eq!(graph.get(else_id).unwrap().opcode, "looks_hide");
        assert_eq!(graph.get(then_id).unwrap().parent.as_deref(), Some(if_id.as_str()));
        let Input::Boolean(cond_id) = &if_block.inputs["CONDITION"] else {
            panic!("missing CONDITION");
        };
        assert_eq!(graph.get(cond_id).unwrap().opcode, "sensing_mousedown");
    }

    #[test]
    fn boolean_operators_lower_to_operand_inputs() {
        let (graph, _) = build("wait until <not <mouse down?>>\n");
        let (_, not_block) = find(&graph, "operator_not");
        let Input::Boolean(operand) = &not_block.inputs["OPERAND"] else {
            panic!("missing OPERAND");
        };
        assert_eq!(graph.get(operand).unwrap().opcode, "sensing_mousedown");
    }

    #[test]
    fn definition_prototype_and_call_share_argument_ids() {
        let source = "define jump (height)\nchange y by {height}\nend\n\njump [10]\n";
        let (graph, _) = build(source);
        let (def_id, def_block) = find(&graph, "procedures_definition");
        assert!(def_block.top_level);
        let (_, prototype) = find(&graph, "procedures_prototype");
        assert!(prototype.shadow);
        let proto_mutation = prototype.mutation.as_ref().unwrap();
        assert_eq!(proto_mutation.proccode, "jump %s");
        assert_eq!(proto_mutation.argument_names, vec!["height".to_string()]);
        let arg_id = proto_mutation.argument_ids[0].clone();

        let (_, call) = find(&graph, "procedures_call");
        let call_mutation = call.mutation.as_ref().unwrap();
        assert_eq!(call_mutation.argument_ids, vec![arg_id.clone()]);
        assert!(call_mutation.argument_names.is_empty());
        assert_eq!(
            call.inputs[&arg_id],
            Input::Shadow(Literal::Text("10".to_string()))
        );

        // body hangs off the definition block
        let body_id = def_block.next.as_ref().unwrap();
        let body = graph.get(body_id).unwrap();
        assert_eq!(body.opcode, "motion_changeyby");
        assert_eq!(body.parent.as_deref(), Some(def_id.as_str()));
        match &body.inputs["DY"] {
            Input::Block { id, .. } => {
                let reporter = graph.get(id).unwrap();
                assert_eq!(reporter.opcode, "argument_reporter_string_number");
                assert_eq!(reporter.fields["VALUE"].value, "height");
            }
            other => panic!("expected argument reporter, got {:?}", other),
        }
    }

    #[test]
    fn scripts_stack_vertically() {
        let (graph, _) = build("when green flag clicked\nshow\n\nwhen green flag clicked\nhide\n");
        let ids = graph.top_level_ids();
        assert_eq!(ids.len(), 2);
        let first = graph.get(ids[0]).unwrap();
        let second = graph.get(ids[1]).unwrap();
        assert!(first.y.unwrap() < second.y.unwrap());
    }

    #[test]
    fn pen_legacy_opcode_is_normalized() {
        let (graph, _) = build("pen down\n");
        assert!(graph.blocks.values().any(|block| block.opcode == "pen_penDown"));
    }
}
