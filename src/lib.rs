//! Two-way translator between block-text source and the Scratch 3 block
//! graph. [`compile`] turns a text document into a [`BlockGraph`] plus a
//! batch of [`Diagnostics`]; [`decompile`] renders a graph back to text.
//! Both directions are pure functions over their inputs, so the same
//! source always produces the same graph and vice versa.

pub mod ast;
pub mod builder;
pub mod catalog;
pub mod diag;
pub mod error;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod resolver;

pub use diag::{Diagnostic, Diagnostics, Level};
pub use error::{CompileError, ErrorKind, MalformedGraphError, NestingKind};
pub use graph::{Block, BlockGraph, Field, Input, Literal, Mutation};
pub use resolver::{IdentifierNamespace, RefKind, Scope};

use anyhow::Result;

use crate::builder::GraphBuilder;
use crate::lexer::Lexer;
use crate::parser::Parser;

/// Knobs for a compile pass.
///
/// With `strict_references` off (the default), variables, lists and
/// broadcasts that are not in the namespace are declared on first use and
/// reported as warnings. With it on, an unknown name fails the script.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub strict_references: bool,
}

/// Result of compiling one actor's worth of scripts. The graph holds
/// every script that made it through; scripts that failed are absent and
/// show up as error diagnostics instead.
#[derive(Debug)]
pub struct CompileOutput {
    pub graph: BlockGraph,
    pub diagnostics: Diagnostics,
}

/// Compiles a whole document for one actor. Scripts are separated by
/// blank lines and each one fails independently: a parse or build error
/// in script 2 becomes an error diagnostic while scripts 1 and 3 still
/// land in the graph.
///
/// Custom block definitions are collected up front across the whole
/// document, so a call may appear in an earlier script than its
/// `define` line.
pub fn compile(
    source: &str,
    actor: &str,
    resolver: &IdentifierNamespace,
    options: CompileOptions,
) -> CompileOutput {
    let scope = Scope::actor(actor);
    let mut diagnostics = Diagnostics::new();
    let chunks = split_scripts(source);

    let mut definitions = Vec::new();
    for (chunk, first_line) in &chunks {
        // Lex errors surface below when the chunk is parsed for real.
        let Ok(tokens) = Lexer::starting_at(chunk, *first_line).tokenize() else {
            continue;
        };
        for line in parser::token_lines(&tokens) {
            if parser::is_define_line(line) {
                if let Ok(definition) = parser::parse_define_line(line) {
                    definitions.push(definition);
                }
            }
        }
    }

    let mut scripts = Vec::new();
    for (chunk, first_line) in &chunks {
        let parsed = Lexer::starting_at(chunk, *first_line)
            .tokenize()
            .and_then(|tokens| {
                Parser::new(tokens, resolver, scope.clone(), definitions.clone()).parse_script()
            });
        match parsed {
            Ok(script) if script.is_empty() => {}
            Ok(script) => scripts.push(script),
            Err(err) => diagnostics.error(err.to_string(), Some(actor), Some(err.pos.line)),
        }
    }

    let mut builder = GraphBuilder::new(resolver, scope, options.strict_references);
    builder.register_definitions(&scripts, &mut diagnostics);
    for script in &scripts {
        let mark = builder.mark();
        if let Err(err) = builder.add_script(script, &mut diagnostics) {
            builder.rollback(mark);
            diagnostics.error(err.to_string(), Some(actor), Some(err.pos.line));
        }
    }

    CompileOutput {
        graph: builder.finish(),
        diagnostics,
    }
}

/// Compiles a single script with no error recovery: the first problem is
/// returned as the typed error. Handy for tests and for callers that
/// already split their document.
pub fn compile_script(
    source: &str,
    actor: &str,
    resolver: &IdentifierNamespace,
    options: CompileOptions,
) -> Result<(BlockGraph, Diagnostics), CompileError> {
    let scope = Scope::actor(actor);
    let tokens = Lexer::new(source).tokenize()?;

    let mut definitions = Vec::new();
    for line in parser::token_lines(&tokens) {
        if parser::is_define_line(line) {
            definitions.push(parser::parse_define_line(line)?);
        }
    }

    let script = Parser::new(tokens, resolver, scope.clone(), definitions).parse_script()?;
    let mut diagnostics = Diagnostics::new();
    let mut builder = GraphBuilder::new(resolver, scope, options.strict_references);
    builder.register_definitions(std::slice::from_ref(&script), &mut diagnostics);
    builder.add_script(&script, &mut diagnostics)?;
    Ok((builder.finish(), diagnostics))
}

/// Renders a block graph back to block-text source. Fails only when the
/// graph itself is malformed (dangling ids, parent/next cycles, opcodes
/// the catalog does not know).
pub fn decompile(graph: &BlockGraph) -> Result<String, MalformedGraphError> {
    render::render(graph)
}

/// Convenience wrapper over [`compile`] that refuses a document with any
/// error diagnostic and hands back the container-ready JSON block map.
pub fn compile_to_project_json(
    source: &str,
    actor: &str,
    options: CompileOptions,
) -> Result<serde_json::Value> {
    let resolver = IdentifierNamespace::new();
    let output = compile(source, actor, &resolver, options);
    if output.diagnostics.has_errors() {
        let detail = output
            .diagnostics
            .items()
            .iter()
            .filter(|item| item.level == Level::Error)
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::bail!(
            "compilation failed ({}):\n{}",
            output.diagnostics.summary(),
            detail
        );
    }
    Ok(output.graph.to_project_json())
}

/// Convenience wrapper over [`decompile`] that starts from container
/// JSON rather than an in-memory graph.
pub fn decompile_project_json(value: &serde_json::Value) -> Result<String> {
    let graph = BlockGraph::from_project_json(value)
        .map_err(|e| anyhow::anyhow!("malformed block graph: {}", e.message))?;
    decompile(&graph).map_err(|e| anyhow::anyhow!("malformed block graph: {}", e.message))
}

/// Splits a document into scripts on blank lines, remembering where each
/// chunk started so positions stay relative to the whole document.
fn split_scripts(source: &str) -> Vec<(String, usize)> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut start_line = 1;
    for (index, line) in source.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                chunks.push((std::mem::take(&mut current), start_line));
            }
            continue;
        }
        if current.is_empty() {
            start_line = index + 1;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        chunks.push((current, start_line));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_scripts_tracks_document_lines() {
        let source = "when green flag clicked\nmove [10] steps\n\n\nsay [hi]\n";
        let chunks = split_scripts(source);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].1, 1);
        assert_eq!(chunks[1].1, 5);
        assert_eq!(chunks[1].0, "say [hi]\n");
    }

    #[test]
    fn bad_script_is_reported_and_others_survive() {
        let source =
            "when green flag clicked\nmove [10] steps\n\nrepeat (4)\nturn right [15] degrees\n\nsay [hi]\n";
        let resolver = IdentifierNamespace::new();
        let output = compile(source, "Sprite1", &resolver, CompileOptions::default());
        assert!(output.diagnostics.has_errors());
        let error = output
            .diagnostics
            .items()
            .iter()
            .find(|item| item.level == Level::Error)
            .unwrap();
        assert!(error.message.contains("unclosed"), "{}", error.message);
        // The missing 'end' is detected at the last line of the second
        // script, line 5 of the whole document.
        assert_eq!(error.line, Some(5));
        // Both healthy scripts made it through.
        let heads = output.graph.top_level_ids();
        assert_eq!(heads.len(), 2);
    }

    #[test]
    fn failed_script_leaves_no_blocks_behind() {
        let source = "move [10] steps\n\nbroadcast [go v] and wait\nfrobnicate the sprite\n";
        let resolver = IdentifierNamespace::new();
        let output = compile(source, "Sprite1", &resolver, CompileOptions::default());
        assert!(output.diagnostics.has_errors());
        // Only the first script's single block survives.
        assert_eq!(output.graph.len(), 1);
    }

    #[test]
    fn build_failure_rolls_back_partial_chain() {
        // Second script parses but fails during the build step, after its
        // hat block has already been emitted.
        let source = "move [10] steps\n\nwhen green flag clicked\nset [score v] to [0]\n";
        let resolver = IdentifierNamespace::new();
        let options = CompileOptions {
            strict_references: true,
        };
        let output = compile(source, "Sprite1", &resolver, options);
        assert!(output.diagnostics.has_errors());
        assert_eq!(output.graph.len(), 1);
    }

    #[test]
    fn call_may_precede_its_definition() {
        let source =
            "when green flag clicked\njump [50] high\n\ndefine jump (height) high\nchange y by {height}\nend\n";
        let resolver = IdentifierNamespace::new();
        let output = compile(source, "Sprite1", &resolver, CompileOptions::default());
        assert!(
            !output.diagnostics.has_errors(),
            "{}",
            output.diagnostics.summary()
        );
        let call = output
            .graph
            .blocks
            .values()
            .find(|block| block.opcode == "procedures_call")
            .expect("call block");
        let mutation = call.mutation.as_ref().expect("call mutation");
        assert_eq!(mutation.proccode, "jump %s high");
    }

    #[test]
    fn strict_mode_fails_on_unknown_variable() {
        let resolver = IdentifierNamespace::new();
        let options = CompileOptions {
            strict_references: true,
        };
        let err = compile_script("set [score v] to [0]\n", "Sprite1", &resolver, options)
            .expect_err("undeclared variable should fail");
        assert_eq!(err.kind, ErrorKind::Reference);
        assert!(err.message.contains("score"));
    }

    #[test]
    fn compile_then_decompile_is_stable() {
        let source =
            "when green flag clicked\nrepeat [10]\n    move [10] steps\nend\nsay [done]\n";
        let resolver = IdentifierNamespace::new();
        let output = compile(source, "Sprite1", &resolver, CompileOptions::default());
        assert!(!output.diagnostics.has_errors());
        let rendered = decompile(&output.graph).expect("render");
        assert_eq!(rendered, source);
    }

    #[test]
    fn decompiled_text_recompiles_to_the_same_graph() {
        let source = concat!(
            "when green flag clicked\n",
            "go to [mouse-pointer v]\n",
            "if <mouse down?> then\n",
            "    broadcast [go v]\n",
            "else\n",
            "    change [score v] by [1]\n",
            "end\n",
            "\n",
            "define jump (height) high\n",
            "change y by {height}\n",
            "end\n",
            "\n",
            "jump [50] high\n",
        );
        let resolver = IdentifierNamespace::new();
        let first = compile(source, "Sprite1", &resolver, CompileOptions::default());
        assert!(
            !first.diagnostics.has_errors(),
            "{}",
            first.diagnostics.summary()
        );
        let rendered = decompile(&first.graph).expect("render");
        // Same resolver, so the implicitly declared names resolve silently
        // the second time and the graphs come out identical.
        let second = compile(&rendered, "Sprite1", &resolver, CompileOptions::default());
        assert!(
            second.diagnostics.is_empty(),
            "{}",
            second.diagnostics.summary()
        );
        assert_eq!(first.graph.to_project_json(), second.graph.to_project_json());
        assert_eq!(decompile(&second.graph).expect("render"), rendered);
    }

    #[test]
    fn every_nested_block_is_referenced_exactly_once() {
        let source = concat!(
            "when green flag clicked\n",
            "go to [mouse-pointer v]\n",
            "repeat [4]\n",
            "    if <mouse down?> then\n",
            "        say (x position)\n",
            "    end\n",
            "end\n",
        );
        let resolver = IdentifierNamespace::new();
        let output = compile(source, "Sprite1", &resolver, CompileOptions::default());
        assert!(
            !output.diagnostics.has_errors(),
            "{}",
            output.diagnostics.summary()
        );
        let mut reference_counts: std::collections::HashMap<&str, usize> =
            output.graph.blocks.keys().map(|id| (id.as_str(), 0)).collect();
        for block in output.graph.blocks.values() {
            if let Some(next) = &block.next {
                *reference_counts.get_mut(next.as_str()).expect("next points inside the graph") += 1;
            }
            for input in block.inputs.values() {
                if let Some(id) = input.referenced_id() {
                    *reference_counts.get_mut(id).expect("input points inside the graph") += 1;
                }
            }
        }
        for (id, block) in &output.graph.blocks {
            let count = reference_counts[id.as_str()];
            if block.top_level {
                assert_eq!(count, 0, "hat {} ({}) must be unreferenced", id, block.opcode);
            } else {
                assert_eq!(count, 1, "block {} ({}) owned {} times", id, block.opcode, count);
            }
        }
    }

    #[test]
    fn project_json_wrapper_round_trips() {
        let source = "when green flag clicked\nmove [10] steps\n";
        let json = compile_to_project_json(source, "Sprite1", CompileOptions::default())
            .expect("compile to json");
        let rendered = decompile_project_json(&json).expect("decompile from json");
        assert_eq!(rendered, source);
    }
}
