use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rstest::rstest;
use similar_asserts::assert_eq;

use super::*;
use crate::context::ContextArena;
use crate::context::DefineValue;
use crate::eval;
use crate::eval::EvalEnv;
use crate::eval::Value;
use crate::lexer::Recognized;
use crate::lexer::recognize;
use crate::line::LogicalLines;
use crate::line::SourceLine;
use crate::parser::Node;
use crate::parser::assemble;

/// A sink whose message list survives handing the sink to a `Prex`.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<Message>>>);

impl MessageSink for SharedSink {
	fn emit(&mut self, message: Message) {
		self.0.borrow_mut().push(message);
	}
}

impl SharedSink {
	fn messages(&self) -> Vec<Message> {
		self.0.borrow().clone()
	}
}

fn expand(source: &str) -> PrexResult<String> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("top.txt", source)?;
	prex.expand_to_string("top.txt")
}

fn expand_collecting(source: &str) -> (PrexResult<String>, Vec<Message>) {
	let sink = SharedSink::default();
	let result = Prex::new(PrexOptions::default())
		.map(|prex| prex.with_sink(sink.clone()))
		.and_then(|mut prex| {
			prex.register_source("top.txt", source)?;
			prex.expand_to_string("top.txt")
		});
	(result, sink.messages())
}

// ==========================================================================
// End-to-end scenarios
// ==========================================================================

#[test]
fn conditional_selects_the_true_branch() -> PrexResult<()> {
	let output = expand("#define X 3\n#if X > 2\nhi\n#else\nlo\n#endif\n")?;
	assert_eq!(output, "hi\n");
	Ok(())
}

#[test]
fn explicit_substitution_evaluates_expressions() -> PrexResult<()> {
	let output = expand("#define A 1\n#define B 2\n#define S (A + B)\nv=$(S)\n")?;
	assert_eq!(output, "v=3\n");
	Ok(())
}

#[test]
fn ifdef_respects_definition_order() -> PrexResult<()> {
	let output = expand("#ifdef FLAG\nyes\n#endif\n#define FLAG\n#ifdef FLAG\nyes\n#endif\n")?;
	assert_eq!(output, "yes\n");
	Ok(())
}

#[test]
fn nested_loops_unroll_in_order() -> PrexResult<()> {
	let source = "#for x in range(2):\n#for y in [\"a\", \"b\"]:\n$(x)-$(y)\n#endfor\n#endfor\n";
	let output = expand(source)?;
	assert_eq!(output, "0-a\n0-b\n1-a\n1-b\n");
	Ok(())
}

#[test]
fn include_inlines_every_time() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("A", "#include \"B\"\n#include \"B\"\n")?;
	prex.register_source("B", "hello\n")?;
	assert_eq!(prex.expand_to_string("A")?, "hello\nhello\n");
	Ok(())
}

#[test]
fn import_inlines_only_once() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("A", "#import \"B\"\n#import \"B\"\n")?;
	prex.register_source("B", "hello\n")?;
	assert_eq!(prex.expand_to_string("A")?, "hello\n");
	Ok(())
}

#[test]
fn trailing_backslash_joins_lines() -> PrexResult<()> {
	let output = expand("line one \\\nline two\n")?;
	assert_eq!(output, "line one line two\n");
	Ok(())
}

#[test]
fn streaming_output_matches_eager_output() -> PrexResult<()> {
	let source = "#define N 2\n#for i in range(N):\nitem $(i)\n#endfor\ndone\n";

	let mut lazy = Prex::new(PrexOptions::default())?;
	lazy.register_source("top.txt", source)?;
	let lines: Vec<String> = lazy
		.expand("top.txt")?
		.collect::<PrexResult<Vec<String>>>()?;

	let mut eager = Prex::new(PrexOptions::default())?;
	eager.register_source("top.txt", source)?;
	assert_eq!(lines.join("\n") + "\n", eager.expand_to_string("top.txt")?);
	Ok(())
}

// ==========================================================================
// Conditionals and branch bookkeeping
// ==========================================================================

#[rstest]
#[case::first("#define X 1\n", "one\n")]
#[case::second("#define X 2\n", "two\n")]
#[case::fallback("#define X 9\n", "other\n")]
fn exactly_one_branch_expands(#[case] prelude: &str, #[case] expected: &str) -> PrexResult<()> {
	let source =
		format!("{prelude}#if X == 1\none\n#elif X == 2\ntwo\n#else\nother\n#endif\n");
	assert_eq!(expand(&source)?, expected);
	Ok(())
}

#[test]
fn else_with_empty_body_is_allowed() -> PrexResult<()> {
	let output = expand("#if 0\nhidden\n#else\n#endif\nafter\n")?;
	assert_eq!(output, "after\n");
	Ok(())
}

#[test]
fn define_in_selected_branch_joins_outward() -> PrexResult<()> {
	let output = expand("#if 1\n#define SET yes\n#endif\n$(SET)\n")?;
	assert_eq!(output, "yes\n");
	Ok(())
}

#[test]
fn define_in_loop_does_not_escape() -> PrexResult<()> {
	let source = "#for x in range(2):\n#define INNER 1\n#endfor\n#ifdef INNER\nleaked\n#endif\nend\n";
	assert_eq!(expand(source)?, "end\n");
	Ok(())
}

#[test]
fn loop_variable_is_transient() -> PrexResult<()> {
	let source = "#for x in range(2):\n#endfor\n#ifdef x\nleaked\n#endif\nend\n";
	assert_eq!(expand(source)?, "end\n");
	Ok(())
}

#[test]
fn unselected_branches_are_never_evaluated() -> PrexResult<()> {
	// The elif references an undefined name; it must not be evaluated
	// because the first branch is selected.
	let output = expand("#if 1\nok\n#elif MISSING > 0\nbad\n#endif\n")?;
	assert_eq!(output, "ok\n");
	Ok(())
}

#[test]
fn ifndef_takes_the_negated_test() -> PrexResult<()> {
	let output = expand("#ifndef FLAG\nabsent\n#else\npresent\n#endif\n")?;
	assert_eq!(output, "absent\n");
	Ok(())
}

#[test]
fn transition_after_else_is_a_mismatch() {
	let result = expand("#if 1\n#else\n#elif 2\n#endif\n");
	assert!(matches!(result, Err(PrexError::BlockMismatch { .. })));
}

#[test]
fn close_of_the_wrong_family_is_a_mismatch() {
	let result = expand("#if 1\nbody\n#endfor\n");
	assert!(matches!(result, Err(PrexError::BlockMismatch { .. })));
}

#[test]
fn unterminated_block_reports_the_open_tag() {
	let result = expand("#if 1\nbody\n");
	match result {
		Err(PrexError::UnterminatedBlock { tag, line, .. }) => {
			assert_eq!(tag, "if");
			assert_eq!(line, 1);
		}
		other => panic!("expected UnterminatedBlock, got {other:?}"),
	}
}

// ==========================================================================
// Loops
// ==========================================================================

#[test]
fn tuple_unpacking_binds_both_variables() -> PrexResult<()> {
	let source = "#for a, b in [[1, 2], [3, 4]]:\n$(a)+$(b)\n#endfor\n";
	assert_eq!(expand(source)?, "1+2\n3+4\n");
	Ok(())
}

#[test]
fn loop_over_an_empty_range_yields_nothing() -> PrexResult<()> {
	assert_eq!(expand("#for x in range(0):\nbody\n#endfor\nend\n")?, "end\n");
	Ok(())
}

#[test]
fn loop_header_requires_the_trailing_colon() {
	let result = expand("#for x in range(2)\nbody\n#endfor\n");
	assert!(matches!(result, Err(PrexError::ExpressionSyntax { .. })));
}

#[test]
fn loop_needs_an_iterable() {
	let result = expand("#for x in 5:\nbody\n#endfor\n");
	assert!(matches!(result, Err(PrexError::TypeMismatch { .. })));
}

// ==========================================================================
// Defines and substitution
// ==========================================================================

#[test]
fn implicit_substitution_replaces_bare_words() -> PrexResult<()> {
	let output = expand("#define NAME world\nhello NAME\n")?;
	assert_eq!(output, "hello world\n");
	Ok(())
}

#[test]
fn implicit_substitution_can_be_disabled() -> PrexResult<()> {
	let options = PrexOptions {
		implicit_substitution: false,
		..PrexOptions::default()
	};
	let mut prex = Prex::new(options)?;
	prex.register_source("top.txt", "#define NAME world\nhello NAME $(NAME)\n")?;
	assert_eq!(prex.expand_to_string("top.txt")?, "hello NAME world\n");
	Ok(())
}

#[test]
fn marker_define_is_truthy_and_empty_in_text() -> PrexResult<()> {
	let output = expand("#define FLAG\n#if FLAG\non\n#endif\nvalue FLAG!\n")?;
	assert_eq!(output, "on\nvalue !\n");
	Ok(())
}

#[test]
fn unparseable_define_text_passes_through() -> PrexResult<()> {
	let output = expand("#define GREETING hello world\n>$(GREETING)<\n")?;
	assert_eq!(output, ">hello world<\n");
	Ok(())
}

#[test]
fn explicit_substitution_of_undefined_name_fails() {
	let result = expand("value $(MISSING)\n");
	match result {
		Err(PrexError::UndefinedIdentifier { name, .. }) => assert_eq!(name, "MISSING"),
		other => panic!("expected UndefinedIdentifier, got {other:?}"),
	}
}

#[test]
fn malformed_explicit_form_is_left_alone() -> PrexResult<()> {
	assert_eq!(expand("cost $(5)\n")?, "cost $(5)\n");
	Ok(())
}

#[test]
fn substitution_is_idempotent_once_settled() -> PrexResult<()> {
	let output = expand("#define A B_TEXT\nA A\n")?;
	assert_eq!(output, "B_TEXT B_TEXT\n");
	Ok(())
}

#[test]
fn mutually_recursive_defines_are_detected() {
	let result = expand("#define A B\n#define B A\nvalue A\n");
	assert!(matches!(result, Err(PrexError::SubstitutionLoop { .. })));
}

#[test]
fn undef_removes_the_nearest_binding() -> PrexResult<()> {
	let output = expand("#define X 1\n#undef X\n#ifdef X\nstill\n#endif\nend\n")?;
	assert_eq!(output, "end\n");
	Ok(())
}

#[test]
fn undef_of_an_unknown_name_fails() {
	let result = expand("#undef NEVER\n");
	assert!(matches!(result, Err(PrexError::UndefinedIdentifier { .. })));
}

#[test]
fn redefinition_warns_and_overwrites() {
	let (result, messages) = expand_collecting("#define X 1\n#define X 2\nv=$(X)\n");
	assert_eq!(result.unwrap(), "v=2\n");
	assert_eq!(messages.len(), 1);
	assert_eq!(messages[0].level, MessageLevel::Warning);
	assert!(messages[0].text.contains('X'));
}

#[test]
fn predefines_seed_the_root_context() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.predefine("MODE", Some("3".to_string()));
	prex.predefine("DEBUG", None);
	prex.register_source("top.txt", "#if DEBUG and MODE == 3\nactive\n#endif\n")?;
	assert_eq!(prex.expand_to_string("top.txt")?, "active\n");
	Ok(())
}

// ==========================================================================
// Messages
// ==========================================================================

#[test]
fn info_and_warn_reach_the_sink() {
	let (result, messages) =
		expand_collecting("#define X 7\n#info starting $(X)\n#warn X is X\nbody\n");
	assert_eq!(result.unwrap(), "body\n");
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0].level, MessageLevel::Info);
	assert_eq!(messages[0].text, "starting 7");
	let warning = &messages[1];
	assert_eq!(warning.level, MessageLevel::Warning);
	assert_eq!(warning.text, "7 is 7");
	assert_eq!(warning.line, Some(3));
}

#[test]
fn message_aliases_map_to_levels() {
	let (result, messages) = expand_collecting("#todo tidy this up\n#fixme broken here\n");
	result.unwrap();
	assert_eq!(messages.len(), 2);
	assert!(messages
		.iter()
		.all(|message| message.level == MessageLevel::Warning));
}

#[test]
fn error_directive_aborts_with_the_substituted_message() {
	let (result, _) = expand_collecting("#define X 3\nbefore\n#error bad value $(X)\nafter\n");
	match result {
		Err(PrexError::UserError { message, line, .. }) => {
			assert_eq!(message, "bad value 3");
			assert_eq!(line, 3);
		}
		other => panic!("expected UserError, got {other:?}"),
	}
}

#[test]
fn expansion_stops_at_the_error_directive() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("top.txt", "one\n#fatal stop\ntwo\n")?;
	let mut lines = prex.expand("top.txt")?;
	assert_eq!(lines.next().unwrap()?, "one");
	assert!(lines.next().is_some_and(|result| result.is_err()));
	assert!(lines.next().is_none());
	Ok(())
}

#[test]
fn dangling_continuation_warns_and_keeps_the_backslash() {
	let (result, messages) = expand_collecting("tail goes on \\");
	assert_eq!(result.unwrap(), "tail goes on \\\n");
	assert_eq!(messages.len(), 1);
	assert_eq!(messages[0].level, MessageLevel::Warning);
	assert_eq!(messages[0].line, Some(1));
}

// ==========================================================================
// Recognizer
// ==========================================================================

fn test_line(text: &str) -> SourceLine {
	SourceLine::new(text, Arc::from("test.txt"), 1)
}

#[rstest]
#[case::plain("plain text")]
#[case::unknown_tag("#pragma once")]
#[case::bare_prefix("# not a directive")]
#[case::shebang("#!/bin/sh")]
fn unrecognized_lines_stay_content(#[case] text: &str) -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = recognize(&test_line(text), &directives, '#')?;
	assert_eq!(items, vec![Recognized::Content(test_line(text))]);
	Ok(())
}

#[test]
fn anchored_directive_discards_leading_whitespace() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = recognize(&test_line("   #define X 3"), &directives, '#')?;
	assert_eq!(
		items,
		vec![Recognized::Directive {
			tag: "define".to_string(),
			args: test_line("X 3"),
			anchored: true,
		}]
	);
	Ok(())
}

#[test]
fn floating_directive_splits_the_line() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = recognize(&test_line("before #info message text"), &directives, '#')?;
	assert_eq!(
		items,
		vec![
			Recognized::Content(test_line("before")),
			Recognized::Directive {
				tag: "info".to_string(),
				args: test_line("message text"),
				anchored: false,
			},
		]
	);
	Ok(())
}

#[test]
fn floating_block_tag_is_rejected() {
	let directives = DirectiveRegistry::with_builtins();
	let result = recognize(&test_line("text #if X"), &directives, '#');
	assert!(matches!(result, Err(PrexError::BlockMismatch { .. })));
}

#[test]
fn anchor_wins_over_floating_on_the_same_line() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = recognize(&test_line("#info one #info two"), &directives, '#')?;
	assert_eq!(
		items,
		vec![Recognized::Directive {
			tag: "info".to_string(),
			args: test_line("one #info two"),
			anchored: true,
		}]
	);
	Ok(())
}

#[test]
fn alternate_delimiters_are_honoured() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = recognize(&test_line("!define X 3"), &directives, '!')?;
	assert!(matches!(items.as_slice(), [Recognized::Directive { tag, .. }] if tag == "define"));
	// The default prefix is plain content under a different delimiter.
	let items = recognize(&test_line("#define X 3"), &directives, '!')?;
	assert!(matches!(items.as_slice(), [Recognized::Content(_)]));
	Ok(())
}

// ==========================================================================
// Assembler
// ==========================================================================

fn items_of(source: &str) -> PrexResult<Vec<Recognized>> {
	let directives = DirectiveRegistry::with_builtins();
	let mut items = Vec::new();
	for (index, text) in source.lines().enumerate() {
		let line = SourceLine::new(text, Arc::from("test.txt"), index + 1);
		items.extend(recognize(&line, &directives, '#')?);
	}
	Ok(items)
}

#[test]
fn assembles_branches_in_order() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = items_of("#if A\none\n#elif B\ntwo\n#else\nthree\n#endif\n")?;
	let nodes = assemble(items, &directives)?;

	assert_eq!(nodes.len(), 1);
	let Node::Conditional { branches } = &nodes[0] else {
		panic!("expected a conditional, got {nodes:?}");
	};
	assert_eq!(branches.len(), 3);
	assert_eq!(branches[0].kind, BranchKind::If);
	assert_eq!(branches[1].kind, BranchKind::Elif);
	assert_eq!(branches[2].kind, BranchKind::Else);
	assert_eq!(branches[0].arg.text, "A");
	Ok(())
}

#[test]
fn text_leaves_never_hold_directive_lines() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = items_of("alpha\n#define X 1\nbeta\ngamma\n")?;
	let nodes = assemble(items, &directives)?;

	assert_eq!(nodes.len(), 3);
	assert!(matches!(&nodes[0], Node::Text(lines) if lines.len() == 1));
	assert!(matches!(&nodes[1], Node::Single { tag, .. } if tag == "define"));
	assert!(matches!(&nodes[2], Node::Text(lines) if lines.len() == 2));
	Ok(())
}

#[test]
fn nested_blocks_attach_to_their_parent() -> PrexResult<()> {
	let directives = DirectiveRegistry::with_builtins();
	let items = items_of("#for x in range(2):\n#if x == 1\nodd\n#endif\n#endfor\n")?;
	let nodes = assemble(items, &directives)?;

	assert_eq!(nodes.len(), 1);
	let Node::Loop { body, .. } = &nodes[0] else {
		panic!("expected a loop, got {nodes:?}");
	};
	assert!(matches!(body.as_slice(), [Node::Conditional { .. }]));
	Ok(())
}

// ==========================================================================
// Line reader
// ==========================================================================

#[test]
fn continuation_preserves_the_first_line_number() -> PrexResult<()> {
	let raw = ["a \\", "b \\", "c", "d"];
	let mut logical = LogicalLines::new(
		raw.into_iter().map(|line| Ok(line.to_string())),
		Arc::from("test.txt"),
	);

	let first = logical.next().unwrap()?;
	assert_eq!(first.text, "a b c");
	assert_eq!(first.number, 1);

	let second = logical.next().unwrap()?;
	assert_eq!(second.text, "d");
	assert_eq!(second.number, 4);

	assert!(logical.next().is_none());
	assert_eq!(logical.dangling_continuation(), None);
	Ok(())
}

// ==========================================================================
// Expression evaluator
// ==========================================================================

fn eval_str(text: &str) -> PrexResult<Value> {
	let mut arena = ContextArena::new();
	let ctx = arena.root();
	arena.define(ctx, "X", DefineValue::Text("3".to_string()));
	arena.define(ctx, "WORD", DefineValue::Text("tea spoon".to_string()));
	let env = EvalEnv {
		arena: &arena,
		ctx,
		file: Arc::from("test.txt"),
		line: 1,
		limit: 32,
	};
	eval::evaluate(text, &env)
}

#[rstest]
#[case::precedence("1 + 2 * 3", Value::Int(7))]
#[case::parens("(1 + 2) * 3", Value::Int(9))]
#[case::unary_minus("-2 * 3", Value::Int(-6))]
#[case::division_truncates("7 / 2", Value::Int(3))]
#[case::modulo("7 % 3", Value::Int(1))]
#[case::comparison("2 <= 2", Value::Bool(true))]
#[case::string_equality("'a' == \"a\"", Value::Bool(true))]
#[case::string_concat("\"ab\" + \"cd\"", Value::Str("abcd".to_string()))]
#[case::logic_words("1 < 2 and not 0", Value::Bool(true))]
#[case::logic_symbols("0 || 1 && 1", Value::Bool(true))]
#[case::membership("2 in [1, 2, 3]", Value::Bool(true))]
#[case::substring("\"ell\" in \"hello\"", Value::Bool(true))]
#[case::range_two("range(1, 4)", Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))]
#[case::range_step("range(6, 0, -2)", Value::List(vec![Value::Int(6), Value::Int(4), Value::Int(2)]))]
#[case::defined_hit("defined(X)", Value::Bool(true))]
#[case::defined_miss("defined(Y)", Value::Bool(false))]
#[case::ident_resolves("X * X", Value::Int(9))]
#[case::prose_define_is_a_string("WORD == \"tea spoon\"", Value::Bool(true))]
#[case::booleans("true and not false", Value::Bool(true))]
fn expression_evaluation(#[case] text: &str, #[case] expected: Value) -> PrexResult<()> {
	assert_eq!(eval_str(text)?, expected);
	Ok(())
}

#[rstest]
#[case::division_by_zero("1 / 0")]
#[case::modulo_by_zero("1 % 0")]
#[case::mixed_addition("1 + \"a\"")]
#[case::chained_comparison("1 < 2 < 3")]
#[case::zero_step_range("range(0, 4, 0)")]
#[case::non_iterable_membership("1 in 2")]
fn expression_type_errors(#[case] text: &str) {
	assert!(matches!(
		eval_str(text),
		Err(PrexError::TypeMismatch { .. })
	));
}

#[rstest]
#[case::dangling_operator("1 +")]
#[case::unbalanced_paren("(1 + 2")]
#[case::unknown_function("shout(1)")]
#[case::empty("")]
fn expression_syntax_errors(#[case] text: &str) {
	assert!(matches!(
		eval_str(text),
		Err(PrexError::ExpressionSyntax { .. })
	));
}

#[test]
fn undefined_identifier_errors_outside_defined() {
	assert!(matches!(
		eval_str("MISSING + 1"),
		Err(PrexError::UndefinedIdentifier { .. })
	));
}

#[test]
fn implicit_substitution_skips_expression_string_literals() -> PrexResult<()> {
	// `X` is defined as 3; inside a string literal it must stay a word.
	assert_eq!(eval_str("\"X marks\" == \"X marks\"")?, Value::Bool(true));
	Ok(())
}

// ==========================================================================
// Registries
// ==========================================================================

#[test]
fn duplicate_source_registration_fails() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("top.txt", "one\n")?;
	let result = prex.register_source("top.txt", "two\n");
	assert!(matches!(
		result,
		Err(PrexError::DuplicateRegistration { .. })
	));
	Ok(())
}

#[test]
fn missing_file_resolution_fails() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	let result = prex.expand_to_string("nowhere.txt");
	assert!(matches!(result, Err(PrexError::FileNotFound { .. })));
	Ok(())
}

#[test]
fn directive_registration_after_expansion_is_locked() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("top.txt", "body\n")?;
	prex.expand_to_string("top.txt")?;
	let result =
		prex.register_directive(DirectiveDescriptor::single("note", DirectiveHandler::Info));
	assert!(matches!(result, Err(PrexError::RegistryLocked { .. })));
	Ok(())
}

#[test]
fn custom_alias_directive_can_be_registered() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_directive(DirectiveDescriptor::single("use", DirectiveHandler::Include))?;
	prex.register_source("top.txt", "#use \"lib\"\n")?;
	prex.register_source("lib", "from lib\n")?;
	assert_eq!(prex.expand_to_string("top.txt")?, "from lib\n");
	Ok(())
}

#[test]
fn includes_resolve_through_search_roots() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::create_dir(tmp.path().join("inc"))?;
	std::fs::write(tmp.path().join("inc/part.txt"), "included line\n")?;
	std::fs::write(tmp.path().join("top.txt"), "#include \"part.txt\"\n")?;

	let mut prex = Prex::new(PrexOptions::default())?;
	prex.add_search_root(tmp.path().join("inc"));
	prex.register_file(tmp.path().join("top.txt"))?;
	assert_eq!(prex.expand_to_string("top.txt")?, "included line\n");
	Ok(())
}

#[test]
fn includes_resolve_relative_to_the_including_file() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("sibling.txt"), "from sibling\n")?;
	std::fs::write(tmp.path().join("top.txt"), "#include \"sibling.txt\"\n")?;

	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_file(tmp.path().join("top.txt"))?;
	assert_eq!(prex.expand_to_string("top.txt")?, "from sibling\n");
	Ok(())
}

#[test]
fn import_dedupes_across_nested_includes() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("top", "#import \"shared\"\n#include \"inner\"\n")?;
	prex.register_source("inner", "#import \"shared\"\ninner body\n")?;
	prex.register_source("shared", "shared body\n")?;
	assert_eq!(prex.expand_to_string("top")?, "shared body\ninner body\n");
	Ok(())
}

#[test]
fn recursive_includes_are_detected() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("a", "#include \"b\"\n")?;
	prex.register_source("b", "#include \"a\"\n")?;
	let result = prex.expand_to_string("a");
	assert!(matches!(result, Err(PrexError::RecursiveInclude { .. })));
	Ok(())
}

#[test]
fn includes_see_and_mutate_enclosing_defines() -> PrexResult<()> {
	let mut prex = Prex::new(PrexOptions::default())?;
	prex.register_source("top", "#define OUTER 1\n#include \"mod\"\n$(FROM_MOD)\n")?;
	prex.register_source("mod", "#if OUTER\n#define FROM_MOD seen\n#endif\n")?;
	assert_eq!(prex.expand_to_string("top")?, "seen\n");
	Ok(())
}

// ==========================================================================
// Options
// ==========================================================================

#[test]
fn whitespace_delimiter_is_rejected() {
	let options = PrexOptions {
		delimiter: ' ',
		..PrexOptions::default()
	};
	assert!(matches!(
		Prex::new(options),
		Err(PrexError::InvalidDelimiter(' '))
	));
}

#[test]
fn alternate_delimiter_runs_end_to_end() -> PrexResult<()> {
	let options = PrexOptions {
		delimiter: '%',
		..PrexOptions::default()
	};
	let mut prex = Prex::new(options)?;
	prex.register_source("top.txt", "%define X 1\n%if X\n# kept verbatim\n%endif\n")?;
	assert_eq!(prex.expand_to_string("top.txt")?, "# kept verbatim\n");
	Ok(())
}
