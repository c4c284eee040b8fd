use std::rc::Rc;
use std::sync::Arc;

use snailquote::unescape;

use crate::PrexError;
use crate::PrexResult;
use crate::config::PrexOptions;
use crate::context::ContextArena;
use crate::context::ContextId;
use crate::context::DefineValue;
use crate::directive::DirectiveHandler;
use crate::directive::DirectiveRegistry;
use crate::eval;
use crate::eval::EvalEnv;
use crate::eval::Value;
use crate::lexer::leading_identifier;
use crate::lexer::recognize;
use crate::line::LogicalLines;
use crate::line::SourceLine;
use crate::message::Message;
use crate::message::MessageLevel;
use crate::message::MessageSink;
use crate::parser::BranchKind;
use crate::parser::Node;
use crate::parser::assemble;
use crate::registry::FileRegistry;
use crate::subst::substitute_text;

/// The streaming expansion driver.
///
/// An `Expander` walks assembled block trees depth-first under a context
/// and yields output lines one at a time. It is an `Iterator` over
/// `PrexResult<String>`: every suspension point is a line yield, nested
/// include/import streams delegate their yields upward, and dropping the
/// iterator releases every nested file in reverse-acquisition order. After
/// yielding an error the iterator is exhausted.
pub struct Expander<'a> {
	options: PrexOptions,
	files: &'a mut FileRegistry,
	directives: &'a DirectiveRegistry,
	sink: &'a mut dyn MessageSink,
	arena: ContextArena,
	frames: Vec<Frame>,
	include_stack: Vec<String>,
	finished: bool,
}

/// One level of the walk.
enum Frame {
	/// Children of a block being visited in order.
	Nodes {
		nodes: Rc<Vec<Node>>,
		index: usize,
		ctx: ContextId,
		exit: ExitAction,
	},
	/// Text lines being yielded.
	Lines {
		lines: std::vec::IntoIter<SourceLine>,
		ctx: ContextId,
	},
	/// A loop replaying its body, one fork per remaining value.
	Loop {
		body: Rc<Vec<Node>>,
		variables: Vec<String>,
		values: std::vec::IntoIter<Value>,
		parent: ContextId,
		header: SourceLine,
	},
}

/// What happens when a `Nodes` frame is exhausted.
#[derive(Debug, Clone, Copy)]
enum ExitAction {
	None,
	/// Merge the frame's context into its parent (selected conditional
	/// branches).
	Join { parent: ContextId },
	/// Leave an included file: pop the recursion guard.
	PopInclude,
}

impl<'a> Expander<'a> {
	pub fn new(
		options: PrexOptions,
		files: &'a mut FileRegistry,
		directives: &'a DirectiveRegistry,
		sink: &'a mut dyn MessageSink,
		predefines: &[(String, Option<String>)],
		root_key: &str,
	) -> PrexResult<Self> {
		let mut expander = Self {
			options,
			files,
			directives,
			sink,
			arena: ContextArena::new(),
			frames: Vec::new(),
			include_stack: Vec::new(),
			finished: false,
		};

		let root_ctx = expander.arena.root();
		for (name, value) in predefines {
			let value = match value {
				Some(text) => DefineValue::Text(text.clone()),
				None => DefineValue::Marker,
			};
			expander.arena.define(root_ctx, name, value);
		}

		expander.enter_file(root_key, root_ctx)?;
		Ok(expander)
	}

	/// Read, recognize, and assemble a file, then push its tree. The file
	/// handle is opened here and closed once fully read.
	fn enter_file(&mut self, key: &str, ctx: ContextId) -> PrexResult<()> {
		if self.include_stack.iter().any(|open| open == key) {
			return Err(PrexError::RecursiveInclude {
				name: key.to_string(),
			});
		}

		let entry = self.files.entry(key).ok_or_else(|| {
			PrexError::FileNotFound {
				name: key.to_string(),
			}
		})?;
		let file_name = Arc::clone(&entry.name);

		let mut logical = LogicalLines::new(self.files.open(key)?, Arc::clone(&file_name));
		let mut items = Vec::new();
		for line in logical.by_ref() {
			let line = line?;
			items.extend(recognize(&line, self.directives, self.options.delimiter)?);
		}
		if let Some(number) = logical.dangling_continuation() {
			self.sink.emit(
				Message::new(
					MessageLevel::Warning,
					"line continuation at end of file, backslash kept",
				)
				.at(Arc::clone(&file_name), number),
			);
		}

		let nodes = assemble(items, self.directives)?;
		self.include_stack.push(key.to_string());
		self.frames.push(Frame::Nodes {
			nodes: Rc::new(nodes),
			index: 0,
			ctx,
			exit: ExitAction::PopInclude,
		});
		Ok(())
	}

	fn eval_env(&self, origin: &SourceLine, ctx: ContextId) -> EvalEnv<'_> {
		EvalEnv {
			arena: &self.arena,
			ctx,
			file: Arc::clone(&origin.file),
			line: origin.number,
			limit: self.options.max_substitution_depth,
		}
	}

	fn substitute(&self, line: &SourceLine, ctx: ContextId) -> PrexResult<String> {
		substitute_text(
			&line.text,
			&self.eval_env(line, ctx),
			self.options.implicit_substitution,
		)
	}

	/// Visit one node. Output never leaves here directly; text is staged
	/// as a `Lines` frame and yielded by the driver loop.
	fn process_node(&mut self, node: Node, ctx: ContextId) -> PrexResult<()> {
		if !self.arena.enabled(ctx) {
			return Ok(());
		}
		match node {
			Node::Text(lines) => {
				self.frames.push(Frame::Lines {
					lines: lines.into_iter(),
					ctx,
				});
				Ok(())
			}
			Node::Single { handler, tag, args } => self.handle_single(handler, &tag, &args, ctx),
			Node::Conditional { branches } => self.select_branch(&branches, ctx),
			Node::Loop { header, body } => self.start_loop(&header, body, ctx),
		}
	}

	fn handle_single(
		&mut self,
		handler: DirectiveHandler,
		tag: &str,
		args: &SourceLine,
		ctx: ContextId,
	) -> PrexResult<()> {
		match handler {
			DirectiveHandler::Define => self.handle_define(args, ctx),
			DirectiveHandler::Undef => self.handle_undef(args, ctx),
			DirectiveHandler::Include => self.handle_include(args, ctx, false),
			DirectiveHandler::Import => self.handle_include(args, ctx, true),
			DirectiveHandler::Info => self.handle_message(MessageLevel::Info, args, ctx),
			DirectiveHandler::Warn => self.handle_message(MessageLevel::Warning, args, ctx),
			DirectiveHandler::Error => {
				// Substitute so the message can reference defines; fall back
				// to the raw text when substitution itself fails.
				let message = self
					.substitute(args, ctx)
					.unwrap_or_else(|_| args.text.clone());
				Err(PrexError::UserError {
					message,
					file: Arc::clone(&args.file),
					line: args.number,
				})
			}
			_ => Err(PrexError::UnknownDirective {
				tag: tag.to_string(),
			}),
		}
	}

	fn handle_define(&mut self, args: &SourceLine, ctx: ContextId) -> PrexResult<()> {
		let text = args.text.trim();
		let name = leading_identifier(text);
		if name.is_empty() {
			return Err(PrexError::ExpressionSyntax {
				detail: format!("define needs a name, got `{text}`"),
				file: Arc::clone(&args.file),
				line: args.number,
			});
		}
		let rest = text[name.len()..].trim();
		let value = if rest.is_empty() {
			DefineValue::Marker
		} else {
			DefineValue::Text(rest.to_string())
		};
		if self.arena.define(ctx, name, value) {
			self.sink.emit(
				Message::new(
					MessageLevel::Warning,
					format!("value already defined for `{name}`"),
				)
				.at(Arc::clone(&args.file), args.number),
			);
		}
		Ok(())
	}

	fn handle_undef(&mut self, args: &SourceLine, ctx: ContextId) -> PrexResult<()> {
		let name = args.text.trim();
		if name.is_empty() || leading_identifier(name) != name {
			return Err(PrexError::ExpressionSyntax {
				detail: format!("undef needs a single name, got `{name}`"),
				file: Arc::clone(&args.file),
				line: args.number,
			});
		}
		if !self.arena.undef(ctx, name) {
			return Err(PrexError::UndefinedIdentifier {
				name: name.to_string(),
				file: Arc::clone(&args.file),
				line: args.number,
			});
		}
		Ok(())
	}

	fn handle_include(
		&mut self,
		args: &SourceLine,
		ctx: ContextId,
		once: bool,
	) -> PrexResult<()> {
		let substituted = self.substitute(args, ctx)?;
		let path = unquote_path(&substituted, args)?;

		let origin_dir = self
			.files
			.entry(args.file.as_ref())
			.and_then(|entry| entry.origin_dir());
		let key = self.files.resolve(&path, origin_dir.as_deref())?;

		if once {
			if self.files.was_imported(&key) {
				return Ok(());
			}
			self.files.mark_imported(&key);
		}

		// The included stream runs under the current context: it sees and
		// mutates the enclosing defines.
		self.enter_file(&key, ctx)
	}

	fn handle_message(
		&mut self,
		level: MessageLevel,
		args: &SourceLine,
		ctx: ContextId,
	) -> PrexResult<()> {
		let text = self.substitute(args, ctx)?;
		self.sink
			.emit(Message::new(level, text).at(Arc::clone(&args.file), args.number));
		Ok(())
	}

	/// Evaluate branch predicates in order and expand the first truthy one
	/// in a fork. Unselected branches are never evaluated.
	fn select_branch(
		&mut self,
		branches: &[crate::parser::Branch],
		ctx: ContextId,
	) -> PrexResult<()> {
		for branch in branches {
			let taken = match branch.kind {
				BranchKind::If | BranchKind::Elif => {
					let env = self.eval_env(&branch.arg, ctx);
					eval::evaluate(&branch.arg.text, &env)?.truthy()
				}
				BranchKind::Ifdef | BranchKind::Ifndef => {
					let name = branch.arg.text.trim();
					if name.is_empty() || leading_identifier(name) != name {
						return Err(PrexError::ExpressionSyntax {
							detail: format!("expected a single name, got `{name}`"),
							file: Arc::clone(&branch.arg.file),
							line: branch.arg.number,
						});
					}
					let defined = self.arena.is_defined(ctx, name);
					if branch.kind == BranchKind::Ifdef {
						defined
					} else {
						!defined
					}
				}
				BranchKind::Else => true,
			};

			if taken {
				let child = self.arena.fork(ctx, true);
				self.frames.push(Frame::Nodes {
					nodes: Rc::clone(&branch.body),
					index: 0,
					ctx: child,
					exit: ExitAction::Join { parent: ctx },
				});
				return Ok(());
			}
		}
		Ok(())
	}

	fn start_loop(
		&mut self,
		header: &SourceLine,
		body: Rc<Vec<Node>>,
		ctx: ContextId,
	) -> PrexResult<()> {
		let syntax = |detail: String| {
			PrexError::ExpressionSyntax {
				detail,
				file: Arc::clone(&header.file),
				line: header.number,
			}
		};

		let text = header.text.trim();
		let Some(text) = text.strip_suffix(':') else {
			return Err(syntax(format!("loop header must end with `:`, got `{text}`")));
		};
		let (variables, expr) = eval::split_loop_header(text).map_err(syntax)?;
		if variables.len() > 2 {
			return Err(syntax(format!(
				"at most two loop variables are supported, got {}",
				variables.len()
			)));
		}

		let env = self.eval_env(header, ctx);
		let values = match eval::evaluate(&expr, &env)? {
			Value::List(values) => values,
			other => {
				return Err(PrexError::TypeMismatch {
					detail: format!("`for` needs a list to iterate, got `{other}`"),
					file: Arc::clone(&header.file),
					line: header.number,
				});
			}
		};

		self.frames.push(Frame::Loop {
			body,
			variables,
			values: values.into_iter(),
			parent: ctx,
			header: header.clone(),
		});
		Ok(())
	}

	/// Begin one loop iteration: fork, bind the loop variables, stage the
	/// body. The fork is discarded when the iteration's frame exits, so
	/// defines made inside never escape.
	fn start_iteration(
		&mut self,
		body: Rc<Vec<Node>>,
		variables: &[String],
		value: Value,
		parent: ContextId,
		header: &SourceLine,
	) -> PrexResult<()> {
		let child = self.arena.fork(parent, true);
		match variables {
			[single] => {
				self.arena
					.define_local(child, single, DefineValue::Resolved(value));
			}
			[first, second] => {
				let Value::List(mut pair) = value else {
					return Err(PrexError::TypeMismatch {
						detail: "tuple unpacking needs two-element list values".to_string(),
						file: Arc::clone(&header.file),
						line: header.number,
					});
				};
				if pair.len() != 2 {
					return Err(PrexError::TypeMismatch {
						detail: format!(
							"tuple unpacking needs two-element list values, got {}",
							pair.len()
						),
						file: Arc::clone(&header.file),
						line: header.number,
					});
				}
				let second_value = pair.pop().expect("length checked");
				let first_value = pair.pop().expect("length checked");
				self.arena
					.define_local(child, first, DefineValue::Resolved(first_value));
				self.arena
					.define_local(child, second, DefineValue::Resolved(second_value));
			}
			_ => unreachable!("start_loop bounds the variable count"),
		}

		self.frames.push(Frame::Nodes {
			nodes: body,
			index: 0,
			ctx: child,
			exit: ExitAction::None,
		});
		Ok(())
	}

	fn fail(&mut self, error: PrexError) -> Option<PrexResult<String>> {
		self.finished = true;
		Some(Err(error))
	}
}

impl Iterator for Expander<'_> {
	type Item = PrexResult<String>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.finished {
			return None;
		}

		loop {
			let Some(top) = self.frames.last_mut() else {
				self.finished = true;
				return None;
			};

			match top {
				Frame::Lines { lines, ctx } => {
					let ctx = *ctx;
					match lines.next() {
						Some(line) => {
							if !self.arena.enabled(ctx) {
								continue;
							}
							return match self.substitute(&line, ctx) {
								Ok(text) => Some(Ok(text)),
								Err(error) => self.fail(error),
							};
						}
						None => {
							self.frames.pop();
						}
					}
				}
				Frame::Nodes {
					nodes, index, ctx, ..
				} => {
					if *index >= nodes.len() {
						let ctx = *ctx;
						let Some(Frame::Nodes { exit, .. }) = self.frames.pop() else {
							unreachable!("the top frame was just matched");
						};
						match exit {
							ExitAction::None => {}
							ExitAction::Join { parent } => self.arena.join(ctx, parent),
							ExitAction::PopInclude => {
								self.include_stack.pop();
							}
						}
						continue;
					}
					let node = nodes[*index].clone();
					let ctx = *ctx;
					*index += 1;
					if let Err(error) = self.process_node(node, ctx) {
						return self.fail(error);
					}
				}
				Frame::Loop {
					values,
					variables,
					body,
					parent,
					header,
				} => {
					match values.next() {
						Some(value) => {
							let body = Rc::clone(body);
							let variables = variables.clone();
							let parent = *parent;
							let header = header.clone();
							if let Err(error) =
								self.start_iteration(body, &variables, value, parent, &header)
							{
								return self.fail(error);
							}
						}
						None => {
							self.frames.pop();
						}
					}
				}
			}
		}
	}
}

/// Strip optional surrounding quotes from an include path.
fn unquote_path(path: &str, origin: &SourceLine) -> PrexResult<String> {
	let trimmed = path.trim();
	if trimmed.starts_with('"') || trimmed.starts_with('\'') {
		unescape(trimmed).map_err(|_| {
			PrexError::ExpressionSyntax {
				detail: format!("invalid include path {trimmed}"),
				file: Arc::clone(&origin.file),
				line: origin.number,
			}
		})
	} else {
		Ok(trimmed.to_string())
	}
}
