use std::mem;
use std::rc::Rc;
use std::sync::Arc;

use crate::PrexError;
use crate::PrexResult;
use crate::directive::DirectiveHandler;
use crate::directive::DirectiveRegistry;
use crate::directive::DirectiveRole;
use crate::lexer::Recognized;
use crate::line::SourceLine;

/// A node of the assembled block tree.
///
/// Shared bodies are reference-counted so the expander can replay a loop
/// body per iteration without cloning the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	/// Contiguous plain content.
	Text(Vec<SourceLine>),
	/// A standalone directive (`define`, `include`, `info`, ...).
	Single {
		handler: DirectiveHandler,
		tag: String,
		args: SourceLine,
	},
	/// An `if`/`elif`/`else` chain; exactly one branch expands.
	Conditional { branches: Vec<Branch> },
	/// A `for ... in ...:` block, replayed once per value.
	Loop {
		header: SourceLine,
		body: Rc<Vec<Node>>,
	},
}

/// One section of a conditional.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
	pub kind: BranchKind,
	pub arg: SourceLine,
	pub body: Rc<Vec<Node>>,
}

/// How a branch decides whether it is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
	If,
	Elif,
	Else,
	Ifdef,
	Ifndef,
}

/// Assemble recognized items into a block tree.
///
/// Maintains a stack of open frames. Content accumulates into text leaves,
/// single directives flush and append, block tags push, transition, and
/// pop frames with strict family checks. A non-empty stack at end of input
/// is an unterminated block.
pub fn assemble(
	items: Vec<Recognized>,
	directives: &DirectiveRegistry,
) -> PrexResult<Vec<Node>> {
	let mut assembler = Assembler::new(directives);
	for item in items {
		assembler.push(item)?;
	}
	assembler.finish()
}

struct Assembler<'a> {
	directives: &'a DirectiveRegistry,
	stack: Vec<Frame>,
}

/// An open region of the tree being built. `nodes` accumulates the current
/// section's children; `text` buffers content lines until a directive
/// forces a flush.
struct Frame {
	kind: FrameKind,
	nodes: Vec<Node>,
	text: Vec<SourceLine>,
}

enum FrameKind {
	Root,
	Conditional {
		opened: Origin,
		sealed: Vec<Branch>,
		current: (BranchKind, SourceLine),
		has_else: bool,
	},
	Loop {
		opened: Origin,
		header: SourceLine,
	},
}

struct Origin {
	tag: String,
	file: Arc<str>,
	line: usize,
}

impl Origin {
	fn of(tag: &str, args: &SourceLine) -> Self {
		Self {
			tag: tag.to_string(),
			file: Arc::clone(&args.file),
			line: args.number,
		}
	}
}

impl Frame {
	fn root() -> Self {
		Self {
			kind: FrameKind::Root,
			nodes: Vec::new(),
			text: Vec::new(),
		}
	}

	fn flush_text(&mut self) {
		if !self.text.is_empty() {
			self.nodes.push(Node::Text(mem::take(&mut self.text)));
		}
	}

	/// The family of the block this frame represents, for mismatch checks.
	fn family(&self) -> Option<&'static str> {
		match self.kind {
			FrameKind::Root => None,
			FrameKind::Conditional { .. } => Some("if"),
			FrameKind::Loop { .. } => Some("for"),
		}
	}
}

impl<'a> Assembler<'a> {
	fn new(directives: &'a DirectiveRegistry) -> Self {
		Self {
			directives,
			stack: vec![Frame::root()],
		}
	}

	fn top(&mut self) -> &mut Frame {
		self.stack.last_mut().expect("the root frame is never popped")
	}

	fn push(&mut self, item: Recognized) -> PrexResult<()> {
		match item {
			Recognized::Content(line) => {
				self.top().text.push(line);
				Ok(())
			}
			Recognized::Directive { tag, args, .. } => {
				let descriptor = self.directives.expect(&tag)?;
				match descriptor.role {
					DirectiveRole::Single => {
						let handler = descriptor.handler;
						let frame = self.top();
						frame.flush_text();
						frame.nodes.push(Node::Single { handler, tag, args });
						Ok(())
					}
					DirectiveRole::BlockOpen => self.open(descriptor.handler, &tag, args),
					DirectiveRole::BlockTransition => {
						self.transition(descriptor.handler, &tag, args)
					}
					DirectiveRole::BlockClose => self.close(&tag, &args),
				}
			}
		}
	}

	fn open(&mut self, handler: DirectiveHandler, tag: &str, args: SourceLine) -> PrexResult<()> {
		self.top().flush_text();
		let kind = match handler {
			DirectiveHandler::If => FrameKind::Conditional {
				opened: Origin::of(tag, &args),
				sealed: Vec::new(),
				current: (BranchKind::If, args),
				has_else: false,
			},
			DirectiveHandler::Ifdef => FrameKind::Conditional {
				opened: Origin::of(tag, &args),
				sealed: Vec::new(),
				current: (BranchKind::Ifdef, args),
				has_else: false,
			},
			DirectiveHandler::Ifndef => FrameKind::Conditional {
				opened: Origin::of(tag, &args),
				sealed: Vec::new(),
				current: (BranchKind::Ifndef, args),
				has_else: false,
			},
			DirectiveHandler::For => FrameKind::Loop {
				opened: Origin::of(tag, &args),
				header: args,
			},
			_ => {
				return Err(PrexError::UnknownDirective {
					tag: tag.to_string(),
				});
			}
		};
		self.stack.push(Frame {
			kind,
			nodes: Vec::new(),
			text: Vec::new(),
		});
		Ok(())
	}

	fn transition(
		&mut self,
		handler: DirectiveHandler,
		tag: &str,
		args: SourceLine,
	) -> PrexResult<()> {
		let mismatch = |detail: &str| {
			Err(PrexError::BlockMismatch {
				tag: tag.to_string(),
				detail: detail.to_string(),
				file: Arc::clone(&args.file),
				line: args.number,
			})
		};

		let frame = self.top();
		if frame.family() != Some("if") {
			return mismatch("no matching `if` block is open");
		}
		frame.flush_text();

		let FrameKind::Conditional {
			sealed,
			current,
			has_else,
			..
		} = &mut frame.kind
		else {
			unreachable!("family check guarantees a conditional frame");
		};
		if *has_else {
			return mismatch("`else` has already closed the branch list");
		}

		let kind = match handler {
			DirectiveHandler::Elif => BranchKind::Elif,
			DirectiveHandler::Else => BranchKind::Else,
			_ => {
				return Err(PrexError::UnknownDirective {
					tag: tag.to_string(),
				});
			}
		};
		if kind == BranchKind::Else {
			*has_else = true;
		}

		let (previous_kind, previous_arg) = mem::replace(current, (kind, args));
		let body = Rc::new(mem::take(&mut frame.nodes));
		sealed.push(Branch {
			kind: previous_kind,
			arg: previous_arg,
			body,
		});
		Ok(())
	}

	fn close(&mut self, tag: &str, args: &SourceLine) -> PrexResult<()> {
		let expected = self
			.directives
			.expect(tag)?
			.family
			.clone()
			.unwrap_or_default();
		let frame = self.top();
		if frame.family() != Some(expected.as_str()) {
			return Err(PrexError::BlockMismatch {
				tag: tag.to_string(),
				detail: match frame.family() {
					Some(open) => format!("the innermost open block is a `{open}` block"),
					None => "no block is open".to_string(),
				},
				file: Arc::clone(&args.file),
				line: args.number,
			});
		}

		let mut frame = self.stack.pop().expect("family check found an open frame");
		frame.flush_text();
		let node = match frame.kind {
			FrameKind::Conditional {
				mut sealed,
				current,
				..
			} => {
				let (kind, arg) = current;
				sealed.push(Branch {
					kind,
					arg,
					body: Rc::new(frame.nodes),
				});
				Node::Conditional { branches: sealed }
			}
			FrameKind::Loop { header, .. } => Node::Loop {
				header,
				body: Rc::new(frame.nodes),
			},
			FrameKind::Root => unreachable!("the root frame has no family"),
		};
		self.top().nodes.push(node);
		Ok(())
	}

	fn finish(mut self) -> PrexResult<Vec<Node>> {
		if self.stack.len() > 1 {
			let frame = self.stack.last().expect("stack is non-empty");
			let opened = match &frame.kind {
				FrameKind::Conditional { opened, .. } | FrameKind::Loop { opened, .. } => opened,
				FrameKind::Root => unreachable!("the root frame is at the bottom"),
			};
			return Err(PrexError::UnterminatedBlock {
				tag: opened.tag.clone(),
				file: Arc::clone(&opened.file),
				line: opened.line,
			});
		}
		let mut root = self.stack.pop().expect("stack holds the root frame");
		root.flush_text();
		Ok(root.nodes)
	}
}
