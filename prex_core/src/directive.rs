use std::collections::HashMap;

use crate::PrexError;
use crate::PrexResult;

/// Structural role a directive tag plays during block assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveRole {
	/// A standalone directive performing a single action.
	Single,
	/// Opens a block that must later be closed.
	BlockOpen,
	/// Splits an open block into a new section (e.g. `elif`, `else`).
	BlockTransition,
	/// Closes the innermost open block of the matching family.
	BlockClose,
}

/// What a directive does when the expander reaches it. Block-building tags
/// carry their structural meaning here too, so the assembler can match on
/// them without dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveHandler {
	Define,
	Undef,
	Include,
	Import,
	Info,
	Warn,
	Error,
	If,
	Ifdef,
	Ifndef,
	Elif,
	Else,
	Endif,
	For,
	Endfor,
}

/// An entry in the directive registry.
///
/// `family` names the opening tag of the block family for every block role
/// tag, so `elif`/`else`/`endif` all point back at `if`. Single directives
/// leave it empty. `floating` marks tags that may be recognized mid-line;
/// block tags must always be anchored.
#[derive(Debug, Clone)]
pub struct DirectiveDescriptor {
	pub tag: String,
	pub role: DirectiveRole,
	pub family: Option<String>,
	pub floating: bool,
	pub handler: DirectiveHandler,
}

impl DirectiveDescriptor {
	pub fn single(tag: &str, handler: DirectiveHandler) -> Self {
		Self {
			tag: tag.to_string(),
			role: DirectiveRole::Single,
			family: None,
			floating: true,
			handler,
		}
	}

	pub fn block(tag: &str, role: DirectiveRole, family: &str, handler: DirectiveHandler) -> Self {
		Self {
			tag: tag.to_string(),
			role,
			family: Some(family.to_string()),
			floating: false,
			handler,
		}
	}

	pub fn is_block(&self) -> bool {
		self.role != DirectiveRole::Single
	}
}

/// Maps directive tags to their descriptors. Locked once expansion starts;
/// the built-in set covers conditionals, loops, defines, file inclusion,
/// and messages.
#[derive(Debug)]
pub struct DirectiveRegistry {
	descriptors: HashMap<String, DirectiveDescriptor>,
	locked: bool,
}

impl DirectiveRegistry {
	/// An empty, unlocked registry.
	pub fn empty() -> Self {
		Self {
			descriptors: HashMap::new(),
			locked: false,
		}
	}

	/// A registry pre-populated with the built-in directive set.
	pub fn with_builtins() -> Self {
		let mut registry = Self::empty();
		for descriptor in builtin_descriptors() {
			registry
				.register(descriptor)
				.expect("builtin directive tags are unique");
		}
		registry
	}

	pub fn register(&mut self, descriptor: DirectiveDescriptor) -> PrexResult<()> {
		if self.locked {
			return Err(PrexError::RegistryLocked {
				tag: descriptor.tag,
			});
		}
		if self.descriptors.contains_key(&descriptor.tag) {
			return Err(PrexError::DuplicateRegistration {
				name: descriptor.tag,
			});
		}
		self.descriptors.insert(descriptor.tag.clone(), descriptor);
		Ok(())
	}

	pub fn lookup(&self, tag: &str) -> Option<&DirectiveDescriptor> {
		self.descriptors.get(tag)
	}

	/// Look up a tag, failing with `UnknownDirective` when absent.
	pub fn expect(&self, tag: &str) -> PrexResult<&DirectiveDescriptor> {
		self.lookup(tag).ok_or_else(|| {
			PrexError::UnknownDirective {
				tag: tag.to_string(),
			}
		})
	}

	/// Freeze the registry for the duration of an expansion run.
	pub fn lock(&mut self) {
		self.locked = true;
	}

	pub fn is_locked(&self) -> bool {
		self.locked
	}
}

impl Default for DirectiveRegistry {
	fn default() -> Self {
		Self::with_builtins()
	}
}

fn builtin_descriptors() -> Vec<DirectiveDescriptor> {
	use DirectiveHandler as H;
	use DirectiveRole as R;

	let mut descriptors = vec![
		DirectiveDescriptor::single("define", H::Define),
		DirectiveDescriptor::single("undef", H::Undef),
		DirectiveDescriptor::single("include", H::Include),
		DirectiveDescriptor::single("import", H::Import),
		DirectiveDescriptor::single("info", H::Info),
		DirectiveDescriptor::block("if", R::BlockOpen, "if", H::If),
		DirectiveDescriptor::block("ifdef", R::BlockOpen, "if", H::Ifdef),
		DirectiveDescriptor::block("ifndef", R::BlockOpen, "if", H::Ifndef),
		DirectiveDescriptor::block("elif", R::BlockTransition, "if", H::Elif),
		DirectiveDescriptor::block("else", R::BlockTransition, "if", H::Else),
		DirectiveDescriptor::block("endif", R::BlockClose, "if", H::Endif),
		DirectiveDescriptor::block("for", R::BlockOpen, "for", H::For),
		DirectiveDescriptor::block("endfor", R::BlockClose, "for", H::Endfor),
	];

	for tag in ["warn", "warning", "todo", "fixme"] {
		descriptors.push(DirectiveDescriptor::single(tag, H::Warn));
	}
	for tag in ["error", "danger", "fatal"] {
		descriptors.push(DirectiveDescriptor::single(tag, H::Error));
	}

	descriptors
}
