use std::sync::Arc;

use crate::PrexError;
use crate::PrexResult;
use crate::directive::DirectiveRegistry;
use crate::line::SourceLine;

/// A classified fragment of a logical line.
///
/// A line is either plain content, a single anchored directive occupying
/// the whole line, or a mix of content and floating directives. The
/// recognizer returns fragments in source order, so surrounding content is
/// emitted on either side of a floating directive naturally.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognized {
	/// Plain text, passed through to the output (after substitution).
	Content(SourceLine),
	/// A directive call: the tag and everything after it.
	Directive {
		tag: String,
		args: SourceLine,
		anchored: bool,
	},
}

/// Classify one logical line against the directive registry.
///
/// Anchoring wins: a line whose first non-whitespace token is the prefix
/// character followed by a registered tag becomes a single anchored
/// directive and floating recognition never runs. An anchored prefix whose
/// tag is not registered leaves the line as content, so ordinary `#`
/// comment lines survive untouched.
pub fn recognize(
	line: &SourceLine,
	directives: &DirectiveRegistry,
	delimiter: char,
) -> PrexResult<Vec<Recognized>> {
	let trimmed = line.text.trim_start();
	if let Some(rest) = trimmed.strip_prefix(delimiter) {
		let tag = leading_identifier(rest);
		if !tag.is_empty() && directives.lookup(tag).is_some() {
			let args = rest[tag.len()..].trim().to_string();
			return Ok(vec![Recognized::Directive {
				tag: tag.to_string(),
				args: line.derive(args),
				anchored: true,
			}]);
		}
		// An unresolved anchored tag leaves the line as content, which may
		// still contain floating directives further along.
	}

	recognize_floating(line, directives, delimiter)
}

/// Scan a content line for embedded directive calls. Each recognized
/// directive consumes the rest of the line up to the next recognized
/// directive as its argument text.
fn recognize_floating(
	line: &SourceLine,
	directives: &DirectiveRegistry,
	delimiter: char,
) -> PrexResult<Vec<Recognized>> {
	let text = line.text.as_str();
	let mut cuts: Vec<(usize, usize, String)> = Vec::new();

	for (index, ch) in text.char_indices() {
		if ch != delimiter {
			continue;
		}
		let after = &text[index + ch.len_utf8()..];
		let tag = leading_identifier(after);
		if tag.is_empty() {
			continue;
		}
		let Some(descriptor) = directives.lookup(tag) else {
			continue;
		};
		if descriptor.is_block() {
			return Err(PrexError::BlockMismatch {
				tag: tag.to_string(),
				detail: "block directives must be anchored at the start of a line".to_string(),
				file: Arc::clone(&line.file),
				line: line.number,
			});
		}
		if !descriptor.floating {
			continue;
		}
		let tag_end = index + ch.len_utf8() + tag.len();
		// Ignore overlaps with the argument text of an earlier directive:
		// the earlier call owns the rest of the line up to this point.
		cuts.push((index, tag_end, tag.to_string()));
	}

	if cuts.is_empty() {
		return Ok(vec![Recognized::Content(line.clone())]);
	}

	let mut items = Vec::with_capacity(cuts.len() + 1);
	let before = text[..cuts[0].0].trim_end();
	if !before.is_empty() {
		items.push(Recognized::Content(line.derive(before)));
	}

	for (position, (_, tag_end, tag)) in cuts.iter().enumerate() {
		let args_end = cuts
			.get(position + 1)
			.map_or(text.len(), |(next_start, _, _)| *next_start);
		let args = text[*tag_end..args_end].trim();
		items.push(Recognized::Directive {
			tag: tag.clone(),
			args: line.derive(args),
			anchored: false,
		});
	}

	Ok(items)
}

/// The identifier run at the start of `text` (`[A-Za-z_][A-Za-z0-9_]*`).
pub(crate) fn leading_identifier(text: &str) -> &str {
	let mut end = 0;
	for (index, ch) in text.char_indices() {
		let valid = if index == 0 {
			ch.is_ascii_alphabetic() || ch == '_'
		} else {
			ch.is_ascii_alphanumeric() || ch == '_'
		};
		if !valid {
			break;
		}
		end = index + ch.len_utf8();
	}
	&text[..end]
}
