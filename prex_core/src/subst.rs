use std::sync::Arc;

use crate::PrexError;
use crate::PrexResult;
use crate::context::DefineValue;
use crate::eval;
use crate::eval::EvalEnv;
use crate::lexer::leading_identifier;

/// Apply constant substitution to a line of output text.
///
/// Two forms are recognized. The explicit form `$(NAME)` resolves NAME,
/// substitutes recursively, and evaluates the result as an expression
/// (`$(S)` with `S = (A + B)` yields `3`); text that does not evaluate
/// passes through as-is. The implicit form replaces any bare word that
/// matches a defined name with its raw text. Both are iterated to a fixed
/// point, capped by the substitution depth limit.
pub fn substitute_text(
	text: &str,
	env: &EvalEnv<'_>,
	implicit: bool,
) -> PrexResult<String> {
	let mut current = text.to_string();

	for _ in 0..env.limit {
		let explicit = explicit_pass(&current, env)?;
		let settled = if implicit {
			implicit_pass(&explicit, env)
		} else {
			explicit
		};
		if settled == current {
			return Ok(settled);
		}
		current = settled;
	}

	Err(PrexError::SubstitutionLoop {
		limit: env.limit,
		file: Arc::clone(&env.file),
		line: env.line,
	})
}

/// Replace every well-formed `$(NAME)` occurrence. A `$(` not followed by
/// an identifier and `)` is left untouched.
fn explicit_pass(text: &str, env: &EvalEnv<'_>) -> PrexResult<String> {
	let mut output = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(start) = rest.find("$(") {
		output.push_str(&rest[..start]);
		let after = &rest[start + 2..];
		let name = leading_identifier(after);
		if !name.is_empty() && after[name.len()..].starts_with(')') {
			output.push_str(&resolve_explicit(name, env)?);
			rest = &after[name.len() + 1..];
		} else {
			output.push_str("$(");
			rest = after;
		}
	}

	output.push_str(rest);
	Ok(output)
}

/// The replacement text for an explicit `$(NAME)` reference. An undefined
/// name is an error here, unlike in the implicit pass.
fn resolve_explicit(name: &str, env: &EvalEnv<'_>) -> PrexResult<String> {
	match env.arena.lookup(env.ctx, name) {
		None => Err(PrexError::UndefinedIdentifier {
			name: name.to_string(),
			file: Arc::clone(&env.file),
			line: env.line,
		}),
		Some(DefineValue::Marker) => Ok(String::new()),
		Some(DefineValue::Resolved(value)) => Ok(value.to_string()),
		Some(DefineValue::Text(raw)) => {
			match eval::evaluate(raw, env) {
				Ok(value) => Ok(value.to_string()),
				Err(error @ PrexError::SubstitutionLoop { .. }) => Err(error),
				// Not an expression (or references undefined names): fall
				// back to the raw text, which the outer fixed-point loop
				// keeps substituting.
				Err(_) => Ok(raw.clone()),
			}
		}
	}
}

/// Replace bare identifier words that match a defined name.
fn implicit_pass(text: &str, env: &EvalEnv<'_>) -> String {
	let mut output = String::with_capacity(text.len());
	let mut rest = text;

	while !rest.is_empty() {
		let Some(start) = rest.find(|ch: char| ch.is_ascii_alphabetic() || ch == '_') else {
			output.push_str(rest);
			break;
		};
		// A word glued to a preceding digit is not an identifier start;
		// consume the whole run as literal text.
		if start > 0
			&& rest[..start]
				.chars()
				.next_back()
				.is_some_and(|ch| ch.is_ascii_alphanumeric())
		{
			let skip = start + leading_identifier(&rest[start..]).len();
			output.push_str(&rest[..skip]);
			rest = &rest[skip..];
			continue;
		}
		output.push_str(&rest[..start]);
		let word = leading_identifier(&rest[start..]);
		match env.arena.lookup(env.ctx, word) {
			Some(DefineValue::Marker) => {}
			Some(DefineValue::Resolved(value)) => output.push_str(&value.to_string()),
			Some(DefineValue::Text(raw)) => output.push_str(raw),
			None => output.push_str(word),
		}
		rest = &rest[start + word.len()..];
	}

	output
}
