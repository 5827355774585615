//! Span computation for the three evaluation trigger modes.
//!
//! All functions are pure over the document text and return
//! `Option<Range>`; `None` means there is nothing to evaluate and callers
//! must treat it as a no-op.
//!
//! Region mode locates the smallest enclosing block delimited by marker
//! lines: an opening line consisting of `(` (optionally followed by a `//`
//! comment) and a closing line consisting of `)`, an optional `;`, and an
//! optional trailing `//` comment. Blocks nest; the forward scan keeps a
//! depth counter and tests the open pattern before the close pattern on
//! every line, so a line is free to match both independently.

use std::sync::LazyLock;

use lsp_types::{Position, Range};
use regex::Regex;
use ropey::Rope;

static OPEN_MARKER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\(\s*(//.*)?$").expect("valid pattern"));
static CLOSE_MARKER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\)\s*;?\s*(//.*)?$").expect("valid pattern"));

/// Span for selection mode.
///
/// An explicit non-empty range is used verbatim; otherwise falls through to
/// [`line_span`].
pub fn selection_span(text: &Rope, selection: Range, explicit: Option<Range>) -> Option<Range> {
	match explicit {
		Some(range) if range.start != range.end => Some(range),
		_ => line_span(text, selection),
	}
}

/// Span for line mode: the whole lines touched by the selection.
///
/// Runs from column 0 of the selection's first line to the end of the last
/// line's content.
pub fn line_span(text: &Rope, selection: Range) -> Option<Range> {
	let last = last_line(text);
	let start_line = (selection.start.line as usize).min(last);
	let end_line = (selection.end.line as usize).min(last);
	Some(Range {
		start: Position::new(start_line as u32, 0),
		end: line_end(text, end_line),
	})
}

/// Span for region mode: the smallest marker-delimited block enclosing the
/// selection.
///
/// Scans backward from the selection's start line for an opening marker,
/// then forward from the selection's end line with a nesting counter
/// initialized to 1 until the matching closing marker brings it to 0.
/// Returns `None` when either boundary is missing (unterminated region).
pub fn region_span(text: &Rope, selection: Range) -> Option<Range> {
	let last = last_line(text);
	let mut line = (selection.start.line as usize).min(last);

	let open_line = loop {
		if OPEN_MARKER.is_match(&line_text(text, line)) {
			break line;
		}
		if line == 0 {
			return None;
		}
		line -= 1;
	};

	let mut depth = 1i32;
	let mut line = (selection.end.line as usize).min(last);
	let close_line = loop {
		if line > last {
			return None;
		}
		let current = line_text(text, line);
		// Both patterns are tested independently, open first.
		if OPEN_MARKER.is_match(&current) {
			depth += 1;
		}
		if CLOSE_MARKER.is_match(&current) {
			depth -= 1;
		}
		if depth == 0 {
			break line;
		}
		line += 1;
	};

	Some(Range {
		start: Position::new(open_line as u32, 0),
		end: line_end(text, close_line),
	})
}

/// The literal characters covered by a span.
pub fn span_text(text: &Rope, span: Range) -> String {
	let start = position_to_char(text, span.start);
	let end = position_to_char(text, span.end);
	if start >= end {
		return String::new();
	}
	text.slice(start..end).to_string()
}

/// Index of the last addressable line.
fn last_line(text: &Rope) -> usize {
	text.len_lines().saturating_sub(1)
}

/// A line's content without its terminator.
fn line_text(text: &Rope, line: usize) -> String {
	let raw = text.line(line).to_string();
	raw.trim_end_matches('\n').trim_end_matches('\r').to_string()
}

/// Position at the end of a line's content, terminator excluded.
fn line_end(text: &Rope, line: usize) -> Position {
	let character = line_text(text, line).chars().count() as u32;
	Position::new(line as u32, character)
}

/// Clamped char index of a position.
fn position_to_char(text: &Rope, position: Position) -> usize {
	let line = (position.line as usize).min(last_line(text));
	let line_start = text.line_to_char(line);
	let line_len = line_text(text, line).chars().count();
	line_start + (position.character as usize).min(line_len)
}
