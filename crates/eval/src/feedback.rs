//! Per-editor flash feedback state machine.
//!
//! Each evaluation walks one editor through Idle → Evaluating →
//! {Success | Error} → Idle. Every invocation bumps that editor's
//! generation counter synchronously, before any suspension point, so a
//! newer invocation always invalidates the timers and completions of older
//! ones that resolve later: last invocation wins for visual state,
//! regardless of response arrival order. Editors are fully independent.
//!
//! There is no protocol-level cancellation. A stale completion is simply
//! discarded at the generation check, and the fixed 5 second safety timeout
//! clears an Evaluating annotation whose completion never arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::Range;
use parking_lot::Mutex;
use tracing::debug;

/// Forced clear of a dangling Evaluating annotation. Not user-configurable.
pub const EVAL_CLEAR_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque editor identity. Generations and annotation state are tracked per
/// editor; invocations on different editors never interfere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditorId(pub u64);

/// The three process-wide annotation styles.
///
/// Style descriptors (color, rendering behavior) are shared across all
/// editors; which ranges are painted with a style is per-editor state owned
/// by the [`AnnotationSink`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationStyle {
	/// Painted while a request is in flight.
	Evaluating,
	/// Painted over a span whose evaluation produced a value.
	Success,
	/// Painted over a span whose evaluation failed (compile or runtime).
	Error,
}

/// A painted range plus optional inspectable payload (hover text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
	/// The span the annotation covers.
	pub span: Range,
	/// Result or error text shown on hover.
	pub hover: Option<String>,
}

/// Rendering seam the host editor provides.
///
/// A call always replaces the full annotation list for `(editor, style)`;
/// lists are never merged.
pub trait AnnotationSink: Send + Sync {
	/// Replaces the annotations of one style on one editor.
	fn set_annotations(&self, editor: EditorId, style: AnnotationStyle, annotations: Vec<Annotation>);
}

/// Flash delays, read once per invocation and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTiming {
	/// Delay awaited before the end annotation is applied.
	pub pre: Duration,
	/// How long the end annotation stays visible.
	pub post: Duration,
}

impl Default for FlashTiming {
	fn default() -> Self {
		Self {
			pre: Duration::from_millis(50),
			post: Duration::from_millis(600),
		}
	}
}

/// Handle binding one invocation to the generation it started under.
#[derive(Debug, Clone)]
pub struct EvalTicket {
	editor: EditorId,
	span: Range,
	generation: u64,
	timing: FlashTiming,
}

impl EvalTicket {
	/// The editor this invocation runs on.
	pub fn editor(&self) -> EditorId {
		self.editor
	}

	/// The span feedback is anchored to.
	pub fn span(&self) -> Range {
		self.span
	}
}

/// Drives time-bounded annotations over evaluation target spans.
///
/// Cheap to clone; clones share the per-editor generation map and sink.
#[derive(Clone)]
pub struct FeedbackController {
	inner: Arc<Inner>,
}

struct Inner {
	sink: Arc<dyn AnnotationSink>,
	generations: Mutex<HashMap<EditorId, u64>>,
}

impl std::fmt::Debug for FeedbackController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FeedbackController")
			.field("generations", &self.inner.generations.lock())
			.finish_non_exhaustive()
	}
}

impl FeedbackController {
	/// Creates a controller rendering through `sink`.
	pub fn new(sink: Arc<dyn AnnotationSink>) -> Self {
		Self {
			inner: Arc::new(Inner {
				sink,
				generations: Mutex::new(HashMap::new()),
			}),
		}
	}

	/// Enters Evaluating for one invocation.
	///
	/// Bumps the editor's generation synchronously, clears any previous end
	/// annotations, paints Evaluating over `span`, and arms the safety
	/// timeout. The returned ticket must be handed back to [`Self::finish`]
	/// when (and if) the evaluation completes.
	pub fn begin(&self, editor: EditorId, span: Range, timing: FlashTiming) -> EvalTicket {
		let generation = {
			let mut generations = self.inner.generations.lock();
			let slot = generations.entry(editor).or_default();
			*slot += 1;
			*slot
		};
		let ticket = EvalTicket {
			editor,
			span,
			generation,
			timing,
		};

		let sink = &self.inner.sink;
		sink.set_annotations(editor, AnnotationStyle::Success, Vec::new());
		sink.set_annotations(editor, AnnotationStyle::Error, Vec::new());
		sink.set_annotations(
			editor,
			AnnotationStyle::Evaluating,
			vec![Annotation { span, hover: None }],
		);

		let this = self.clone();
		let timer_ticket = ticket.clone();
		tokio::spawn(async move {
			tokio::time::sleep(EVAL_CLEAR_TIMEOUT).await;
			if this.is_current(&timer_ticket) {
				debug!(
					editor = timer_ticket.editor.0,
					generation = timer_ticket.generation,
					"evaluation timed out, clearing annotation"
				);
				this.inner.sink.set_annotations(
					timer_ticket.editor,
					AnnotationStyle::Evaluating,
					Vec::new(),
				);
			}
		});

		ticket
	}

	/// Completes an invocation with its outcome.
	///
	/// Discarded outright when the ticket's generation is stale. Otherwise
	/// awaits the pre flash delay, swaps Evaluating for the end annotation
	/// carrying `text` as hover payload, and clears it again after the post
	/// delay unless a newer invocation has taken over in the meantime.
	pub async fn finish(&self, ticket: &EvalTicket, text: String, is_error: bool) {
		if !self.is_current(ticket) {
			debug!(
				editor = ticket.editor.0,
				generation = ticket.generation,
				"stale completion discarded"
			);
			return;
		}

		tokio::time::sleep(ticket.timing.pre).await;
		if !self.is_current(ticket) {
			return;
		}

		let style = if is_error {
			AnnotationStyle::Error
		} else {
			AnnotationStyle::Success
		};
		let cleared = if is_error {
			AnnotationStyle::Success
		} else {
			AnnotationStyle::Error
		};

		let sink = &self.inner.sink;
		sink.set_annotations(ticket.editor, AnnotationStyle::Evaluating, Vec::new());
		sink.set_annotations(ticket.editor, cleared, Vec::new());
		sink.set_annotations(
			ticket.editor,
			style,
			vec![Annotation {
				span: ticket.span,
				hover: Some(text),
			}],
		);

		tokio::time::sleep(ticket.timing.post).await;
		if self.is_current(ticket) {
			self.inner.sink.set_annotations(ticket.editor, style, Vec::new());
		}
	}

	/// Whether the ticket still owns its editor's visual state.
	fn is_current(&self, ticket: &EvalTicket) -> bool {
		self.inner
			.generations
			.lock()
			.get(&ticket.editor)
			.is_some_and(|current| *current == ticket.generation)
	}
}
