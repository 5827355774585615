//! Evaluation orchestration: span → request → outcome routing.
//!
//! The dispatcher resolves the span for the requested trigger mode, starts
//! the feedback state machine, and ships the literal span text to the
//! remote engine over an opaque typed transport. The eventual three-way
//! result is classified and routed back into feedback; a malformed result
//! (zero or several populated fields) is dropped so the safety timeout
//! clears the Evaluating annotation instead of guessing an outcome.
//!
//! Nothing here blocks the invoking command: dispatch spawns the
//! request/completion task and hands the join handle back for optional
//! composition.

use std::sync::Arc;

use ember_protocol::{EvaluateOutcome, EvaluateParams, EvaluateResponse};
use futures::future::BoxFuture;
use lsp_types::{Range, TextDocumentIdentifier, Uri};
use ropey::Rope;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::feedback::{EditorId, FeedbackController, FlashTiming};
use crate::{Result, region};

/// Settings key for the pre-render flash delay (milliseconds).
pub const FLASH_TIME_KEY: &str = "evaluate.flashTime";
/// Settings key for how long the end annotation stays visible (milliseconds).
pub const POST_FLASH_TIME_KEY: &str = "evaluate.postFlashTime";

/// The active editor as resolved by the command layer.
#[derive(Debug, Clone)]
pub struct EditorSnapshot {
	/// Identity the feedback state is keyed by.
	pub id: EditorId,
	/// Document the evaluated text belongs to.
	pub uri: Uri,
	/// Language id of the document, used for selector matching.
	pub language_id: String,
	/// Full document text.
	pub text: Rope,
	/// Current selection (zero-width for a bare cursor).
	pub selection: Range,
}

/// Typed transport seam to the remote engine.
///
/// How the connection is established and kept alive is the host's concern;
/// the dispatcher only needs a request that eventually resolves.
pub trait EvalTransport: Send + Sync {
	/// Sends an evaluate request and resolves its response.
	fn evaluate(&self, params: EvaluateParams) -> BoxFuture<'static, Result<EvaluateResponse>>;
}

/// Named options with defaults, as the host's settings store presents them.
pub trait Settings: Send + Sync {
	/// Reads an integer option, `None` when unset.
	fn get_u64(&self, key: &str) -> Option<u64>;
}

/// Orchestrates the three evaluation commands.
pub struct Evaluator {
	transport: Arc<dyn EvalTransport>,
	feedback: FeedbackController,
	settings: Arc<dyn Settings>,
}

impl Evaluator {
	/// Creates an evaluator over the given seams.
	pub fn new(
		transport: Arc<dyn EvalTransport>,
		feedback: FeedbackController,
		settings: Arc<dyn Settings>,
	) -> Self {
		Self {
			transport,
			feedback,
			settings,
		}
	}

	/// Evaluates an explicit range, falling back to whole lines when the
	/// range is absent or empty.
	pub fn evaluate_selection(
		&self,
		snapshot: &EditorSnapshot,
		explicit: Option<Range>,
	) -> Option<JoinHandle<Option<EvaluateOutcome>>> {
		let span = region::selection_span(&snapshot.text, snapshot.selection, explicit)?;
		self.dispatch(snapshot, span)
	}

	/// Evaluates the whole lines touched by the current selection.
	pub fn evaluate_line(
		&self,
		snapshot: &EditorSnapshot,
	) -> Option<JoinHandle<Option<EvaluateOutcome>>> {
		let span = region::line_span(&snapshot.text, snapshot.selection)?;
		self.dispatch(snapshot, span)
	}

	/// Evaluates the smallest marker-delimited region enclosing the
	/// selection. A no-op when the region is unterminated.
	pub fn evaluate_region(
		&self,
		snapshot: &EditorSnapshot,
	) -> Option<JoinHandle<Option<EvaluateOutcome>>> {
		let span = region::region_span(&snapshot.text, snapshot.selection)?;
		self.dispatch(snapshot, span)
	}

	/// Starts feedback and spawns the request/completion task.
	///
	/// The handle resolves to the classified outcome (or `None` on transport
	/// failure or a malformed response) so callers can compose on the
	/// result without the invoking command ever blocking on it.
	fn dispatch(
		&self,
		snapshot: &EditorSnapshot,
		span: Range,
	) -> Option<JoinHandle<Option<EvaluateOutcome>>> {
		// A zero-width span means there is nothing to evaluate.
		if span.start == span.end {
			return None;
		}

		let timing = self.flash_timing();
		let ticket = self.feedback.begin(snapshot.id, span, timing);
		let params = EvaluateParams {
			text_document: TextDocumentIdentifier {
				uri: snapshot.uri.clone(),
			},
			source_code: region::span_text(&snapshot.text, span),
		};
		debug!(
			editor = snapshot.id.0,
			uri = snapshot.uri.as_str(),
			bytes = params.source_code.len(),
			"dispatching evaluation"
		);

		let transport = self.transport.clone();
		let feedback = self.feedback.clone();
		Some(tokio::spawn(async move {
			match transport.evaluate(params).await {
				Ok(response) => match response.into_outcome() {
					Some(outcome) => {
						feedback
							.finish(&ticket, outcome.text().to_string(), outcome.is_error())
							.await;
						Some(outcome)
					}
					None => {
						// Exactly-one-field invariant violated; the safety
						// timeout will clear the Evaluating annotation.
						warn!(
							editor = ticket.editor().0,
							"malformed evaluation response dropped"
						);
						None
					}
				},
				Err(err) => {
					warn!(editor = ticket.editor().0, error = %err, "evaluation request failed");
					None
				}
			}
		}))
	}

	/// Reads the flash delays, applying the 50ms/600ms defaults.
	fn flash_timing(&self) -> FlashTiming {
		let defaults = FlashTiming::default();
		FlashTiming {
			pre: self
				.settings
				.get_u64(FLASH_TIME_KEY)
				.map_or(defaults.pre, std::time::Duration::from_millis),
			post: self
				.settings
				.get_u64(POST_FLASH_TIME_KEY)
				.map_or(defaults.post, std::time::Duration::from_millis),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::{HashMap, VecDeque};
	use std::time::Duration;

	use lsp_types::Position;
	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::feedback::{Annotation, AnnotationSink, AnnotationStyle, EVAL_CLEAR_TIMEOUT};

	#[derive(Default)]
	struct RecordingSink {
		events: Mutex<Vec<(EditorId, AnnotationStyle, Vec<Annotation>)>>,
	}

	impl AnnotationSink for RecordingSink {
		fn set_annotations(
			&self,
			editor: EditorId,
			style: AnnotationStyle,
			annotations: Vec<Annotation>,
		) {
			self.events.lock().push((editor, style, annotations));
		}
	}

	impl RecordingSink {
		fn current(&self, editor: EditorId, style: AnnotationStyle) -> Option<Vec<Annotation>> {
			self.events
				.lock()
				.iter()
				.rev()
				.find(|(e, s, _)| *e == editor && *s == style)
				.map(|(_, _, annotations)| annotations.clone())
		}

		fn painted(&self, editor: EditorId, style: AnnotationStyle) -> Vec<Vec<Annotation>> {
			self.events
				.lock()
				.iter()
				.filter(|(e, s, annotations)| *e == editor && *s == style && !annotations.is_empty())
				.map(|(_, _, annotations)| annotations.clone())
				.collect()
		}

		fn is_empty(&self) -> bool {
			self.events.lock().is_empty()
		}
	}

	/// Scripted transport: each call pops `(delay, response)` off the front.
	#[derive(Default)]
	struct ScriptedTransport {
		script: Mutex<VecDeque<(Duration, Result<EvaluateResponse>)>>,
		requests: Mutex<Vec<EvaluateParams>>,
	}

	impl ScriptedTransport {
		fn push(&self, delay: Duration, response: Result<EvaluateResponse>) {
			self.script.lock().push_back((delay, response));
		}
	}

	impl EvalTransport for ScriptedTransport {
		fn evaluate(&self, params: EvaluateParams) -> BoxFuture<'static, Result<EvaluateResponse>> {
			self.requests.lock().push(params);
			let (delay, response) = self
				.script
				.lock()
				.pop_front()
				.unwrap_or((Duration::ZERO, Ok(EvaluateResponse::default())));
			Box::pin(async move {
				tokio::time::sleep(delay).await;
				response
			})
		}
	}

	struct MapSettings(HashMap<&'static str, u64>);

	impl Settings for MapSettings {
		fn get_u64(&self, key: &str) -> Option<u64> {
			self.0.get(key).copied()
		}
	}

	struct Fixture {
		sink: Arc<RecordingSink>,
		transport: Arc<ScriptedTransport>,
		evaluator: Evaluator,
	}

	fn fixture() -> Fixture {
		fixture_with_settings(HashMap::new())
	}

	fn fixture_with_settings(settings: HashMap<&'static str, u64>) -> Fixture {
		let sink = Arc::new(RecordingSink::default());
		let transport = Arc::new(ScriptedTransport::default());
		let evaluator = Evaluator::new(
			transport.clone(),
			FeedbackController::new(sink.clone()),
			Arc::new(MapSettings(settings)),
		);
		Fixture {
			sink,
			transport,
			evaluator,
		}
	}

	fn snapshot(lines: &[&str], line: u32) -> EditorSnapshot {
		EditorSnapshot {
			id: EditorId(1),
			uri: "file:///tmp/scratch.rho".parse().unwrap(),
			language_id: "rho".to_string(),
			text: Rope::from_str(&lines.join("\n")),
			selection: Range::new(Position::new(line, 0), Position::new(line, 0)),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_region_result_paints_success_over_dispatched_span() {
		let fx = fixture();
		fx.transport.push(
			Duration::from_millis(5),
			Ok(EvaluateResponse {
				result: Some("2".into()),
				..Default::default()
			}),
		);

		let handle = fx
			.evaluator
			.evaluate_region(&snapshot(&["(", "1 + 1;", ")"], 1))
			.expect("span resolved");
		let outcome = handle.await.unwrap();
		assert_eq!(outcome, Some(EvaluateOutcome::Value("2".into())));

		let expected_span = Range::new(Position::new(0, 0), Position::new(2, 1));
		let successes = fx.sink.painted(EditorId(1), AnnotationStyle::Success);
		assert_eq!(
			successes,
			vec![vec![Annotation {
				span: expected_span,
				hover: Some("2".to_string()),
			}]]
		);
		assert_eq!(
			fx.transport.requests.lock()[0].source_code,
			"(\n1 + 1;\n)"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_runtime_error_paints_error_with_message() {
		let fx = fixture();
		fx.transport.push(
			Duration::ZERO,
			Ok(EvaluateResponse {
				error: Some("DivideByZero".into()),
				..Default::default()
			}),
		);

		let handle = fx
			.evaluator
			.evaluate_line(&snapshot(&["1 / 0;"], 0))
			.expect("span resolved");
		let outcome = handle.await.unwrap();
		assert_eq!(outcome, Some(EvaluateOutcome::RuntimeError("DivideByZero".into())));

		let errors = fx.sink.painted(EditorId(1), AnnotationStyle::Error);
		assert_eq!(errors.len(), 1);
		assert_eq!(errors[0][0].hover.as_deref(), Some("DivideByZero"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_compile_error_renders_as_error() {
		let fx = fixture();
		fx.transport.push(
			Duration::ZERO,
			Ok(EvaluateResponse {
				compile_error: Some("unexpected token".into()),
				..Default::default()
			}),
		);

		let handle = fx
			.evaluator
			.evaluate_line(&snapshot(&["1 +;"], 0))
			.expect("span resolved");
		let outcome = handle.await.unwrap();
		assert!(matches!(outcome, Some(EvaluateOutcome::CompileError(_))));

		assert_eq!(fx.sink.painted(EditorId(1), AnnotationStyle::Error).len(), 1);
		assert!(fx.sink.painted(EditorId(1), AnnotationStyle::Success).is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_malformed_response_leaves_evaluating_until_timeout() {
		let fx = fixture();
		fx.transport.push(
			Duration::ZERO,
			Ok(EvaluateResponse {
				result: Some("2".into()),
				error: Some("boom".into()),
				..Default::default()
			}),
		);

		let handle = fx
			.evaluator
			.evaluate_line(&snapshot(&["1 + 1;"], 0))
			.expect("span resolved");
		assert_eq!(handle.await.unwrap(), None);

		// No completion transition happened.
		assert!(fx.sink.painted(EditorId(1), AnnotationStyle::Success).is_empty());
		assert!(fx.sink.painted(EditorId(1), AnnotationStyle::Error).is_empty());
		assert_eq!(
			fx.sink
				.current(EditorId(1), AnnotationStyle::Evaluating)
				.map(|a| a.len()),
			Some(1)
		);

		tokio::time::sleep(EVAL_CLEAR_TIMEOUT + Duration::from_millis(1)).await;
		assert_eq!(
			fx.sink.current(EditorId(1), AnnotationStyle::Evaluating),
			Some(vec![])
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_transport_failure_is_silent() {
		let fx = fixture();
		fx.transport
			.push(Duration::ZERO, Err(crate::Error::Transport("gone".into())));

		let handle = fx
			.evaluator
			.evaluate_line(&snapshot(&["1 + 1;"], 0))
			.expect("span resolved");
		assert_eq!(handle.await.unwrap(), None);

		assert!(fx.sink.painted(EditorId(1), AnnotationStyle::Success).is_empty());
		assert!(fx.sink.painted(EditorId(1), AnnotationStyle::Error).is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_unterminated_region_is_total_noop() {
		let fx = fixture();
		let result = fx.evaluator.evaluate_region(&snapshot(&["a;", "b;"], 0));
		assert!(result.is_none());
		assert!(fx.sink.is_empty());
		assert!(fx.transport.requests.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_empty_document_line_is_noop() {
		let fx = fixture();
		let result = fx.evaluator.evaluate_line(&snapshot(&[""], 0));
		assert!(result.is_none());
		assert!(fx.sink.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_explicit_selection_overrides_line_mode() {
		let fx = fixture();
		fx.transport.push(
			Duration::ZERO,
			Ok(EvaluateResponse {
				result: Some("bc".into()),
				..Default::default()
			}),
		);

		let explicit = Range::new(Position::new(0, 1), Position::new(0, 3));
		let handle = fx
			.evaluator
			.evaluate_selection(&snapshot(&["abcdef"], 0), Some(explicit))
			.expect("span resolved");
		assert_eq!(handle.await.unwrap(), Some(EvaluateOutcome::Value("bc".into())));

		assert_eq!(fx.transport.requests.lock()[0].source_code, "bc");
	}

	#[tokio::test(start_paused = true)]
	async fn test_overlapping_invocations_render_newer_outcome_only() {
		let fx = fixture();
		// First response is slow, second is fast: the first resolves last.
		fx.transport.push(
			Duration::from_millis(100),
			Ok(EvaluateResponse {
				result: Some("first".into()),
				..Default::default()
			}),
		);
		fx.transport.push(
			Duration::from_millis(20),
			Ok(EvaluateResponse {
				result: Some("second".into()),
				..Default::default()
			}),
		);

		let snap = snapshot(&["1 + 1;"], 0);
		let first = fx.evaluator.evaluate_line(&snap).expect("span resolved");
		tokio::time::sleep(Duration::from_millis(10)).await;
		let second = fx.evaluator.evaluate_line(&snap).expect("span resolved");

		// Both tasks still resolve their own outcomes; only rendering is
		// suppressed for the stale one.
		assert_eq!(
			first.await.unwrap(),
			Some(EvaluateOutcome::Value("first".into()))
		);
		assert_eq!(
			second.await.unwrap(),
			Some(EvaluateOutcome::Value("second".into()))
		);

		let successes = fx.sink.painted(EditorId(1), AnnotationStyle::Success);
		assert_eq!(successes.len(), 1);
		assert_eq!(successes[0][0].hover.as_deref(), Some("second"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_flash_timing_read_from_settings() {
		let fx = fixture_with_settings(HashMap::from([
			(FLASH_TIME_KEY, 0_u64),
			(POST_FLASH_TIME_KEY, 10_000_u64),
		]));
		fx.transport.push(
			Duration::ZERO,
			Ok(EvaluateResponse {
				result: Some("2".into()),
				..Default::default()
			}),
		);

		let handle = fx
			.evaluator
			.evaluate_line(&snapshot(&["1 + 1;"], 0))
			.expect("span resolved");
		assert!(handle.await.unwrap().is_some());

		// With a 10s post delay the task outlives the 5s safety timeout;
		// the success annotation was still cleared at the end.
		assert_eq!(
			fx.sink.current(EditorId(1), AnnotationStyle::Success),
			Some(vec![])
		);
		assert_eq!(
			fx.sink.painted(EditorId(1), AnnotationStyle::Success).len(),
			1
		);
	}
}
