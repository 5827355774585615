//! Inline evaluation subsystem.
//!
//! Lets a user send a span of source text to a remote execution engine over
//! the `textDocument/evaluateSelection` extension and see the outcome as a
//! time-bounded annotation over that exact span, even when evaluations
//! overlap in time.
//!
//! The pieces, leaf-first:
//! - [`region`]: pure span computation for the three trigger modes
//!   (explicit selection, whole lines, enclosing marker-delimited region).
//! - [`feedback`]: the per-editor annotation state machine. A monotonic
//!   generation counter guarantees that a slow or timed-out evaluation never
//!   clobbers the visual state of a newer one.
//! - [`dispatch`]: orchestration, turning a resolved span into a request
//!   and routing the outcome back into feedback over an opaque transport.
//! - [`registration`]: capability advertisement and dynamic registration
//!   against a document selector.
//!
//! Nothing here raises to the surrounding command layer: every failure path
//! resolves to either "no visual change" or a transient error annotation.

mod dispatch;
mod feedback;
pub mod region;
mod registration;

pub use dispatch::{
	EditorSnapshot, EvalTransport, Evaluator, FLASH_TIME_KEY, POST_FLASH_TIME_KEY, Settings,
};
pub use feedback::{
	Annotation, AnnotationSink, AnnotationStyle, EditorId, EvalTicket, FeedbackController,
	FlashTiming, EVAL_CLEAR_TIMEOUT,
};
pub use registration::{EvaluateFeature, experimental_capabilities};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// These never escape a dispatched evaluation task; they are logged and the
/// task ends with no visual change beyond the safety timeout.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The transport failed to deliver the request or resolve a response.
	#[error("transport failure: {0}")]
	Transport(String),
	/// The peer replied with undecodable data.
	#[error("deserialization failed: {0}")]
	Deserialize(#[from] serde_json::Error),
}
