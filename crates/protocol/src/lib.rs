//! Wire contract for the `textDocument/evaluateSelection` protocol extension.
//!
//! The extension is a single request/response pair layered on the standard
//! document-oriented LSP machinery: the client ships the literal source text
//! of a span to the server and receives exactly one of three outcomes back
//! (a result value, a compile error, or a runtime error). Position
//! resolution never crosses the wire; the server only ever sees raw text.
//!
//! This crate also defines the capability types exchanged during
//! initialization: the client-side experimental flag advertising support,
//! and the registration options a server may return to activate the feature
//! for a document selector.

use lsp_types::request::Request;
use lsp_types::{DocumentSelector, TextDocumentIdentifier};
use serde::{Deserialize, Serialize};

/// The `textDocument/evaluateSelection` request.
///
/// Sent from client to server with the literal source text of the span the
/// user asked to evaluate.
#[derive(Debug)]
pub enum EvaluateSelection {}

impl Request for EvaluateSelection {
	type Params = EvaluateParams;
	type Result = EvaluateResponse;
	const METHOD: &'static str = "textDocument/evaluateSelection";
}

/// Parameters for [`EvaluateSelection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
	/// The document the evaluated text was taken from.
	pub text_document: TextDocumentIdentifier,
	/// The exact characters covered by the evaluated span.
	pub source_code: String,
}

/// Response for [`EvaluateSelection`].
///
/// Exactly one field is populated in a well-formed response. Zero or more
/// than one populated field is a protocol violation; [`Self::into_outcome`]
/// classifies such responses as unknown rather than guessing a priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
	/// The evaluation failed to compile.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub compile_error: Option<String>,
	/// The evaluation succeeded; the rendered result value.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<String>,
	/// The evaluation compiled but failed at runtime.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl EvaluateResponse {
	/// Classifies the response into its single populated outcome.
	///
	/// Returns `None` when the exactly-one-field invariant is violated.
	pub fn into_outcome(self) -> Option<EvaluateOutcome> {
		match (self.result, self.compile_error, self.error) {
			(Some(value), None, None) => Some(EvaluateOutcome::Value(value)),
			(None, Some(message), None) => Some(EvaluateOutcome::CompileError(message)),
			(None, None, Some(message)) => Some(EvaluateOutcome::RuntimeError(message)),
			_ => None,
		}
	}
}

/// A classified, well-formed evaluation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluateOutcome {
	/// The evaluation produced a value.
	Value(String),
	/// The source failed to compile.
	CompileError(String),
	/// The evaluation failed at runtime.
	RuntimeError(String),
}

impl EvaluateOutcome {
	/// The message or value text carried by the outcome.
	pub fn text(&self) -> &str {
		match self {
			Self::Value(text) | Self::CompileError(text) | Self::RuntimeError(text) => text,
		}
	}

	/// Whether the outcome should render as an error.
	///
	/// Compile and runtime errors are indistinguishable to the renderer;
	/// only the message differs.
	pub fn is_error(&self) -> bool {
		!matches!(self, Self::Value(_))
	}

	/// Consumes the outcome into `(text, is_error)`.
	pub fn into_parts(self) -> (String, bool) {
		let is_error = self.is_error();
		let text = match self {
			Self::Value(text) | Self::CompileError(text) | Self::RuntimeError(text) => text,
		};
		(text, is_error)
	}
}

/// Client-side experimental capability advertising the extension.
///
/// Serialized under `ClientCapabilities.experimental` during initialization.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalCapabilities {
	/// The client understands `textDocument/evaluateSelection`.
	pub evaluate_selection: bool,
}

/// Server-side experimental capabilities relevant to this extension.
///
/// Parsed out of `ServerCapabilities.experimental` after initialization. A
/// missing provider means the server declined the feature for this session,
/// which is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalServerCapabilities {
	/// Registration options granted by the server, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub evaluate_selection_provider: Option<EvaluateRegistrationOptions>,
}

/// Registration options returned by a server that grants the feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRegistrationOptions {
	/// Documents the feature is active for. `None` defers to the client's
	/// default selector.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub document_selector: Option<DocumentSelector>,
	/// Static registration id. `None` asks the client to mint one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
}
