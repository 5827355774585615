//! Capability negotiation and dynamic registration for the evaluate
//! extension.
//!
//! The client advertises support under a namespaced experimental flag. A
//! server that wants the feature active returns registration options (a
//! document selector and optionally a static id); a server that stays
//! silent simply leaves the feature unregistered for the session, which is
//! not an error.

use std::collections::HashMap;

use ember_protocol::{
	EvaluateRegistrationOptions, EvaluateSelection, ExperimentalCapabilities,
	ExperimentalServerCapabilities,
};
use lsp_types::request::Request;
use lsp_types::{DocumentFilter, DocumentSelector, Uri};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// The experimental capability block advertised during initialization.
///
/// Built once with a static shape; serialized under
/// `ClientCapabilities.experimental`.
pub fn experimental_capabilities() -> Value {
	serde_json::to_value(ExperimentalCapabilities {
		evaluate_selection: true,
	})
	.expect("Failed to serialize")
}

/// Tracks where the evaluate feature is active.
///
/// Registrations are keyed by registration id so a later
/// `client/unregisterCapability` can retire exactly the grant it refers to.
#[derive(Default)]
pub struct EvaluateFeature {
	registrations: Mutex<HashMap<String, DocumentSelector>>,
}

impl std::fmt::Debug for EvaluateFeature {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EvaluateFeature")
			.field("registrations", &self.registrations.lock().len())
			.finish()
	}
}

impl EvaluateFeature {
	/// Creates an inactive feature.
	pub fn new() -> Self {
		Self::default()
	}

	/// Consumes the server's experimental capabilities after initialization.
	///
	/// Registers the feature when the server granted options, scoped to the
	/// returned selector or `default_selector`, under the server's static id
	/// or a freshly minted one. Returns the registration id, or `None` when
	/// the server declined.
	pub fn initialize(
		&self,
		server_experimental: Option<&Value>,
		default_selector: DocumentSelector,
	) -> Option<String> {
		let experimental = server_experimental?;
		let capabilities: ExperimentalServerCapabilities =
			serde_json::from_value(experimental.clone()).ok()?;
		let options = capabilities.evaluate_selection_provider?;

		let id = options
			.id
			.clone()
			.unwrap_or_else(|| Uuid::new_v4().to_string());
		let selector = options.document_selector.unwrap_or(default_selector);
		debug!(
			id,
			method = EvaluateSelection::METHOD,
			filters = selector.len(),
			"registering evaluate feature"
		);
		self.registrations.lock().insert(id.clone(), selector);
		Some(id)
	}

	/// Handles a dynamic `client/registerCapability` for this method.
	///
	/// Options without a document selector are ignored; there is nothing to
	/// scope the registration to.
	pub fn register(&self, id: String, options: EvaluateRegistrationOptions) {
		let Some(selector) = options.document_selector else {
			debug!(id, "evaluate registration without selector ignored");
			return;
		};
		self.registrations.lock().insert(id, selector);
	}

	/// Handles a dynamic `client/unregisterCapability`.
	pub fn unregister(&self, id: &str) {
		self.registrations.lock().remove(id);
	}

	/// Whether any active registration covers the given document.
	pub fn is_active(&self, language_id: &str, uri: &Uri) -> bool {
		self.registrations
			.lock()
			.values()
			.flatten()
			.any(|filter| filter_matches(filter, language_id, uri))
	}
}

/// Matches a document against one selector filter.
///
/// Language and scheme filters are honored; glob `pattern` filters never
/// match here since this subsystem only ever sees URIs, not paths. A filter
/// with no usable constraint matches nothing.
fn filter_matches(filter: &DocumentFilter, language_id: &str, uri: &Uri) -> bool {
	if filter.pattern.is_some() {
		return false;
	}
	if filter.language.is_none() && filter.scheme.is_none() {
		return false;
	}
	if let Some(language) = &filter.language
		&& language != language_id
	{
		return false;
	}
	if let Some(scheme) = &filter.scheme
		&& uri_scheme(uri) != Some(scheme.as_str())
	{
		return false;
	}
	true
}

/// Scheme component of a URI.
fn uri_scheme(uri: &Uri) -> Option<&str> {
	uri.as_str().split_once(':').map(|(scheme, _)| scheme)
}
