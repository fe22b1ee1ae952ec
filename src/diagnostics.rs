//! Process-wide diagnostic hook: a sink for protocol errors and listener
//! panics, fed by C1/C2 decode failures and C3's swallowed listener panics.
//!
//! Grounded on `socketio/engine/socket.py`'s `default_error_handler`, which
//! logs every protocol error with structured context (error kind, message,
//! namespace, ack id) before optionally emitting it to the client, rather
//! than only logging and dropping it. App code subscribes with
//! [`on_diagnostic`] the same way it would register any other event
//! listener.

use crate::messaging::dispatcher::EventDispatcher;
use once_cell::sync::OnceCell;

/// A single diagnostic occurrence: a decode failure, a transport error, or a
/// listener panic swallowed by [`crate::messaging::dispatcher::EventDispatcher::emit`].
#[derive(Debug, Clone)]
pub struct DiagnosticEvent {
    pub kind: &'static str,
    pub message: String,
    pub namespace: Option<String>,
    pub sid: Option<String>,
}

impl DiagnosticEvent {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            namespace: None,
            sid: None,
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

pub type DiagnosticDispatcher = EventDispatcher<&'static str, DiagnosticEvent>;

pub const EV_DIAGNOSTIC: &str = "diagnostic";

static DIAGNOSTICS: OnceCell<DiagnosticDispatcher> = OnceCell::new();

fn dispatcher() -> &'static DiagnosticDispatcher {
    DIAGNOSTICS.get_or_init(DiagnosticDispatcher::new)
}

/// Register a listener for every diagnostic event raised anywhere in the
/// process. Intended for operational logging/metrics, not protocol control
/// flow.
pub fn on_diagnostic(f: impl Fn(&DiagnosticEvent) + Send + Sync + 'static) {
    dispatcher().on(EV_DIAGNOSTIC, f);
}

/// Report a diagnostic occurrence. Always logs at `warn` in addition to
/// notifying subscribers, so diagnostics are visible even with no listener
/// registered.
pub fn report(event: DiagnosticEvent) {
    tracing::warn!(
        kind = event.kind,
        namespace = event.namespace.as_deref().unwrap_or(""),
        sid = event.sid.as_deref().unwrap_or(""),
        message = %event.message,
        "diagnostic"
    );
    dispatcher().emit(&EV_DIAGNOSTIC, &event);
}
