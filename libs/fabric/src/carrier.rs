//! Distributed tracing propagation through message headers.
//!
//! Trace context entries live under the `tracing-` prefix so they never
//! collide with application headers. The W3C trace context propagator
//! injects and extracts through [`HeaderInjector`] / [`HeaderExtractor`];
//! nothing else in the stack needs tracing-specific knowledge.

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;

use crate::message::{Headers, Message};

pub const TRACING_PREFIX: &str = "tracing-";

/// Write side of the carrier
pub struct HeaderInjector<'a>(pub &'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(format!("{TRACING_PREFIX}{key}"), value);
    }
}

/// Read side of the carrier
pub struct HeaderExtractor<'a>(pub &'a Headers);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&format!("{TRACING_PREFIX}{key}"))
    }

    /// Keys under the tracing prefix, with the prefix stripped
    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|key| key.strip_prefix(TRACING_PREFIX))
            .collect()
    }
}

/// Inject `cx` into the message's headers
pub fn inject(cx: &opentelemetry::Context, message: &mut Message) {
    TraceContextPropagator::new().inject_context(cx, &mut HeaderInjector(&mut message.headers));
}

/// Extract the remote trace context from the message's headers
pub fn extract(message: &Message) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(&message.headers))
}
