use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Structured context for a unit of work (a call, a fork, a pool load).
///
/// The component and operation become span fields; everything else is
/// rendered into a single `ctx` field so that arbitrary keys such as
/// `call_id` or `fork_uuid` can be attached without a fixed span layout.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub component: String,
    pub operation: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            operation: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_operation<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        LogContext {
            component: component.into(),
            operation: Some(operation.into()),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    fn rendered_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Create a span carrying this context.
    pub fn span(&self, level: Level) -> Span {
        let op = self.operation.as_deref().unwrap_or("-");
        let ctx = self.rendered_fields();
        // span macros need a constant level
        match level {
            Level::TRACE => tracing::trace_span!("sipfork", component = %self.component, operation = %op, ctx = %ctx),
            Level::DEBUG => tracing::debug_span!("sipfork", component = %self.component, operation = %op, ctx = %ctx),
            Level::INFO => tracing::info_span!("sipfork", component = %self.component, operation = %op, ctx = %ctx),
            Level::WARN => tracing::warn_span!("sipfork", component = %self.component, operation = %op, ctx = %ctx),
            _ => tracing::error_span!("sipfork", component = %self.component, operation = %op, ctx = %ctx),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;
        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }
        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_orders_fields() {
        let ctx = LogContext::with_operation("sip-bridge", "on_call_create")
            .with_field("provider", "Outbound")
            .with_field("call_id", "abc");
        assert_eq!(ctx.to_string(), "[sip-bridge][on_call_create][call_id=abc][provider=Outbound]");
    }
}
