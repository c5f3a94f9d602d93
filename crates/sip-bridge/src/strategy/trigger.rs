use regex::Regex;
use sipfork_sip_core::CallView;
use tracing::debug;

use crate::config::TriggerConfig;
use crate::error::{Error, Result};
use crate::template::Template;

/// Decides whether a provider handles a call at all.
///
/// Evaluated for every provider on every call, so it must stay cheap and
/// must not touch any account.
#[derive(Debug, Clone)]
pub enum TriggerStrategy {
    Always,
    /// Full match of `pattern` against the rendered `source`
    MatchRegex { pattern: Regex, source: Template },
}

impl TriggerStrategy {
    pub fn from_config(config: &TriggerConfig) -> Result<Self> {
        match config {
            TriggerConfig::Always => Ok(TriggerStrategy::Always),
            TriggerConfig::MatchRegex { pattern, source } => {
                let anchored = format!("^(?:{})$", pattern);
                let pattern = Regex::new(&anchored)
                    .map_err(|e| Error::Configuration(format!("invalid trigger pattern '{}': {}", pattern, e)))?;
                Ok(TriggerStrategy::MatchRegex {
                    pattern,
                    source: Template::compile_call_only(source)?,
                })
            }
        }
    }

    pub fn should_handle_this_call(&self, call: &dyn CallView) -> bool {
        match self {
            TriggerStrategy::Always => true,
            TriggerStrategy::MatchRegex { pattern, source } => match source.render(call, None) {
                Ok(value) => pattern.is_match(&value),
                Err(e) => {
                    debug!("Trigger source '{}' not applicable to call {}: {}", source, call.call_id(), e);
                    false
                }
            },
        }
    }
}
