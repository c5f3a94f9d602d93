//! Per-call strategies consulted by a provider

mod account_selection;
mod trigger;

pub use account_selection::AccountSelectionStrategy;
pub use trigger::TriggerStrategy;
