//! Provider stream normalization.
//!
//! One entry point — [`handle`] — translates a single raw provider event
//! into zero or more canonical [`ActivityEvent`]s, with all per-family
//! substate held in the [`ActivitySession`]. There is no inter-session
//! coupling and no suspension inside the per-event critical section:
//! every function here is synchronous.

mod anthropic;
mod bedrock;
mod deepseek;
mod gemini;
mod openai;

use ah_activity::ActivitySession;
use ah_domain::capability::ProviderFamily;
use ah_domain::error::Result;
use ah_domain::event::{ActivityEvent, TokenTally};
use serde_json::Value;

/// Translate one raw provider event for `family` into canonical events.
///
/// The session is taken by exclusive borrow for the duration of the call;
/// ordering within the session is exactly the order of `handle` calls.
pub fn handle(
    family: ProviderFamily,
    raw: &Value,
    session: &mut ActivitySession,
) -> Result<Vec<ActivityEvent>> {
    match family {
        ProviderFamily::Anthropic => anthropic::handle(raw, session),
        ProviderFamily::OpenAi => openai::handle(raw, session),
        ProviderFamily::Gemini => gemini::handle(raw, session),
        ProviderFamily::DeepSeek => deepseek::handle(raw, session),
        ProviderFamily::Bedrock => bedrock::handle(raw, session),
    }
}

/// Read a `u64` token count from a JSON object field.
pub(crate) fn count(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(|n| n.as_u64()).unwrap_or(0)
}

/// Build a tally from explicit counts, deriving `total` when absent.
pub(crate) fn tally(input: u64, output: u64, reasoning: u64) -> TokenTally {
    TokenTally {
        input,
        output,
        reasoning,
        total: input + output + reasoning,
    }
}
