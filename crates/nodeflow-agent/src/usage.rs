use nodeflow_core::config::CreditsConfig;
use nodeflow_core::types::{ChatMessage, Pricing, ProviderResponse, UsageMetadata};

/// Characters per token for the approximation used when a provider
/// doesn't report usage.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Approximate token count for `chars` characters of text.
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Credits for a run under the default conversion rate.
pub fn credits(input_units: u64, output_units: u64, pricing: &Pricing) -> u64 {
    credits_with(input_units, output_units, pricing, &CreditsConfig::default())
}

/// Convert token counts to credits.
///
/// Cost in dollars is priced per million tokens, scaled by
/// `rates.credits_per_dollar` and rounded up. Never below `rates.minimum`.
pub fn credits_with(
    input_units: u64,
    output_units: u64,
    pricing: &Pricing,
    rates: &CreditsConfig,
) -> u64 {
    let dollars = input_units as f64 / 1_000_000.0 * pricing.input_cost_per_million
        + output_units as f64 / 1_000_000.0 * pricing.output_cost_per_million;
    let raw = (dollars * rates.credits_per_dollar).ceil();
    // NaN and negatives saturate to 0 and fall back to the floor
    let charged = if raw.is_finite() && raw > 0.0 { raw as u64 } else { 0 };
    charged.max(rates.minimum)
}

/// Running token totals for one run.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsageMeter {
    input_tokens: u64,
    output_tokens: u64,
    estimated: bool,
}

impl UsageMeter {
    /// Account for one provider call.
    ///
    /// Uses the reported counts when present, otherwise approximates from
    /// the transcript that was sent and the response that came back.
    pub fn record(&mut self, transcript: &[ChatMessage], response: &ProviderResponse) {
        match response.usage {
            Some(usage) => {
                self.input_tokens += usage.input_tokens;
                self.output_tokens += usage.output_tokens;
            }
            None => {
                let sent: usize = transcript.iter().map(ChatMessage::char_len).sum();
                self.input_tokens += estimate_tokens(sent);
                self.output_tokens += estimate_tokens(response.output_chars());
                self.estimated = true;
            }
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn metadata(&self) -> UsageMetadata {
        UsageMetadata {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            estimated: self.estimated,
        }
    }

    pub fn credits(&self, pricing: &Pricing, rates: &CreditsConfig) -> u64 {
        credits_with(self.input_tokens, self.output_tokens, pricing, rates)
    }
}
