use crate::app::AppState;
use crate::catalog::ProviderMapping;
use crate::conversations::NewConversation;
use crate::usage::UsageTally;

/// Credit cost of one request, from the *observed* token counts and the
/// mapping's per-token rates.
pub fn compute_cost(input_tokens: u64, output_tokens: u64, mapping: &ProviderMapping) -> f64 {
    (input_tokens as f64 * mapping.input_token_cost
        + output_tokens as f64 * mapping.output_token_cost)
        / 10.0
}

/// Everything the committer needs once a completion has fully resolved.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub account_id: String,
    pub api_key_id: String,
    pub mapping: ProviderMapping,
    pub input: String,
    pub tally: UsageTally,
}

/// Runs once per fully resolved completion: append the conversation record,
/// debit the account, bump the key's consumed counter. The three writes are
/// independent; a failed write is logged and counted, never retried, and
/// never unwinds the response already delivered to the caller.
pub async fn commit_usage(state: &AppState, request: CommitRequest) {
    let cost = compute_cost(
        request.tally.input_tokens,
        request.tally.output_tokens,
        &request.mapping,
    );

    if let Err(err) = state
        .conversations
        .append(NewConversation {
            account_id: request.account_id.clone(),
            api_key_id: request.api_key_id.clone(),
            provider_mapping_id: request.mapping.id.clone(),
            input: request.input,
            output: request.tally.output_text.clone(),
            input_token_count: request.tally.input_tokens,
            output_token_count: request.tally.output_tokens,
        })
        .await
    {
        metrics::counter!("tollgate_billing_commit_failures_total", "step" => "conversation")
            .increment(1);
        tracing::warn!(account_id = %request.account_id, "conversation append failed: {err}");
    }

    if let Err(err) = state.accounts.debit_credits(&request.account_id, cost).await {
        metrics::counter!("tollgate_billing_commit_failures_total", "step" => "debit")
            .increment(1);
        tracing::warn!(
            account_id = %request.account_id,
            cost,
            "credit debit failed: {}",
            err.message
        );
    }

    if let Err(err) = state
        .accounts
        .increment_consumed(&request.api_key_id, cost)
        .await
    {
        metrics::counter!("tollgate_billing_commit_failures_total", "step" => "key_counter")
            .increment(1);
        tracing::warn!(api_key_id = %request.api_key_id, "key usage counter update failed: {err}");
    }

    tracing::debug!(
        account_id = %request.account_id,
        input_tokens = request.tally.input_tokens,
        output_tokens = request.tally.output_tokens,
        cost,
        "billing committed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(input_cost: f64, output_cost: f64) -> ProviderMapping {
        ProviderMapping {
            id: "map".to_string(),
            model_id: "model".to_string(),
            provider_name: "OpenAI".to_string(),
            input_token_cost: input_cost,
            output_token_cost: output_cost,
        }
    }

    #[test]
    fn cost_formula_divides_by_ten() {
        let m = mapping(2.0, 3.0);
        // (10*2 + 4*3) / 10
        assert_eq!(compute_cost(10, 4, &m), 3.2);
    }

    #[test]
    fn zero_usage_costs_nothing() {
        let m = mapping(5.0, 7.0);
        assert_eq!(compute_cost(0, 0, &m), 0.0);
    }
}
