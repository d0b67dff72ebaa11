//! Per-document token/page accumulator.
//!
//! Every non-cached LLM call reports its usage here; the delta is priced
//! from the static schedule and folded into the document's `llm_billing`
//! JSON by the persistence facade.

use std::sync::Arc;

use tracing::debug;

use crate::llm::LlmResponse;
use crate::models::{price_for, BillingDelta};
use crate::persistence::{PersistenceError, PersistenceFacade};

pub struct Billing {
    db: Arc<dyn PersistenceFacade>,
}

impl Billing {
    pub fn new(db: Arc<dyn PersistenceFacade>) -> Self {
        Self { db }
    }

    /// Price a usage sample into a billing delta.
    pub fn delta_for(model: &str, prompt_tokens: u64, completion_tokens: u64, pages: u64) -> BillingDelta {
        BillingDelta {
            prompt_tokens,
            completion_tokens,
            pages,
            cost: price_for(model).cost(prompt_tokens, completion_tokens, pages),
        }
    }

    /// Record the usage of one gateway response. Cached responses cost
    /// nothing and are skipped.
    pub async fn record_response(
        &self,
        document_id: &str,
        response: &LlmResponse,
    ) -> Result<(), PersistenceError> {
        if response.cached {
            return Ok(());
        }
        let Some(usage) = &response.usage else {
            return Ok(());
        };
        let delta = Self::delta_for(
            &response.model,
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.pages.unwrap_or(0),
        );
        debug!(
            "Billing {}: {}+{} tokens, {} page(s), ${:.6}",
            document_id, delta.prompt_tokens, delta.completion_tokens, delta.pages, delta.cost
        );
        self.db.increment_llm_billing(document_id, &delta).await?;
        Ok(())
    }
}
