//! Static provider/model cost schedule.
//!
//! Prices are per million tokens (prompt/completion) and per thousand
//! pages for the OCR endpoint. Unknown models bill at zero so a model
//! rename never blocks processing.

/// Cost schedule entry for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    /// USD per 1M prompt tokens.
    pub prompt_per_million: f64,
    /// USD per 1M completion tokens.
    pub completion_per_million: f64,
    /// USD per 1000 processed pages.
    pub per_thousand_pages: f64,
}

const FREE: ModelPrice = ModelPrice {
    prompt_per_million: 0.0,
    completion_per_million: 0.0,
    per_thousand_pages: 0.0,
};

/// Look up the price entry for a model. Matching is by prefix so dated
/// model aliases (`mistral-small-2409`) resolve to their family.
pub fn price_for(model: &str) -> ModelPrice {
    static TABLE: &[(&str, ModelPrice)] = &[
        (
            "mistral-ocr",
            ModelPrice {
                prompt_per_million: 0.0,
                completion_per_million: 0.0,
                per_thousand_pages: 1.0,
            },
        ),
        (
            "mistral-large",
            ModelPrice {
                prompt_per_million: 2.0,
                completion_per_million: 6.0,
                per_thousand_pages: 0.0,
            },
        ),
        (
            "mistral-small",
            ModelPrice {
                prompt_per_million: 0.1,
                completion_per_million: 0.3,
                per_thousand_pages: 0.0,
            },
        ),
        (
            "pixtral-large",
            ModelPrice {
                prompt_per_million: 2.0,
                completion_per_million: 6.0,
                per_thousand_pages: 0.0,
            },
        ),
        (
            "pixtral-12b",
            ModelPrice {
                prompt_per_million: 0.15,
                completion_per_million: 0.15,
                per_thousand_pages: 0.0,
            },
        ),
        (
            "ministral",
            ModelPrice {
                prompt_per_million: 0.1,
                completion_per_million: 0.1,
                per_thousand_pages: 0.0,
            },
        ),
    ];

    TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, price)| *price)
        .unwrap_or(FREE)
}

impl ModelPrice {
    /// Total cost for a usage sample.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64, pages: u64) -> f64 {
        prompt_tokens as f64 * self.prompt_per_million / 1_000_000.0
            + completion_tokens as f64 * self.completion_per_million / 1_000_000.0
            + pages as f64 * self.per_thousand_pages / 1_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match() {
        let p = price_for("mistral-small-2409");
        assert!(p.prompt_per_million > 0.0);
        assert_eq!(p.per_thousand_pages, 0.0);
    }

    #[test]
    fn test_ocr_priced_per_page() {
        let p = price_for("mistral-ocr-latest");
        assert_eq!(p.cost(0, 0, 500), 0.5);
    }

    #[test]
    fn test_unknown_model_is_free() {
        let p = price_for("some-local-model");
        assert_eq!(p.cost(1_000_000, 1_000_000, 10), 0.0);
    }
}
