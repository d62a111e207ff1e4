use crate::error::EmbeddingError;
use std::borrow::Cow;
use std::path::Path;
use tokenizers::Tokenizer;

pub const MAX_EMBEDDING_TOKENS: usize = 256;

/// Cuts text down to a token budget before it reaches an embedding model.
///
/// The kept text is always a prefix of the input ending at the last kept
/// token, so truncating an already-truncated text is a no-op.
pub struct TokenTruncator {
    tokenizer: Option<Tokenizer>,
    max_tokens: usize,
}

impl TokenTruncator {
    pub fn whitespace(max_tokens: usize) -> Self {
        Self {
            tokenizer: None,
            max_tokens,
        }
    }

    pub fn from_tokenizer(
        mut tokenizer: Tokenizer,
        max_tokens: usize,
    ) -> Result<Self, EmbeddingError> {
        // The model's own truncation would hide the real token count.
        tokenizer
            .with_truncation(None)
            .map_err(|error| EmbeddingError::Tokenizer(error.to_string()))?;
        tokenizer.with_padding(None);
        Ok(Self {
            tokenizer: Some(tokenizer),
            max_tokens,
        })
    }

    pub fn from_file(path: &Path, max_tokens: usize) -> Result<Self, EmbeddingError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|error| EmbeddingError::Tokenizer(format!("{}: {error}", path.display())))?;
        Self::from_tokenizer(tokenizer, max_tokens)
    }

    pub fn from_bytes(bytes: &[u8], max_tokens: usize) -> Result<Self, EmbeddingError> {
        let tokenizer = Tokenizer::from_bytes(bytes)
            .map_err(|error| EmbeddingError::Tokenizer(error.to_string()))?;
        Self::from_tokenizer(tokenizer, max_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        Ok(self.token_ends(text)?.len())
    }

    pub fn truncate<'a>(&self, text: &'a str) -> Result<Cow<'a, str>, EmbeddingError> {
        let ends = self.token_ends(text)?;
        if ends.len() <= self.max_tokens {
            return Ok(Cow::Borrowed(text));
        }

        let cut = match self.max_tokens.checked_sub(1) {
            Some(last) => ends[last],
            None => 0,
        };
        Ok(Cow::Owned(text.get(..cut).unwrap_or(text).to_string()))
    }

    fn token_ends(&self, text: &str) -> Result<Vec<usize>, EmbeddingError> {
        match &self.tokenizer {
            Some(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, false)
                    .map_err(|error| EmbeddingError::Tokenizer(error.to_string()))?;
                Ok(encoding.get_offsets().iter().map(|(_, end)| *end).collect())
            }
            None => Ok(whitespace_token_ends(text)),
        }
    }
}

fn whitespace_token_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_token = false;
    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_token {
                ends.push(offset);
            }
            in_token = false;
        } else {
            in_token = true;
        }
    }
    if in_token {
        ends.push(text.len());
    }
    ends
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        (0..count)
            .map(|index| format!("t{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn text_within_budget_is_borrowed_unchanged() {
        let truncator = TokenTruncator::whitespace(MAX_EMBEDDING_TOKENS);
        let text = words(256);
        let result = truncator.truncate(&text).expect("whitespace tokenizing never fails");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, text);
    }

    #[test]
    fn long_text_keeps_first_tokens_only() {
        let truncator = TokenTruncator::whitespace(MAX_EMBEDDING_TOKENS);
        let text = words(400);
        let truncated = truncator.truncate(&text).expect("whitespace tokenizing never fails");

        assert_eq!(truncated, words(256));
        assert_eq!(truncator.count_tokens(&truncated).ok(), Some(256));
    }

    #[test]
    fn truncation_is_idempotent() {
        let truncator = TokenTruncator::whitespace(8);
        let text = "  one two\tthree\nfour five six seven eight nine ten ";
        let once = truncator.truncate(text).expect("truncates").into_owned();
        let twice = truncator.truncate(&once).expect("truncates").into_owned();
        assert_eq!(once, "  one two\tthree\nfour five six seven eight");
        assert_eq!(once, twice);
    }

    #[test]
    fn token_ends_track_multibyte_words() {
        assert_eq!(whitespace_token_ends("ab  çd e"), vec![2, 7, 9]);
        assert!(whitespace_token_ends("   ").is_empty());
    }

    #[test]
    fn zero_budget_keeps_nothing() {
        let truncator = TokenTruncator::whitespace(0);
        assert_eq!(truncator.truncate("a b").expect("truncates"), "");
    }

    const WORD_LEVEL_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "alpha": 1, "beta": 2, "gamma": 3, "delta": 4 },
            "unk_token": "[UNK]"
        }
    }"#;

    fn word_level(max_tokens: usize) -> TokenTruncator {
        TokenTruncator::from_bytes(WORD_LEVEL_TOKENIZER.as_bytes(), max_tokens)
            .expect("tokenizer json loads")
    }

    #[test]
    fn tokenizer_budget_cuts_at_last_kept_token() {
        let truncator = word_level(3);
        let text = "alpha beta, gamma delta alpha";

        assert_eq!(truncator.count_tokens(text).expect("counts"), 6);
        let truncated = truncator.truncate(text).expect("truncates");
        assert_eq!(truncated, "alpha beta,");
        assert_eq!(truncator.count_tokens(&truncated).expect("counts"), 3);
    }

    #[test]
    fn tokenizer_text_within_budget_is_borrowed() {
        let truncator = word_level(3);
        let result = truncator.truncate("gamma delta").expect("truncates");
        assert!(matches!(result, Cow::Borrowed("gamma delta")));
    }

    #[test]
    fn tokenizer_truncation_is_idempotent() {
        let truncator = word_level(4);
        let once = truncator
            .truncate("delta  gamma beta alpha beta gamma")
            .expect("truncates")
            .into_owned();
        let twice = truncator.truncate(&once).expect("truncates");

        assert_eq!(once, "delta  gamma beta alpha");
        assert!(matches!(twice, Cow::Borrowed(_)));
        assert_eq!(twice, once);
    }

    #[test]
    fn malformed_tokenizer_json_is_a_tokenizer_error() {
        let result = TokenTruncator::from_bytes(b"{ not json", MAX_EMBEDDING_TOKENS);
        assert!(matches!(result, Err(EmbeddingError::Tokenizer(_))));
    }
}
