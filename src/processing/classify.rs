use crate::error::CoreResult;

/// Per-record text classifier such as a language or PII detector.
pub trait Classifier {
    fn classify(&self, text: &str) -> CoreResult<String>;
}

impl<F> Classifier for F
where
    F: Fn(&str) -> CoreResult<String>,
{
    fn classify(&self, text: &str) -> CoreResult<String> {
        self(text)
    }
}
