//! Reply producers
//!
//! The session treats reply generation as an opaque async call. Two
//! producers ship with the crate: keyword-matched somatic replies that work
//! offline, and a thin HTTP client for an external reply service.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ReplyError;

/// Produces the assistant's reply to a user prompt
#[async_trait]
pub trait ReplyProducer: Send + Sync {
    /// Generate a reply
    ///
    /// # Errors
    ///
    /// Returns error if no reply could be produced
    async fn produce_reply(&self, prompt: &str) -> Result<String, ReplyError>;
}

/// Default pause before a keyword reply, so replies don't feel instant
const DEFAULT_THINK_DELAY: Duration = Duration::from_millis(700);

/// Keyword table: any listed word in the prompt selects the reply
const KEYWORD_REPLIES: &[(&[&str], &str)] = &[
    (
        &["tight", "chest"],
        "I hear the tightness. Place a hand there. Soften your shoulders a millimeter and notice what shifts.",
    ),
    (
        &["anxious"],
        "Press your feet into the floor gently. You're here. That extra electricity just needs ground.",
    ),
    (
        &["relax"],
        "Try this: tense everything for 3 seconds... then release. Teach your body the difference.",
    ),
    (
        &["safe"],
        "Name five things you can see, four you can touch, three you hear, two you smell, one you taste.",
    ),
];

const FALLBACK_REPLY: &str =
    "Where is this most alive in your body? Sharp or dull, moving or still, hot or cold?";

/// Offline replies matched on keywords in the prompt
#[derive(Debug, Clone)]
pub struct KeywordReplies {
    think_delay: Duration,
}

impl Default for KeywordReplies {
    fn default() -> Self {
        Self {
            think_delay: DEFAULT_THINK_DELAY,
        }
    }
}

impl KeywordReplies {
    #[must_use]
    pub const fn with_think_delay(think_delay: Duration) -> Self {
        Self { think_delay }
    }

    /// Pick the reply for a prompt without waiting
    #[must_use]
    pub fn reply_for(prompt: &str) -> &'static str {
        let prompt = prompt.to_lowercase();
        KEYWORD_REPLIES
            .iter()
            .find(|(words, _)| words.iter().any(|w| prompt.contains(w)))
            .map_or(FALLBACK_REPLY, |(_, reply)| reply)
    }
}

#[async_trait]
impl ReplyProducer for KeywordReplies {
    async fn produce_reply(&self, prompt: &str) -> Result<String, ReplyError> {
        if !self.think_delay.is_zero() {
            tokio::time::sleep(self.think_delay).await;
        }
        Ok(Self::reply_for(prompt).to_string())
    }
}

/// Client for a reply service: `POST { prompt }` answers `{ reply }`
pub struct HttpReplyProducer {
    client: reqwest::Client,
    url: String,
}

impl HttpReplyProducer {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReplyProducer for HttpReplyProducer {
    async fn produce_reply(&self, prompt: &str) -> Result<String, ReplyError> {
        #[derive(serde::Serialize)]
        struct ReplyRequest<'a> {
            prompt: &'a str,
        }

        #[derive(serde::Deserialize)]
        struct ReplyResponse {
            reply: String,
        }

        let response = self
            .client
            .post(&self.url)
            .json(&ReplyRequest { prompt })
            .send()
            .await
            .map_err(|e| ReplyError::ProducerFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReplyError::ProducerFailed(format!("reply service error {status}: {body}")));
        }

        let body: ReplyResponse = response
            .json()
            .await
            .map_err(|e| ReplyError::ProducerFailed(e.to_string()))?;

        let reply = body.reply.trim();
        if reply.is_empty() {
            return Err(ReplyError::ProducerFailed("empty reply".to_string()));
        }
        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        assert!(KeywordReplies::reply_for("My CHEST feels heavy").starts_with("I hear the tightness"));
        assert!(KeywordReplies::reply_for("I'm anxious").starts_with("Press your feet"));
        assert!(KeywordReplies::reply_for("help me relax").starts_with("Try this"));
        assert!(KeywordReplies::reply_for("I want to feel safe").starts_with("Name five things"));
    }

    #[test]
    fn test_first_match_wins() {
        assert!(KeywordReplies::reply_for("tight and anxious").starts_with("I hear the tightness"));
    }

    #[test]
    fn test_fallback_reply() {
        assert_eq!(KeywordReplies::reply_for("hello"), FALLBACK_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_produce_reply_waits_think_delay() {
        let producer = KeywordReplies::default();
        let started = tokio::time::Instant::now();
        let reply = producer.produce_reply("so anxious").await.unwrap();
        assert!(started.elapsed() >= DEFAULT_THINK_DELAY);
        assert!(reply.starts_with("Press your feet"));
    }
}
