use std::sync::Arc;

use uuid::Uuid;

use super::Clock;
use crate::{
    database::{error::RepositoryError, queries::TokenRepository},
    models::ConsumeOutcome,
};

pub struct TokenConsumer {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
}

impl TokenConsumer {
    pub fn new(repo: Arc<dyn TokenRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Validates `token` and marks it consumed.
    ///
    /// Checks run in order and the first failing one decides the outcome:
    /// existence, prior consumption, expiry. The final write only matches rows
    /// that are still unconsumed, so of two concurrent callers at most one
    /// sees [`ConsumeOutcome::Success`]; the loser gets `AlreadyConsumed`.
    pub async fn consume(&self, token: &str) -> Result<ConsumeOutcome, RepositoryError> {
        if Uuid::try_parse(token).is_err() {
            tracing::debug!("Rejected malformed unlock token");
            return Ok(ConsumeOutcome::NotFound);
        }

        let Some(record) = self.repo.find_one_by(token).await? else {
            return Ok(ConsumeOutcome::NotFound);
        };

        if record.consumed {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }

        if record.is_expired(self.clock.now()) {
            return Ok(ConsumeOutcome::Expired);
        }

        let outcome = if self.repo.mark_consumed(token).await? {
            ConsumeOutcome::Success
        } else {
            ConsumeOutcome::AlreadyConsumed
        };
        tracing::info!(?outcome, "Unlock token confirmation");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::queries::SeaOrmStore,
        models::UnlockToken,
        test_utils::{memory_database, MemoryTokenStore},
        tokens::{ManualClock, TokenIssuer},
    };
    use chrono::{Duration, Utc};

    fn setup(store: Arc<dyn TokenRepository>, clock: Arc<ManualClock>) -> (TokenIssuer, TokenConsumer) {
        let issuer = TokenIssuer::new(
            Arc::clone(&store),
            clock.clone(),
            Duration::minutes(5),
            "http://localhost:8000",
        );
        (issuer, TokenConsumer::new(store, clock))
    }

    #[tokio::test]
    async fn valid_token_is_consumed_once() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, consumer) = setup(Arc::new(MemoryTokenStore::default()), clock);
        let issued = issuer.issue_token().await.unwrap();

        assert_eq!(consumer.consume(&issued.token).await.unwrap(), ConsumeOutcome::Success);
        assert_eq!(
            consumer.consume(&issued.token).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
    }

    #[tokio::test]
    async fn unknown_and_malformed_tokens_are_not_found() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (_, consumer) = setup(Arc::new(MemoryTokenStore::default()), clock);

        assert_eq!(consumer.consume("not-a-token").await.unwrap(), ConsumeOutcome::NotFound);
        assert_eq!(
            consumer.consume(&Uuid::new_v4().to_string()).await.unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn expired_token_is_never_consumed() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryTokenStore::default());
        let (issuer, consumer) = setup(store.clone(), clock.clone());
        let issued = issuer.issue_token().await.unwrap();

        clock.advance(Duration::minutes(5) + Duration::seconds(1));

        assert_eq!(consumer.consume(&issued.token).await.unwrap(), ConsumeOutcome::Expired);
        let record = store.find_one_by(&issued.token).await.unwrap().unwrap();
        assert!(!record.consumed);
    }

    #[tokio::test]
    async fn token_is_still_valid_at_the_expiry_instant() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, consumer) = setup(Arc::new(MemoryTokenStore::default()), clock.clone());
        let issued = issuer.issue_token().await.unwrap();

        clock.advance(Duration::minutes(5));

        assert_eq!(consumer.consume(&issued.token).await.unwrap(), ConsumeOutcome::Success);
    }

    #[tokio::test]
    async fn reuse_is_rejected_even_after_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, consumer) = setup(Arc::new(MemoryTokenStore::default()), clock.clone());
        let issued = issuer.issue_token().await.unwrap();

        consumer.consume(&issued.token).await.unwrap();
        clock.advance(Duration::hours(1));

        assert_eq!(
            consumer.consume(&issued.token).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
    }

    #[tokio::test]
    async fn concurrent_consumers_have_a_single_winner() {
        let db = memory_database().await.unwrap();
        let store: Arc<dyn TokenRepository> = Arc::new(SeaOrmStore::<UnlockToken>::new(db));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, consumer) = setup(store, clock);
        let consumer = Arc::new(consumer);
        let issued = issuer.issue_token().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let consumer = Arc::clone(&consumer);
            let token = issued.token.clone();
            handles.push(tokio::spawn(async move { consumer.consume(&token).await }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let winners = outcomes.iter().filter(|o| o.is_success()).count();
        assert_eq!(winners, 1);
        assert!(outcomes
            .iter()
            .filter(|o| !o.is_success())
            .all(|o| *o == ConsumeOutcome::AlreadyConsumed));
    }

    #[tokio::test]
    async fn lost_race_on_the_conditional_write_is_already_consumed() {
        // Reads never observe the flag, so the second caller passes every
        // check and only the predicate on the write stops it
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, consumer) = setup(Arc::new(MemoryTokenStore::with_stale_reads()), clock);
        let issued = issuer.issue_token().await.unwrap();

        assert_eq!(consumer.consume(&issued.token).await.unwrap(), ConsumeOutcome::Success);
        assert_eq!(
            consumer.consume(&issued.token).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
    }
}
