//! Settlement of match requests.
//!
//! Accepting a request is four writes against the store, applied in order:
//!
//! 1. the request moves `pending -> accepted` (guarded on `pending`),
//! 2. every other pending request on the same listing is rejected,
//! 3. a conversation between sender and recipient is opened,
//! 4. the listing is deleted, then any request filed meanwhile is rejected.
//!
//! The store offers no multi-statement transaction at this layer, so each
//! step is a conditional write that can be repeated. A failure after step 1
//! is reported as [`AppError::PartialApplication`]; accepting the same request
//! again resumes from step 2 and never duplicates the conversation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::db::{
    Conversation, ConversationRepository, ListingRepository, MatchRequest, RequestRepository,
    RequestStatus,
};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Accept,
    CascadeReject,
    OpenConversation,
    RetireListing,
    Reject,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Step::Accept => "accepting the request",
            Step::CascadeReject => "declining the other requests",
            Step::OpenConversation => "opening the conversation",
            Step::RetireListing => "removing the listing",
            Step::Reject => "declining the request",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Accepted,
    Rejected,
}

/// What a settle call did.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub request: MatchRequest,
    /// True when the request was already accepted and this call only
    /// re-applied the follow-up steps.
    pub resumed: bool,
    /// Steps this call executed, in order.
    pub steps: Vec<Step>,
    /// Competing requests declined by this call.
    pub cascade_rejected: Vec<MatchRequest>,
    pub conversation: Option<Conversation>,
    pub listing_removed: bool,
}

pub struct MatchWorkflow;

impl MatchWorkflow {
    pub async fn settle(
        pool: &Pool<Sqlite>,
        actor: &str,
        request_id: &str,
        outcome: Outcome,
    ) -> Result<Settlement, AppError> {
        match outcome {
            Outcome::Accepted => Self::accept(pool, actor, request_id).await,
            Outcome::Rejected => Self::reject(pool, actor, request_id).await,
        }
    }

    pub async fn accept(
        pool: &Pool<Sqlite>,
        actor: &str,
        request_id: &str,
    ) -> Result<Settlement, AppError> {
        let request = RequestRepository::get_required(pool, request_id).await?;
        Self::accept_loaded(pool, actor, request).await
    }

    /// Runs the accept transition from a request read by the caller. Two
    /// callers holding the same pending snapshot race on step 1; the loser
    /// gets a conflict.
    pub(crate) async fn accept_loaded(
        pool: &Pool<Sqlite>,
        actor: &str,
        mut request: MatchRequest,
    ) -> Result<Settlement, AppError> {
        authorize(actor, &request)?;

        let mut steps = Vec::with_capacity(4);
        let resumed = match request.status {
            RequestStatus::Pending => {
                if !RequestRepository::settle_if_pending(pool, &request.id, RequestStatus::Accepted).await? {
                    tracing::warn!(request_id = %request.id, "accept lost the race for a pending request");
                    return Err(AppError::already_processed());
                }
                steps.push(Step::Accept);
                request.status = RequestStatus::Accepted;
                false
            }
            RequestStatus::Accepted => {
                tracing::info!(request_id = %request.id, "request already accepted, resuming follow-up steps");
                true
            }
            RequestStatus::Rejected => return Err(AppError::already_processed()),
        };

        // Step 1 is durable from here on, whether done now or by an earlier call.
        let mut completed = vec![Step::Accept];

        let mut cascade_rejected =
            RequestRepository::reject_pending_for_listing(pool, &request.listing_id, Some(&request.id))
                .await
                .map_err(|e| partial(&completed, Step::CascadeReject, e))?;
        completed.push(Step::CascadeReject);
        steps.push(Step::CascadeReject);

        let conversation = ConversationRepository::ensure(
            pool,
            &request.sender_id,
            &request.recipient_id,
            &request.id,
        )
        .await
        .map_err(|e| partial(&completed, Step::OpenConversation, e))?;
        completed.push(Step::OpenConversation);
        steps.push(Step::OpenConversation);

        let removed = ListingRepository::delete(pool, &request.listing_id)
            .await
            .map_err(|e| partial(&completed, Step::RetireListing, e))?;
        // A submit that landed between the cascade and the delete is still
        // pending; with the listing gone no new one can arrive.
        let late = RequestRepository::reject_pending_for_listing(pool, &request.listing_id, Some(&request.id))
            .await
            .map_err(|e| partial(&completed, Step::RetireListing, e))?;
        if !late.is_empty() {
            tracing::debug!(request_id = %request.id, late = late.len(), "declined requests filed during acceptance");
        }
        cascade_rejected.extend(late);
        steps.push(Step::RetireListing);

        tracing::info!(
            request_id = %request.id,
            listing_id = %request.listing_id,
            conversation_id = %conversation.id,
            cascade_rejected = cascade_rejected.len(),
            resumed,
            "request accepted"
        );

        Ok(Settlement {
            request,
            resumed,
            steps,
            cascade_rejected,
            conversation: Some(conversation),
            listing_removed: removed > 0,
        })
    }

    /// Single guarded update; the listing stays open for other requesters.
    pub async fn reject(
        pool: &Pool<Sqlite>,
        actor: &str,
        request_id: &str,
    ) -> Result<Settlement, AppError> {
        let mut request = RequestRepository::get_required(pool, request_id).await?;
        authorize(actor, &request)?;

        if request.status.is_settled()
            || !RequestRepository::settle_if_pending(pool, &request.id, RequestStatus::Rejected).await?
        {
            return Err(AppError::already_processed());
        }
        request.status = RequestStatus::Rejected;

        tracing::info!(request_id = %request.id, "request declined");

        Ok(Settlement {
            request,
            resumed: false,
            steps: vec![Step::Reject],
            cascade_rejected: Vec::new(),
            conversation: None,
            listing_removed: false,
        })
    }
}

fn authorize(actor: &str, request: &MatchRequest) -> Result<(), AppError> {
    if actor != request.recipient_id {
        return Err(AppError::Authorization(
            "Only the listing owner can respond to this request".to_string(),
        ));
    }
    Ok(())
}

fn partial(completed: &[Step], failed: Step, source: AppError) -> AppError {
    tracing::warn!(?completed, ?failed, "acceptance stopped part way: {}", source);
    AppError::PartialApplication {
        completed: completed.to_vec(),
        failed,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        test_file_pool, test_identity, test_listing, test_orphaned_pending, test_pool, Listing,
    };

    struct Board {
        pool: Pool<Sqlite>,
        owner: String,
        bob: String,
        cy: String,
        listing: Listing,
        r1: MatchRequest,
        r2: MatchRequest,
    }

    async fn board() -> Board {
        let pool = test_pool().await;
        let owner = test_identity(&pool, "Ada").await;
        let bob = test_identity(&pool, "Bob").await;
        let cy = test_identity(&pool, "Cy").await;
        let listing = ListingRepository::create(&pool, &owner, test_listing("Guitar", "Rust"))
            .await
            .unwrap();
        let r1 = RequestRepository::submit(&pool, &listing.id, &bob, None, "Rust for guitar")
            .await
            .unwrap();
        let r2 = RequestRepository::submit(&pool, &listing.id, &cy, None, "Cooking for guitar")
            .await
            .unwrap();
        Board { pool, owner, bob, cy, listing, r1, r2 }
    }

    async fn status(pool: &Pool<Sqlite>, id: &str) -> RequestStatus {
        RequestRepository::get_required(pool, id).await.unwrap().status
    }

    async fn conversation_count(pool: &Pool<Sqlite>) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(pool)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn accepting_one_request_settles_the_listing() {
        let b = board().await;

        let settlement = MatchWorkflow::settle(&b.pool, &b.owner, &b.r1.id, Outcome::Accepted)
            .await
            .unwrap();
        assert!(!settlement.resumed);
        assert_eq!(
            settlement.steps,
            vec![Step::Accept, Step::CascadeReject, Step::OpenConversation, Step::RetireListing]
        );
        assert_eq!(settlement.cascade_rejected.len(), 1);
        assert!(settlement.listing_removed);

        assert_eq!(status(&b.pool, &b.r1.id).await, RequestStatus::Accepted);
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Rejected);
        assert!(ListingRepository::get(&b.pool, &b.listing.id).await.unwrap().is_none());

        let conversation = settlement.conversation.unwrap();
        assert_eq!(conversation.participant_a_id, b.bob);
        assert_eq!(conversation.participant_b_id, b.owner);
        assert_eq!(conversation.originating_request_id, b.r1.id);

        let err = MatchWorkflow::accept(&b.pool, &b.owner, &b.r2.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn accepting_again_is_a_quiet_resume() {
        let b = board().await;
        let first = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap();
        let again = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap();

        assert!(again.resumed);
        assert!(!again.listing_removed);
        assert!(again.cascade_rejected.is_empty());
        assert_eq!(again.conversation.unwrap().id, first.conversation.unwrap().id);
        assert_eq!(conversation_count(&b.pool).await, 1);
    }

    #[tokio::test]
    async fn concurrent_accepts_have_one_winner() {
        let b = board().await;
        let snapshot = RequestRepository::get_required(&b.pool, &b.r1.id).await.unwrap();

        let (left, right) = tokio::join!(
            MatchWorkflow::accept_loaded(&b.pool, &b.owner, snapshot.clone()),
            MatchWorkflow::accept_loaded(&b.pool, &b.owner, snapshot),
        );

        let outcomes = [left, right];
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(conversation_count(&b.pool).await, 1);
    }

    #[tokio::test]
    async fn only_the_recipient_can_settle() {
        let b = board().await;

        let err = MatchWorkflow::accept(&b.pool, &b.bob, &b.r1.id).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        let err = MatchWorkflow::reject(&b.pool, &b.cy, &b.r1.id).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        assert_eq!(status(&b.pool, &b.r1.id).await, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn missing_request_is_not_found() {
        let b = board().await;
        let err = MatchWorkflow::accept(&b.pool, &b.owner, "missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejection_leaves_listing_open() {
        let b = board().await;

        let settlement = MatchWorkflow::settle(&b.pool, &b.owner, &b.r1.id, Outcome::Rejected)
            .await
            .unwrap();
        assert_eq!(settlement.steps, vec![Step::Reject]);
        assert!(settlement.conversation.is_none());

        assert_eq!(status(&b.pool, &b.r1.id).await, RequestStatus::Rejected);
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Pending);
        assert!(ListingRepository::get(&b.pool, &b.listing.id).await.unwrap().is_some());
        assert_eq!(conversation_count(&b.pool).await, 0);

        // settled requests never move again
        let err = MatchWorkflow::reject(&b.pool, &b.owner, &b.r1.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(status(&b.pool, &b.r1.id).await, RequestStatus::Rejected);

        // the other request can still win
        MatchWorkflow::accept(&b.pool, &b.owner, &b.r2.id).await.unwrap();
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn accepted_request_cannot_be_rejected() {
        let b = board().await;
        MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap();

        let err = MatchWorkflow::reject(&b.pool, &b.owner, &b.r1.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(status(&b.pool, &b.r1.id).await, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn partial_acceptance_is_reported_and_resumable() {
        let b = board().await;

        sqlx::query(
            "CREATE TRIGGER block_conversations BEFORE INSERT ON conversations \
             BEGIN SELECT RAISE(ABORT, 'conversation store offline'); END",
        )
        .execute(&b.pool)
        .await
        .unwrap();

        let err = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap_err();
        match err {
            AppError::PartialApplication { completed, failed, .. } => {
                assert_eq!(completed, vec![Step::Accept, Step::CascadeReject]);
                assert_eq!(failed, Step::OpenConversation);
            }
            other => panic!("expected partial application, got {other:?}"),
        }

        // intermediate state: accepted, cascade applied, listing still present
        assert_eq!(status(&b.pool, &b.r1.id).await, RequestStatus::Accepted);
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Rejected);
        assert!(ListingRepository::get(&b.pool, &b.listing.id).await.unwrap().is_some());

        sqlx::query("DROP TRIGGER block_conversations")
            .execute(&b.pool)
            .await
            .unwrap();

        let resumed = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap();
        assert!(resumed.resumed);
        assert!(resumed.listing_removed);
        assert_eq!(conversation_count(&b.pool).await, 1);
        assert!(ListingRepository::get(&b.pool, &b.listing.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_after_interrupted_first_step() {
        let b = board().await;

        // caller went away right after step 1
        assert!(RequestRepository::settle_if_pending(&b.pool, &b.r1.id, RequestStatus::Accepted)
            .await
            .unwrap());
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Pending);

        let settlement = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap();
        assert!(settlement.resumed);
        assert_eq!(settlement.cascade_rejected.len(), 1);
        assert_eq!(status(&b.pool, &b.r2.id).await, RequestStatus::Rejected);
        assert!(ListingRepository::get(&b.pool, &b.listing.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn request_filed_before_the_listing_goes_is_declined() {
        let b = board().await;

        // stands in for a submit that lands after the cascade but before the delete
        sqlx::query(&format!(
            r#"
CREATE TRIGGER late_submit BEFORE DELETE ON listings
BEGIN
    INSERT INTO requests (
        id, listing_id, sender_id, recipient_id, sender_display_name, swap_conditions, status,
        listing_title, listing_skill_category, listing_experience_level, listing_description,
        listing_display_name, created_at
    )
    SELECT 'late', OLD.id, '{}', OLD.owner_id, 'Cy', 'me too', 'pending',
           OLD.title, OLD.skill_category, OLD.experience_level, OLD.description,
           OLD.display_name, 0;
END
            "#,
            b.cy
        ))
        .execute(&b.pool)
        .await
        .unwrap();

        let settlement = MatchWorkflow::accept(&b.pool, &b.owner, &b.r1.id).await.unwrap();

        assert_eq!(status(&b.pool, "late").await, RequestStatus::Rejected);
        assert!(settlement.cascade_rejected.iter().any(|r| r.id == "late"));
        assert_eq!(test_orphaned_pending(&b.pool).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submits_racing_acceptance_never_stay_pending() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_file_pool(dir.path()).await;
        let owner = test_identity(&pool, "Ada").await;
        let bob = test_identity(&pool, "Bob").await;
        let cy = test_identity(&pool, "Cy").await;

        for _ in 0..50 {
            let listing = ListingRepository::create(&pool, &owner, test_listing("Guitar", "Rust"))
                .await
                .unwrap();
            let r1 = RequestRepository::submit(&pool, &listing.id, &bob, None, "weekly")
                .await
                .unwrap();

            let accept = tokio::spawn({
                let (pool, owner) = (pool.clone(), owner.clone());
                async move { MatchWorkflow::accept(&pool, &owner, &r1.id).await }
            });
            let submit = tokio::spawn({
                let (pool, cy, listing_id) = (pool.clone(), cy.clone(), listing.id.clone());
                async move { RequestRepository::submit(&pool, &listing_id, &cy, None, "me too").await }
            });

            accept.await.unwrap().unwrap();
            match submit.await.unwrap() {
                Ok(_) | Err(AppError::NotFound(_)) => {}
                Err(e) => panic!("unexpected submit error: {e}"),
            }
        }

        assert_eq!(test_orphaned_pending(&pool).await, 0);
    }
}
