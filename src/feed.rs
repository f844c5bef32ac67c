//! In-process change feed.
//!
//! Every committed mutation is published as a [`ChangeEvent`]. Events only
//! say that a row changed; subscribers re-read the affected view rather than
//! apply the event as a delta, since a multi-step acceptance can be observed
//! half way.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::db::{Conversation, MatchRequest, Message};
use crate::workflow::{Settlement, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Listings,
    Requests,
    Conversations,
    Messages,
    Profiles,
    SkillMedia,
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listings" => Ok(Table::Listings),
            "requests" => Ok(Table::Requests),
            "conversations" => Ok(Table::Conversations),
            "messages" => Ok(Table::Messages),
            "profiles" => Ok(Table::Profiles),
            "skill_media" => Ok(Table::SkillMedia),
            other => Err(format!("unknown table {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row_id: String,
    /// Identities allowed to see the row; empty means everyone.
    pub audience: Vec<String>,
}

impl ChangeEvent {
    pub fn public(table: Table, kind: ChangeKind, row_id: impl Into<String>) -> Self {
        Self {
            table,
            kind,
            row_id: row_id.into(),
            audience: Vec::new(),
        }
    }

    pub fn for_request(kind: ChangeKind, request: &MatchRequest) -> Self {
        Self {
            table: Table::Requests,
            kind,
            row_id: request.id.clone(),
            audience: vec![request.sender_id.clone(), request.recipient_id.clone()],
        }
    }

    pub fn for_conversation(kind: ChangeKind, conversation: &Conversation) -> Self {
        Self {
            table: Table::Conversations,
            kind,
            row_id: conversation.id.clone(),
            audience: conversation.participants().iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn for_message(conversation: &Conversation, message: &Message) -> Self {
        Self {
            table: Table::Messages,
            kind: ChangeKind::Insert,
            row_id: message.id.clone(),
            audience: conversation.participants().iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn visible_to(&self, identity: &str) -> bool {
        self.audience.is_empty() || self.audience.iter().any(|a| a == identity)
    }
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone)]
pub struct FeedFilter {
    pub identity: String,
    pub table: Option<Table>,
}

impl FeedFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.table.map_or(true, |t| t == event.table) && event.visible_to(&self.identity)
    }
}

/// Item yielded to a filtered subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The subscriber fell behind and missed this many events; it should
    /// re-read everything it displays.
    Lagged(u64),
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::trace!(table = ?event.table, kind = ?event.kind, row_id = %event.row_id, "change published");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe_filtered(&self, filter: FeedFilter) -> impl Stream<Item = FeedItem> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |result| match result {
            Ok(event) if filter.matches(&event) => Some(FeedItem::Change(event)),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => Some(FeedItem::Lagged(missed)),
        })
    }
}

/// Change events for the steps a settle call applied.
pub fn settlement_events(settlement: &Settlement) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for step in &settlement.steps {
        match step {
            Step::Accept | Step::Reject => {
                events.push(ChangeEvent::for_request(ChangeKind::Update, &settlement.request));
            }
            Step::CascadeReject => {
                events.extend(
                    settlement
                        .cascade_rejected
                        .iter()
                        .map(|r| ChangeEvent::for_request(ChangeKind::Update, r)),
                );
            }
            Step::OpenConversation => {
                if let Some(conversation) = &settlement.conversation {
                    events.push(ChangeEvent::for_conversation(ChangeKind::Insert, conversation));
                }
            }
            Step::RetireListing => {
                if settlement.listing_removed {
                    events.push(ChangeEvent::public(
                        Table::Listings,
                        ChangeKind::Delete,
                        settlement.request.listing_id.clone(),
                    ));
                }
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RequestStatus;

    fn request(id: &str, sender: &str) -> MatchRequest {
        MatchRequest {
            id: id.into(),
            listing_id: "l1".into(),
            sender_id: sender.into(),
            recipient_id: "owner".into(),
            sender_display_name: sender.into(),
            swap_conditions: "x".into(),
            status: RequestStatus::Accepted,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn filtered_subscription_sees_only_its_rows() {
        let feed = ChangeFeed::new(16);
        let mut stream = Box::pin(feed.subscribe_filtered(FeedFilter {
            identity: "bob".into(),
            table: Some(Table::Requests),
        }));

        feed.publish(ChangeEvent::for_request(ChangeKind::Insert, &request("r1", "cy")));
        feed.publish(ChangeEvent::public(Table::Listings, ChangeKind::Insert, "l2"));
        feed.publish(ChangeEvent::for_request(ChangeKind::Update, &request("r2", "bob")));

        match stream.next().await {
            Some(FeedItem::Change(event)) => assert_eq!(event.row_id, "r2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let feed = ChangeFeed::new(2);
        let mut stream = Box::pin(feed.subscribe_filtered(FeedFilter {
            identity: "bob".into(),
            table: None,
        }));

        for i in 0..5 {
            feed.publish(ChangeEvent::public(Table::Listings, ChangeKind::Insert, format!("l{i}")));
        }

        assert!(matches!(stream.next().await, Some(FeedItem::Lagged(3))));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let feed = ChangeFeed::new(4);
        assert_eq!(feed.publish(ChangeEvent::public(Table::Profiles, ChangeKind::Update, "p")), 0);
    }

    #[test]
    fn acceptance_emits_one_event_per_applied_change() {
        let conversation = Conversation {
            id: "c1".into(),
            participant_a_id: "bob".into(),
            participant_b_id: "owner".into(),
            originating_request_id: "r1".into(),
            created_at: 0,
            updated_at: 0,
        };
        let settlement = Settlement {
            request: request("r1", "bob"),
            resumed: false,
            steps: vec![Step::Accept, Step::CascadeReject, Step::OpenConversation, Step::RetireListing],
            cascade_rejected: vec![request("r2", "cy")],
            conversation: Some(conversation),
            listing_removed: true,
        };

        let events = settlement_events(&settlement);
        let tables: Vec<_> = events.iter().map(|e| e.table).collect();
        assert_eq!(
            tables,
            vec![Table::Requests, Table::Requests, Table::Conversations, Table::Listings]
        );
        assert!(events[1].visible_to("cy"));
        assert!(!events[1].visible_to("bob"));
        assert!(events[3].visible_to("anyone"));
    }

    #[test]
    fn table_names_parse() {
        assert_eq!("skill_media".parse::<Table>(), Ok(Table::SkillMedia));
        assert!("users".parse::<Table>().is_err());
    }
}
