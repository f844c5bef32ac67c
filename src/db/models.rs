use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: Vec<u8>,
    #[serde(skip_serializing)]
    pub password_salt: Vec<u8>,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub tagline: String,
    pub teachable_skills: String,
    #[serde(skip_serializing)]
    pub avatar_key: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: i64,
}

impl Profile {
    /// Lowercased, trimmed, non-empty entries of the comma-separated skill list.
    pub fn teachable_skill_list(&self) -> Vec<String> {
        split_skills(&self.teachable_skills)
    }
}

pub fn split_skills(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Proficient,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub owner_id: String,
    /// Skill wanted.
    pub title: String,
    /// Skill offered in exchange.
    pub skill_category: String,
    pub experience_level: ExperienceLevel,
    pub location: Option<String>,
    pub description: String,
    pub display_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// A swap proposal against a listing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MatchRequest {
    pub id: String,
    pub listing_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_display_name: String,
    pub swap_conditions: String,
    pub status: RequestStatus,
    pub created_at: i64,
}

/// Row of the `request_details` view: a request plus the listing snapshot
/// taken when it was submitted and the current profile names of both sides.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RequestDetails {
    pub id: String,
    pub listing_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_display_name: String,
    pub swap_conditions: String,
    pub status: RequestStatus,
    pub listing_title: String,
    pub listing_skill_category: String,
    pub listing_experience_level: ExperienceLevel,
    pub listing_description: String,
    pub listing_display_name: String,
    pub sender_profile_name: Option<String>,
    pub recipient_profile_name: Option<String>,
    pub created_at: i64,
}

impl RequestDetails {
    /// Name of the other side as seen by `viewer`.
    pub fn counterparty_name(&self, viewer: &str) -> String {
        let (profile_name, snapshot_name) = if viewer == self.sender_id {
            (&self.recipient_profile_name, &self.listing_display_name)
        } else {
            (&self.sender_profile_name, &self.sender_display_name)
        };
        profile_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(Some(snapshot_name.as_str()).filter(|n| !n.trim().is_empty()))
            .unwrap_or(UNKNOWN_USER)
            .to_string()
    }
}

pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_a_id: String,
    pub participant_b_id: String,
    pub originating_request_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn has_participant(&self, identity: &str) -> bool {
        self.participant_a_id == identity || self.participant_b_id == identity
    }

    pub fn participants(&self) -> [&str; 2] {
        [&self.participant_a_id, &self.participant_b_id]
    }
}

/// Conversation joined with the originating request's snapshot, used to
/// label the other side in a conversation list.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub participant_a_id: String,
    pub participant_b_id: String,
    pub originating_request_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub request_sender_id: Option<String>,
    pub request_sender_name: Option<String>,
    pub listing_display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub counterparty_label: String,
}

impl ConversationRow {
    pub fn into_summary(self, viewer: &str) -> ConversationSummary {
        let label = match self.request_sender_id.as_deref() {
            Some(sender) if sender == viewer => self.listing_display_name,
            Some(_) => self.request_sender_name,
            None => None,
        }
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_USER.to_string());

        ConversationSummary {
            conversation: Conversation {
                id: self.id,
                participant_a_id: self.participant_a_id,
                participant_b_id: self.participant_b_id,
                originating_request_id: self.originating_request_id,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            counterparty_label: label,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Classify an upload by its MIME type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.starts_with("image/") {
            Some(MediaKind::Photo)
        } else if content_type.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn bucket(&self) -> &'static str {
        match self {
            MediaKind::Photo => "skill_photos",
            MediaKind::Video => "skill_videos",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SkillMedia {
    pub id: String,
    pub profile_id: String,
    pub media_kind: MediaKind,
    pub title: String,
    #[serde(skip_serializing)]
    pub object_key: String,
    pub object_url: String,
    pub caption: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skills_are_split_and_normalised() {
        assert_eq!(
            split_skills(" Guitar, rust ,, Spanish "),
            vec!["guitar", "rust", "spanish"]
        );
        assert!(split_skills("").is_empty());
    }

    #[test]
    fn media_kind_from_content_type() {
        assert_eq!(MediaKind::from_content_type("image/png"), Some(MediaKind::Photo));
        assert_eq!(MediaKind::from_content_type("Video/MP4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_content_type("application/pdf"), None);
    }

    fn row(sender: Option<&str>) -> ConversationRow {
        ConversationRow {
            id: "c1".into(),
            participant_a_id: "u2".into(),
            participant_b_id: "u1".into(),
            originating_request_id: "r1".into(),
            created_at: 1,
            updated_at: 2,
            request_sender_id: sender.map(String::from),
            request_sender_name: Some("Bea".into()),
            listing_display_name: Some("Ann".into()),
        }
    }

    #[test]
    fn conversation_label_depends_on_viewer() {
        assert_eq!(row(Some("u2")).into_summary("u2").counterparty_label, "Ann");
        assert_eq!(row(Some("u2")).into_summary("u1").counterparty_label, "Bea");
        assert_eq!(row(None).into_summary("u1").counterparty_label, UNKNOWN_USER);
    }
}
