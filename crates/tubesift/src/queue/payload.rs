//! Typed queue payloads. One sum type covers every queue; unknown fields on
//! the wire are preserved through the flattened map but never interpreted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    InboxSync(InboxSyncPayload),
    EmailProcess(EmailProcessPayload),
    Enrich(EnrichPayload),
    RankCompute(RankComputePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxSyncPayload {
    pub user_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailProcessPayload {
    pub user_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EmailProcessPayload {
    pub fn new(user_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message_id: message_id.into(),
            extra: Default::default(),
        }
    }

    /// Idempotency key: redelivered sync passes enqueue the same key.
    pub fn job_id(&self) -> String {
        format!("{}:{}", self.user_id, self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichPayload {
    pub user_id: String,
    pub link_id: String,
    pub video_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EnrichPayload {
    pub fn new(
        user_id: impl Into<String>,
        link_id: impl Into<String>,
        video_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            link_id: link_id.into(),
            video_id: video_id.into(),
            extra: Default::default(),
        }
    }

    pub fn job_id(&self) -> String {
        format!("{}:{}", self.user_id, self.link_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankComputePayload {
    pub user_id: String,
    pub link_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RankComputePayload {
    pub fn new(user_id: impl Into<String>, link_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            link_id: link_id.into(),
            extra: Default::default(),
        }
    }

    pub fn job_id(&self) -> String {
        format!("{}:{}", self.user_id, self.link_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_round_trip() {
        let payload = JobPayload::EmailProcess(EmailProcessPayload::new("u1", "m1"));
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""type":"email_process""#));

        let back: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let json = r#"{"type":"enrich","user_id":"u1","link_id":"l1",
                       "video_id":"dQw4w9WgXcQ","priority":"high"}"#;
        let payload: JobPayload = serde_json::from_str(json).unwrap();

        let JobPayload::Enrich(enrich) = &payload else {
            panic!("expected enrich payload");
        };
        assert_eq!(enrich.video_id, "dQw4w9WgXcQ");
        assert!(enrich.extra.contains_key("priority"));

        let round_tripped = serde_json::to_string(&payload).unwrap();
        assert!(round_tripped.contains("priority"));
    }

    #[test]
    fn test_job_ids_are_stable() {
        let a = EmailProcessPayload::new("u1", "m1");
        let b = EmailProcessPayload::new("u1", "m1");
        assert_eq!(a.job_id(), b.job_id());
        assert_eq!(a.job_id(), "u1:m1");
    }
}
