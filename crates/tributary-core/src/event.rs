//! Inbound object-change notifications.

use serde::{Deserialize, Serialize};

use crate::storage::ObjectVersion;

/// A storage object-change notification.
///
/// One event is delivered per object creation or update. The version tokens
/// reflect the specific revision the notification was generated for, not
/// necessarily the object's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEvent {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object name (slash-separated path within the bucket).
    pub name: String,
    /// Content version token of the notifying revision, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    /// Metadata version token of the notifying revision, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metageneration: Option<String>,
}

impl ObjectEvent {
    /// Returns the canonical storage address of the object.
    #[must_use]
    pub fn address(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }

    /// Returns the revision the notification was generated for, if the
    /// event carried both version tokens.
    #[must_use]
    pub fn version(&self) -> Option<ObjectVersion> {
        match (&self.generation, &self.metageneration) {
            (Some(g), Some(m)) => Some(ObjectVersion::new(g.clone(), m.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_notification_json() {
        let event: ObjectEvent = serde_json::from_str(
            r#"{
                "bucket": "outputs",
                "name": "Pipeline/run-1/call/sample.bam",
                "generation": "1712345",
                "metageneration": "1",
                "contentType": "application/octet-stream"
            }"#,
        )
        .expect("notification should deserialize");

        assert_eq!(event.bucket, "outputs");
        assert_eq!(event.address(), "gs://outputs/Pipeline/run-1/call/sample.bam");
        assert_eq!(
            event.version(),
            Some(ObjectVersion::new("1712345", "1"))
        );
    }

    #[test]
    fn version_requires_both_tokens() {
        let event = ObjectEvent {
            bucket: "outputs".into(),
            name: "Pipeline/run-1/output.json".into(),
            generation: Some("3".into()),
            metageneration: None,
        };
        assert!(event.version().is_none());
    }
}
