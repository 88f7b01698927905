use crate::client::PublicId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire shape carried on the `editor-events` bus. A payload of length 0 is
/// the channel-unsubscribed control signal, a convention that's a little
/// fragile (an empty real payload would be indistinguishable) but is kept
/// for compatibility with the bus's existing consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PublicId>,
    #[serde(rename = "roomId")]
    pub room_id: Uuid,
    pub message: String,
    pub payload: serde_json::Value,
    #[serde(rename = "processedBy")]
    pub processed_by: String,
}

impl EditorEvent {
    /// True when this frame is the bus's "channel unsubscribed, reclaim
    /// room" control signal rather than a real event.
    pub fn is_unsubscribe_signal(raw_payload_len: usize) -> bool {
        raw_payload_len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = EditorEvent {
            source: None,
            room_id: Uuid::new_v4(),
            message: "otUpdateApplied".into(),
            payload: serde_json::json!({"docId": "abc"}),
            processed_by: "instance-1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: EditorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "otUpdateApplied");
        assert_eq!(back.room_id, event.room_id);
    }

    #[test]
    fn empty_payload_is_the_unsubscribe_signal() {
        assert!(EditorEvent::is_unsubscribe_signal(0));
        assert!(!EditorEvent::is_unsubscribe_signal(2));
    }
}
