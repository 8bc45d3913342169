//! Wire format of the `/qgpt/stream` endpoint.
//!
//! Outbound questions and inbound answer frames are JSON text messages:
//!
//! ```text
//! -> {"question":{"query":"hi","model":"m","relevant":{"iterable":[]}},"conversation":"abc"}
//! <- {"question":{"answers":{"iterable":[{"text":"Hel"}]}},"status":"IN-PROGRESS"}
//! <- {"question":{"answers":{"iterable":[{"text":"lo"}]}},"status":"COMPLETED","conversation":"abc"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// The only status that ends an exchange successfully.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// Statuses the service uses when it gives up on a question.
const FAILURE_STATUSES: [&str; 3] = ["FAILED", "STOPPED", "CANCELED"];

/// Files or snippets the question refers to. Passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevantContext {
    #[serde(default)]
    pub iterable: Vec<serde_json::Value>,
}

impl RelevantContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: serde_json::Value) {
        self.iterable.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.iterable.is_empty()
    }

    pub fn len(&self) -> usize {
        self.iterable.len()
    }
}

/// An outbound question.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub query: String,
    pub model_id: String,
    pub relevant: RelevantContext,
}

impl StreamRequest {
    pub fn new(query: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            model_id: model_id.into(),
            relevant: RelevantContext::default(),
        }
    }

    pub fn with_relevant(mut self, relevant: RelevantContext) -> Self {
        self.relevant = relevant;
        self
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    PartialAnswer { text_fragment: String },
    Completed { conversation_id: Option<String> },
    Errored { detail: String },
}

#[derive(Serialize)]
struct StreamInput<'a> {
    question: QuestionInput<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation: Option<&'a str>,
}

#[derive(Serialize)]
struct QuestionInput<'a> {
    query: &'a str,
    model: &'a str,
    relevant: &'a RelevantContext,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamOutput {
    #[serde(default)]
    question: Option<AnswerSet>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct AnswerSet {
    #[serde(default)]
    answers: Answers,
}

#[derive(Deserialize, Default)]
struct Answers {
    #[serde(default)]
    iterable: Vec<Answer>,
}

#[derive(Deserialize)]
struct Answer {
    #[serde(default)]
    text: Option<String>,
}

/// Serialize a question. `conversation_id` is left out entirely when `None`,
/// which makes the service open a new conversation.
pub fn encode_request(
    request: &StreamRequest,
    conversation_id: Option<&str>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StreamInput {
        question: QuestionInput {
            query: &request.query,
            model: &request.model_id,
            relevant: &request.relevant,
        },
        conversation: conversation_id,
    })
}

/// Parse one inbound frame into the events it carries, in order.
///
/// All answer fragments in the frame are concatenated into a single
/// `PartialAnswer`; a terminal status follows it as `Completed` or `Errored`.
/// A frame with no text and an in-progress status yields no events.
pub fn decode_frame(raw: &str) -> Result<Vec<StreamEvent>, DecodeError> {
    let output: StreamOutput = serde_json::from_str(raw)?;
    let mut events = Vec::with_capacity(2);

    let text: String = output
        .question
        .into_iter()
        .flat_map(|question| question.answers.iterable)
        .filter_map(|answer| answer.text)
        .collect();
    if !text.is_empty() {
        events.push(StreamEvent::PartialAnswer {
            text_fragment: text,
        });
    }

    match output.status.as_deref() {
        Some(STATUS_COMPLETED) => events.push(StreamEvent::Completed {
            conversation_id: output.conversation,
        }),
        Some(status) if FAILURE_STATUSES.contains(&status) => events.push(StreamEvent::Errored {
            detail: output.error_message.unwrap_or_else(|| status.to_string()),
        }),
        _ => {}
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_without_conversation_omits_field() {
        let req = StreamRequest::new("hi", "model-1");
        let raw = encode_request(&req, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["question"]["query"], "hi");
        assert_eq!(value["question"]["model"], "model-1");
        assert!(value["question"]["relevant"]["iterable"].as_array().unwrap().is_empty());
        assert!(value.get("conversation").is_none());
    }

    #[test]
    fn encode_with_conversation() {
        let req = StreamRequest::new("again", "model-1");
        let raw = encode_request(&req, Some("abc-123")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["conversation"], "abc-123");
    }

    #[test]
    fn encode_passes_relevant_through() {
        let mut relevant = RelevantContext::new();
        relevant.push(json!({"file": "/tmp/main.rs"}));
        relevant.push(json!({"asset": "snip-9"}));
        let req = StreamRequest::new("explain", "m").with_relevant(relevant);
        let raw = encode_request(&req, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value["question"]["relevant"]["iterable"],
            json!([{"file": "/tmp/main.rs"}, {"asset": "snip-9"}])
        );
    }

    #[test]
    fn decode_partial_answer() {
        let raw = r#"{"question":{"answers":{"iterable":[{"text":"Hel"}]}},"status":"IN-PROGRESS"}"#;
        assert_eq!(
            decode_frame(raw).unwrap(),
            vec![StreamEvent::PartialAnswer {
                text_fragment: "Hel".into()
            }]
        );
    }

    #[test]
    fn decode_batched_answers_concatenate_in_order() {
        let raw = json!({
            "question": {"answers": {"iterable": [{"text": "a"}, {"text": "b"}, {}, {"text": "c"}]}}
        })
        .to_string();
        assert_eq!(
            decode_frame(&raw).unwrap(),
            vec![StreamEvent::PartialAnswer {
                text_fragment: "abc".into()
            }]
        );
    }

    #[test]
    fn decode_final_frame_with_text_and_completion() {
        let raw = json!({
            "question": {"answers": {"iterable": [{"text": "world"}]}},
            "status": "COMPLETED",
            "conversation": "abc-123"
        })
        .to_string();
        assert_eq!(
            decode_frame(&raw).unwrap(),
            vec![
                StreamEvent::PartialAnswer {
                    text_fragment: "world".into()
                },
                StreamEvent::Completed {
                    conversation_id: Some("abc-123".into())
                },
            ]
        );
    }

    #[test]
    fn decode_completed_without_text() {
        let raw = r#"{"status":"COMPLETED","conversation":"c1"}"#;
        assert_eq!(
            decode_frame(raw).unwrap(),
            vec![StreamEvent::Completed {
                conversation_id: Some("c1".into())
            }]
        );
    }

    #[test]
    fn decode_failed_uses_error_message() {
        let raw = r#"{"status":"FAILED","errorMessage":"model unavailable"}"#;
        assert_eq!(
            decode_frame(raw).unwrap(),
            vec![StreamEvent::Errored {
                detail: "model unavailable".into()
            }]
        );
    }

    #[test]
    fn decode_canceled_falls_back_to_status_name() {
        let raw = r#"{"status":"CANCELED"}"#;
        assert_eq!(
            decode_frame(raw).unwrap(),
            vec![StreamEvent::Errored {
                detail: "CANCELED".into()
            }]
        );
    }

    #[test]
    fn decode_unknown_status_is_in_progress() {
        let raw = r#"{"status":"INITIALIZED","extra":{"ignored":true}}"#;
        assert!(decode_frame(raw).unwrap().is_empty());
        assert!(decode_frame("{}").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"status": 7}"#).is_err());
        assert!(decode_frame(r#"{"question":{"answers":{"iterable":"nope"}}}"#).is_err());
    }
}
