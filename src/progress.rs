use axum::response::sse::Event;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{ActionResult, Screenshot};

/// Events streamed to subscribers as a run progresses. Delivery is
/// best-effort and at-most-once: late subscribers see nothing older than
/// their subscription, and the aggregate response never depends on anyone
/// listening.
#[derive(Clone, Debug)]
pub enum RunEvent {
    ActionStepCompleted {
        result: ActionResult,
    },
    RunCompleted {
        results: Vec<ActionResult>,
        evidence: Vec<EvidenceRef>,
    },
}

/// Lightweight pointer to a captured screenshot; the inline payload only
/// travels in the HTTP response, not on the event stream.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRef {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl From<&Screenshot> for EvidenceRef {
    fn from(shot: &Screenshot) -> Self {
        Self {
            label: shot.label.clone(),
            file: shot.file.clone(),
        }
    }
}

impl RunEvent {
    pub fn to_sse_event(&self) -> Event {
        match self {
            RunEvent::ActionStepCompleted { result } => Event::default()
                .event("action_step_completed")
                .data(serde_json::json!({ "result": result }).to_string()),
            RunEvent::RunCompleted { results, evidence } => Event::default()
                .event("run_completed")
                .data(serde_json::json!({ "results": results, "evidence": evidence }).to_string()),
        }
    }
}

/// Fire-and-forget publish; an error just means nobody is subscribed.
pub fn publish(events: &broadcast::Sender<RunEvent>, event: RunEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, ActionStatus};

    fn step_event() -> RunEvent {
        RunEvent::ActionStepCompleted {
            result: ActionResult {
                action: Action {
                    kind: "click".into(),
                    target: "#submit".into(),
                    value: None,
                },
                status: ActionStatus::Error,
                error_detail: Some("ElementNotFound: #submit".into()),
            },
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let (tx, _) = broadcast::channel(8);
        publish(&tx, step_event());
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let (tx, _) = broadcast::channel(8);
        let mut rx = tx.subscribe();
        publish(&tx, step_event());
        let received = rx.recv().await.unwrap();
        match received {
            RunEvent::ActionStepCompleted { result } => {
                assert_eq!(result.status, ActionStatus::Error);
                assert_eq!(result.action.target, "#submit");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
