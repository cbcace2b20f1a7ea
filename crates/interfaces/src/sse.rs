use axum::response::sse::Event;
use futures::Stream;
use phone_agent_core::{EventKind, EventReceiver, StepEvent, TerminalPayload};

use crate::session::SessionGuard;

/// Protocol event for one session event. Text events split into one
/// `data:` line per line of text; terminal events carry their JSON payload
/// without the log.
pub fn step_event(event: StepEvent) -> Event {
    let name = event.kind.name();
    let base = Event::default().event(name).id(event.seq.to_string());
    match event.kind {
        EventKind::Lifecycle(phase) => base.data(text_data(&phase.to_string())),
        EventKind::Output(text) => base.data(text_data(&text)),
        EventKind::Result(payload) => base.data(payload_json(TerminalPayload::Result(payload))),
        EventKind::Error(payload) => base.data(payload_json(TerminalPayload::Error(payload))),
    }
}

/// Terminal event recovered from the session table, when the producer went
/// away without emitting one.
pub fn terminal_event(payload: TerminalPayload) -> Event {
    let name = if payload.is_ok() { "result" } else { "error" };
    Event::default().event(name).data(payload_json(payload))
}

pub fn server_event(text: impl AsRef<str>) -> Event {
    Event::default().event("server").data(text_data(text.as_ref()))
}

/// SSE fields cannot carry `\r`; fold CRLF and lone CR into `\n` so each
/// line becomes its own `data:` line.
fn text_data(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn payload_json(payload: TerminalPayload) -> String {
    serde_json::to_string(&payload.without_logs()).unwrap_or_else(|e| {
        tracing::error!("Failed to encode terminal payload: {}", e);
        r#"{"ok":false,"error":"invalid_worker_result"}"#.to_string()
    })
}

/// Relay a session's events until its terminal event.
///
/// The guard travels with the stream, so a client that disconnects early
/// (the stream is dropped) cancels the session.
pub fn relay(events: EventReceiver, guard: SessionGuard) -> impl Stream<Item = Event> + Send {
    futures::stream::unfold(
        Some((events, guard)),
        |state| async move {
            let (mut events, mut guard) = state?;
            match events.recv().await {
                Some(event) => {
                    if event.kind.is_terminal() {
                        guard.delivered();
                        return Some((step_event(event), None));
                    }
                    Some((step_event(event), Some((events, guard))))
                }
                None => {
                    let payload = guard.manager().wait(guard.session_id()).await.ok()?;
                    guard.delivered();
                    Some((terminal_event(payload), None))
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn output(text: &str) -> StepEvent {
        StepEvent {
            seq: 7,
            timestamp: Utc::now(),
            kind: EventKind::Output(text.into()),
        }
    }

    #[test]
    fn test_text_data_folds_carriage_returns() {
        assert_eq!(text_data("a\r\nb\rc\nd"), "a\nb\nc\nd");
        assert_eq!(text_data("plain"), "plain");
    }

    #[test]
    fn test_text_with_carriage_returns_encodes() {
        let _ = step_event(output("Tap the button\r\nthen wait"));
        let _ = step_event(output("adb: error: device offline\r"));
        let _ = server_event("CONNECT from=- device_id=emu\r1");
    }
}
