//! Device actions proposed by the planner.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Screen coordinate relative to a 1000x1000 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point(pub u32, pub u32);

impl Point {
    /// Scale to absolute pixels for a screen of `width` x `height`.
    pub fn to_absolute(self, width: u32, height: u32) -> (u32, u32) {
        let x = u64::from(self.0.min(1000)) * u64::from(width) / 1000;
        let y = u64::from(self.1.min(1000)) * u64::from(height) / 1000;
        (x as u32, y as u32)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.0, self.1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ActionKind {
    Launch {
        app: String,
    },
    Tap {
        element: Point,
    },
    Type {
        text: String,
    },
    Swipe {
        start: Point,
        end: Point,
    },
    Back,
    Home,
    #[serde(rename = "Double Tap")]
    DoubleTap {
        element: Point,
    },
    #[serde(rename = "Long Press")]
    LongPress {
        element: Point,
    },
    Wait {
        seconds: f64,
    },
    #[serde(rename = "Take_over")]
    TakeOver {
        message: String,
    },
    Note {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "Call_API")]
    CallApi {
        #[serde(default)]
        instruction: Option<String>,
    },
    Interact {
        #[serde(default)]
        message: Option<String>,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Launch { .. } => "Launch",
            ActionKind::Tap { .. } => "Tap",
            ActionKind::Type { .. } => "Type",
            ActionKind::Swipe { .. } => "Swipe",
            ActionKind::Back => "Back",
            ActionKind::Home => "Home",
            ActionKind::DoubleTap { .. } => "Double Tap",
            ActionKind::LongPress { .. } => "Long Press",
            ActionKind::Wait { .. } => "Wait",
            ActionKind::TakeOver { .. } => "Take_over",
            ActionKind::Note { .. } => "Note",
            ActionKind::CallApi { .. } => "Call_API",
            ActionKind::Interact { .. } => "Interact",
        }
    }
}

/// One concrete device action.
///
/// `sensitive` holds the confirmation message for actions with real-world
/// consequence (payments, sending messages). Such actions only run when the
/// session auto-confirms sensitive operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            sensitive: None,
        }
    }

    pub fn sensitive(kind: ActionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sensitive: Some(message.into()),
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive.is_some()
    }

    /// One-line description used for progress output.
    pub fn summary(&self) -> String {
        match &self.kind {
            ActionKind::Tap { element } => format!("ACTION Tap element={}", element),
            ActionKind::Swipe { start, end } => {
                format!("ACTION Swipe start={} end={}", start, end)
            }
            ActionKind::Type { text } => {
                let short = if text.chars().count() <= 40 {
                    text.clone()
                } else {
                    format!("{}...", text.chars().take(37).collect::<String>())
                };
                format!("ACTION Type text={:?}", short)
            }
            other => format!("ACTION {}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_scaling() {
        assert_eq!(Point(500, 250).to_absolute(1080, 2400), (540, 600));
        assert_eq!(Point(1000, 1000).to_absolute(1080, 2400), (1080, 2400));
        assert_eq!(Point(4000, 0).to_absolute(1080, 2400), (1080, 0));
    }

    #[test]
    fn test_summaries() {
        let tap = Action::new(ActionKind::Tap {
            element: Point(100, 800),
        });
        assert_eq!(tap.summary(), "ACTION Tap element=[100, 800]");

        let long_text = Action::new(ActionKind::Type {
            text: "x".repeat(50),
        });
        assert_eq!(
            long_text.summary(),
            format!("ACTION Type text=\"{}...\"", "x".repeat(37))
        );

        assert_eq!(Action::new(ActionKind::Home).summary(), "ACTION Home");
        assert_eq!(
            Action::new(ActionKind::LongPress {
                element: Point(1, 2)
            })
            .summary(),
            "ACTION Long Press"
        );
    }

    #[test]
    fn test_action_wire_format() {
        let action = Action::sensitive(
            ActionKind::Tap {
                element: Point(500, 900),
            },
            "Confirm payment of 20 CNY",
        );
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "Tap",
                "element": [500, 900],
                "sensitive": "Confirm payment of 20 CNY"
            })
        );

        let parsed: Action =
            serde_json::from_value(json!({"action": "Double Tap", "element": [1, 2]})).unwrap();
        assert_eq!(parsed.kind, ActionKind::DoubleTap { element: Point(1, 2) });
        assert!(!parsed.is_sensitive());
    }
}
