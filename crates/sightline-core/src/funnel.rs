use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::{Funnel, GoalType};
use crate::event::{Event, EventKind};
use crate::session::group_sessions;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalConversions {
    /// Distinct converting sessions.
    pub conversions: i64,
    /// Percent of all sessions in the range.
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStepResult {
    pub step_number: u32,
    pub label: String,
    pub sessions: i64,
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
    /// Mean seconds from the previous step's match, over sessions that hit both.
    pub avg_seconds_from_previous: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelAnalysis {
    pub funnel_id: String,
    pub name: String,
    pub total_sessions: i64,
    pub steps: Vec<FunnelStepResult>,
}

impl FunnelAnalysis {
    pub fn empty(funnel: &Funnel) -> Self {
        Self {
            funnel_id: funnel.id.clone(),
            name: funnel.name.clone(),
            total_sessions: 0,
            steps: Vec::new(),
        }
    }
}

pub(crate) fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

fn goal_matches_any_kind(goal_type: GoalType, event: &Event, match_value: &str) -> bool {
    match goal_type {
        GoalType::Url => event.path == match_value,
        GoalType::Event => {
            event.kind == EventKind::Custom && event.event_name.as_deref() == Some(match_value)
        }
    }
}

/// Session-level conversions for one goal definition over a set of events.
pub fn goal_conversions(goal_type: &str, match_value: &str, events: &[Event]) -> GoalConversions {
    let Some(goal_type) = GoalType::parse(goal_type) else {
        return GoalConversions::default();
    };
    let sessions = group_sessions(events);
    let conversions = sessions
        .iter()
        .filter(|session| {
            session
                .events
                .iter()
                .any(|event| goal_matches_any_kind(goal_type, event, match_value))
        })
        .count() as i64;
    GoalConversions {
        conversions,
        conversion_rate: percent(conversions, sessions.len() as i64),
    }
}

/// Walk every session through the funnel steps in `step_number` order.
///
/// A step only matches an event strictly after the previous step's match;
/// the first step may match at `range_start` itself.
pub fn analyze_funnel_events(
    funnel: &Funnel,
    events: &[Event],
    range_start: DateTime<Utc>,
) -> FunnelAnalysis {
    let mut steps = funnel.steps.clone();
    steps.sort_by_key(|s| s.step_number);
    if steps.is_empty() {
        return FunnelAnalysis::empty(funnel);
    }

    let sessions = group_sessions(events);
    let total_sessions = sessions.len() as i64;
    let mut reached = vec![0i64; steps.len()];
    let mut elapsed_sum = vec![0f64; steps.len()];

    for session in &sessions {
        let mut cursor: Option<DateTime<Utc>> = None;
        for (idx, step) in steps.iter().enumerate() {
            let Some(kind) = GoalType::parse(&step.step_type) else {
                break;
            };
            let hit = session.events.iter().find(|event| {
                let in_order = match cursor {
                    None => event.created_at >= range_start,
                    Some(prev) => event.created_at > prev,
                };
                in_order
                    && kind.matches(
                        event.kind,
                        event.event_name.as_deref(),
                        &event.path,
                        &step.match_value,
                    )
            });
            let Some(hit) = hit else {
                break;
            };
            if let Some(prev) = cursor {
                elapsed_sum[idx] += (hit.created_at - prev).num_milliseconds() as f64 / 1000.0;
            }
            reached[idx] += 1;
            cursor = Some(hit.created_at);
        }
    }

    let results = steps
        .iter()
        .enumerate()
        .map(|(idx, step)| {
            let sessions = reached[idx];
            let (drop_off_rate, avg_seconds_from_previous) = if idx == 0 {
                (0.0, None)
            } else {
                let prev = reached[idx - 1];
                let drop = if prev == 0 {
                    0.0
                } else {
                    100.0 * (prev - sessions) as f64 / prev as f64
                };
                let avg = (sessions > 0).then(|| elapsed_sum[idx] / sessions as f64);
                (drop, avg)
            };
            FunnelStepResult {
                step_number: step.step_number,
                label: step.label.clone(),
                sessions,
                conversion_rate: percent(sessions, total_sessions),
                drop_off_rate,
                avg_seconds_from_previous,
            }
        })
        .collect();

    FunnelAnalysis {
        funnel_id: funnel.id.clone(),
        name: funnel.name.clone(),
        total_sessions,
        steps: results,
    }
}
