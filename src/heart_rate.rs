//! Press-and-hold heart-rate measurement and the user's measurement history.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use log::{error, info, warn};
use serde_json::json;

use crate::auth::{AuthProvider, Session};
use crate::error::Alert;
use crate::models::{heart_rate_collection, HeartRateMeasurement};
use crate::random::RandomSource;
use crate::store::{Direction, DocumentStore, Query, SERVER_TIMESTAMP};
use crate::sync::ListSpec;

pub const MEASUREMENT_DURATION: Duration = Duration::from_secs(5);
/// Slack allowed below [`MEASUREMENT_DURATION`] when the hold is released.
pub const TOLERANCE: Duration = Duration::from_millis(100);

const MIN_BASE_BPM: u32 = 60;
const MAX_BASE_BPM: u32 = 100;

/// Tactile feedback the screen should play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Haptic {
    /// Hold started.
    Impact,
    /// Measurement produced.
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterState {
    Idle,
    Measuring { started: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Ignored,
    Rejected(Alert),
    Completed { bpm: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpmStatus {
    NotMeasured,
    Low,
    Normal,
    High,
}

impl BpmStatus {
    pub fn of(bpm: Option<u32>) -> Self {
        match bpm {
            None | Some(0) => BpmStatus::NotMeasured,
            Some(b) if b < 60 => BpmStatus::Low,
            Some(b) if b <= 100 => BpmStatus::Normal,
            Some(_) => BpmStatus::High,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BpmStatus::NotMeasured => "Not measured",
            BpmStatus::Low => "Low",
            BpmStatus::Normal => "Normal",
            BpmStatus::High => "High",
        }
    }
}

/// A value in `[60, 100]` plus a small sine wobble on the wall clock.
pub fn synthesize_bpm(rng: &dyn RandomSource, wall: DateTime<Utc>) -> u32 {
    let base = rng.in_range(MIN_BASE_BPM, MAX_BASE_BPM) as f64;
    let seconds = wall.timestamp_millis() as f64 / 1000.0;
    let variation = seconds.sin() * 3.0;
    (base + variation).round().max(0.0) as u32
}

pub struct HeartRateMeter {
    rng: Box<dyn RandomSource>,
    state: MeterState,
    time_left: u64,
    bpm: Option<u32>,
}

impl HeartRateMeter {
    pub fn new(rng: Box<dyn RandomSource>) -> Self {
        HeartRateMeter {
            rng,
            state: MeterState::Idle,
            time_left: MEASUREMENT_DURATION.as_secs(),
            bpm: None,
        }
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    pub fn is_measuring(&self) -> bool {
        matches!(self.state, MeterState::Measuring { .. })
    }

    /// Whole seconds left on the countdown. Informational only; the hold is
    /// judged by elapsed time at release.
    pub fn time_left(&self) -> u64 {
        self.time_left
    }

    pub fn bpm(&self) -> Option<u32> {
        self.bpm
    }

    pub fn status(&self) -> BpmStatus {
        BpmStatus::of(self.bpm)
    }

    /// Starts a hold. Ignored while one is already running.
    pub fn press(&mut self, now: Instant) -> Option<Haptic> {
        if self.is_measuring() {
            return None;
        }
        self.state = MeterState::Measuring { started: now };
        self.time_left = MEASUREMENT_DURATION.as_secs();
        self.bpm = None;
        Some(Haptic::Impact)
    }

    /// One-second countdown step, floored at zero.
    pub fn tick(&mut self) -> u64 {
        if self.is_measuring() {
            self.time_left = self.time_left.saturating_sub(1);
        }
        self.time_left
    }

    pub fn release(&mut self, now: Instant, wall: DateTime<Utc>) -> HoldOutcome {
        let MeterState::Measuring { started } = self.state else {
            return HoldOutcome::Ignored;
        };
        self.state = MeterState::Idle;
        self.time_left = MEASUREMENT_DURATION.as_secs();

        let held = now.saturating_duration_since(started);
        if held < MEASUREMENT_DURATION - TOLERANCE {
            info!("Hold released after {:?}; measurement rejected", held);
            return HoldOutcome::Rejected(Alert::warning(
                "Measurement Incomplete",
                "Please hold for the full 5 seconds to measure your heart rate.",
            ));
        }

        let bpm = synthesize_bpm(self.rng.as_ref(), wall);
        self.bpm = Some(bpm);
        HoldOutcome::Completed { bpm }
    }
}

/// Stores a measurement for the signed-in user. Returns the alert to show
/// when it could not be saved.
pub async fn save_measurement<S, A>(store: &S, auth: &A, bpm: u32) -> Option<Alert>
where
    S: DocumentStore,
    A: AuthProvider + ?Sized,
{
    let Some(session) = auth.current_session() else {
        warn!("No authenticated user");
        return Some(Alert::error("Please sign in to save measurements."));
    };
    let record = json!({ "bpm": bpm, "timestamp": SERVER_TIMESTAMP });
    match store.add(&heart_rate_collection(&session.uid), record).await {
        Ok(id) => {
            info!("Saved heart rate measurement {}", id);
            None
        }
        Err(e) => {
            error!("Error saving BPM: {}", e);
            Some(Alert::failed("save measurement"))
        }
    }
}

fn newest_first(a: &HeartRateMeasurement, b: &HeartRateMeasurement) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp)
}

pub fn history_spec() -> ListSpec<HeartRateMeasurement> {
    ListSpec {
        query: Box::new(|session: &Session| {
            Query::collection(heart_rate_collection(&session.uid))
                .order_by("timestamp", Direction::Descending)
        }),
        map: |doc, _| Ok(Some(doc.decode()?)),
        order: newest_first,
    }
}

/// When the measurement was taken, in local time. Pending server timestamps
/// show as now.
pub fn measured_at_label(measurement: &HeartRateMeasurement) -> String {
    let time = measurement.timestamp.unwrap_or_else(Utc::now);
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LocalAuth, Session};
    use crate::enrich::tests::FailingStore;
    use crate::random::FixedRandom;
    use crate::storage::SqliteStore;
    use crate::sync::ListSync;
    use chrono::TimeZone;

    fn meter() -> HeartRateMeter {
        HeartRateMeter::new(Box::new(FixedRandom(0)))
    }

    fn wall() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(0).unwrap()
    }

    #[test]
    fn test_short_hold_is_rejected() {
        let mut meter = meter();
        let start = Instant::now();
        assert_eq!(meter.press(start), Some(Haptic::Impact));

        let outcome = meter.release(start + Duration::from_millis(4890), wall());
        match outcome {
            HoldOutcome::Rejected(alert) => assert_eq!(alert.title, "Measurement Incomplete"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(meter.state(), MeterState::Idle);
        assert_eq!(meter.bpm(), None);
    }

    #[test]
    fn test_hold_within_tolerance_completes() {
        let mut meter = meter();
        let start = Instant::now();
        meter.press(start);
        let outcome = meter.release(start + Duration::from_millis(4950), wall());
        assert_eq!(outcome, HoldOutcome::Completed { bpm: 60 });
        assert_eq!(meter.bpm(), Some(60));
        assert_eq!(meter.status(), BpmStatus::Normal);
    }

    #[test]
    fn test_repeated_press_and_idle_release_are_ignored() {
        let mut meter = meter();
        let start = Instant::now();
        assert_eq!(meter.release(start, wall()), HoldOutcome::Ignored);

        meter.press(start);
        assert_eq!(meter.press(start + Duration::from_secs(2)), None);
        let outcome = meter.release(start + Duration::from_secs(5), wall());
        assert!(matches!(outcome, HoldOutcome::Completed { .. }));
    }

    #[test]
    fn test_countdown_floors_at_zero() {
        let mut meter = meter();
        assert_eq!(meter.tick(), 5);
        meter.press(Instant::now());
        for _ in 0..7 {
            meter.tick();
        }
        assert_eq!(meter.time_left(), 0);
        meter.release(Instant::now(), wall());
        assert_eq!(meter.time_left(), 5);
    }

    #[test]
    fn test_synthesized_bpm_stays_near_range() {
        let rng = crate::random::SystemRng::new();
        for ms in (0..50_000).step_by(997) {
            let bpm = synthesize_bpm(&rng, Utc.timestamp_millis_opt(ms).unwrap());
            assert!((57..=103).contains(&bpm));
        }
    }

    #[test]
    fn test_bpm_status_labels() {
        assert_eq!(BpmStatus::of(None).label(), "Not measured");
        assert_eq!(BpmStatus::of(Some(59)).label(), "Low");
        assert_eq!(BpmStatus::of(Some(60)).label(), "Normal");
        assert_eq!(BpmStatus::of(Some(100)).label(), "Normal");
        assert_eq!(BpmStatus::of(Some(101)).label(), "High");
    }

    #[tokio::test]
    async fn test_save_requires_session() {
        let store = SqliteStore::new(":memory:").unwrap();
        let alert = save_measurement(&store, &LocalAuth::default(), 72).await.unwrap();
        assert_eq!(alert.message, "Please sign in to save measurements.");
    }

    #[tokio::test]
    async fn test_saved_measurements_appear_newest_first() {
        let store = SqliteStore::new(":memory:").unwrap();
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let collection = heart_rate_collection("u1");
        store
            .set(&collection, "m1", json!({"bpm": 64, "timestamp": 1_000}))
            .await
            .unwrap();

        let mut history = ListSync::start(&store, &auth, history_spec());
        assert_eq!(history.next().await.unwrap().items.len(), 1);

        assert!(save_measurement(&store, &auth, 88).await.is_none());
        let items = &history.next().await.unwrap().items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].bpm, 88);
        assert_eq!(items[1].id, "m1");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_displayed_bpm() {
        let mut meter = meter();
        let start = Instant::now();
        meter.press(start);
        let HoldOutcome::Completed { bpm } = meter.release(start + MEASUREMENT_DURATION, wall())
        else {
            panic!("hold should complete");
        };

        let store = FailingStore::new();
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let alert = save_measurement(&store, &auth, bpm).await.unwrap();
        assert_eq!(alert.message, "Failed to save measurement.");
        assert_eq!(meter.bpm(), Some(bpm));
        assert_eq!(meter.status(), BpmStatus::Normal);
    }
}
