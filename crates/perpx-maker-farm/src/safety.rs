/*
[INPUT]:  Price snapshots, mark observations, and position notional
[OUTPUT]: Gate decision (Ok / PauseNew / KillAll) plus the emergency latch
[POS]:    Risk layer - three-tier safety gate for the quoting loop
[UPDATE]: When guard thresholds or gate semantics change
*/

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use crate::config::SafetyConfig;
use crate::price::PriceSnapshot;

const BPS_DENOMINATOR: i64 = 10_000;
const VOLATILITY_WINDOW: Duration = Duration::from_secs(1);

/// Gate decision for one evaluation instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Normal operation.
    Ok,
    /// Suspend new placements, keep resting orders.
    PauseNew { reason: String, until: Instant },
    /// Cancel everything immediately, locks ignored.
    KillAll { reason: String },
}

/// Per-symbol safety gate.
///
/// Kill conditions win over pause conditions. A pause, once latched, holds
/// until its deadline even if the triggering condition clears early;
/// overlapping causes extend the deadline to the furthest one.
#[derive(Debug)]
pub struct SafetyGuard {
    config: SafetyConfig,
    marks: VecDeque<(Instant, Decimal)>,
    pause_until: Option<Instant>,
    pause_reason: String,
    emergency_stopped: bool,
}

impl SafetyGuard {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            marks: VecDeque::new(),
            pause_until: None,
            pause_reason: String::new(),
            emergency_stopped: false,
        }
    }

    /// Record a mark observation for the volatility window.
    pub fn record_mark(&mut self, now: Instant, mark: Decimal) {
        if mark <= Decimal::ZERO {
            return;
        }
        self.marks.push_back((now, mark));
        self.trim_marks(now);
    }

    /// Mark displacement over the rolling window, normalised to bps per second.
    pub fn volatility_bps_per_sec(&self, now: Instant) -> Option<Decimal> {
        let mut in_window = self
            .marks
            .iter()
            .filter(|(t, _)| now.saturating_duration_since(*t) <= VOLATILITY_WINDOW)
            .copied();

        let (first_t, first_p) = in_window.next()?;
        let (last_t, last_p) = in_window.last()?;

        let elapsed = last_t.saturating_duration_since(first_t);
        if elapsed.is_zero() || first_p <= Decimal::ZERO {
            return None;
        }

        let elapsed_ms = elapsed.as_millis().min(i64::MAX as u128) as i64;
        let elapsed_secs = Decimal::from(elapsed_ms) / Decimal::from(1000);
        let bps = (last_p - first_p).abs() / first_p * Decimal::from(BPS_DENOMINATOR);
        Some(bps / elapsed_secs)
    }

    /// Evaluate the gate for this instant.
    pub fn gate(
        &mut self,
        snapshot: Option<&PriceSnapshot>,
        position_notional: Decimal,
        now: Instant,
    ) -> Gate {
        if self.emergency_stopped {
            return Gate::KillAll {
                reason: "emergency stop latched".to_string(),
            };
        }

        let Some(snapshot) = snapshot else {
            return Gate::KillAll {
                reason: "stale: no price data".to_string(),
            };
        };

        if snapshot.is_stale(now, self.config.hard_kill.stale_threshold()) {
            return Gate::KillAll {
                reason: format!("stale: no update for {:.1}s", snapshot.age(now).as_secs_f64()),
            };
        }

        let volatility = self.volatility_bps_per_sec(now);
        if let Some(vol) = volatility
            && vol >= self.config.hard_kill.max_volatility_bps
        {
            return Gate::KillAll {
                reason: format!("volatility {vol:.1} bps/s"),
            };
        }

        if position_notional >= self.config.max_position_usd {
            self.emergency_stopped = true;
            return Gate::KillAll {
                reason: format!("position notional ${position_notional:.2}"),
            };
        }

        let mut causes: Vec<String> = Vec::new();
        if let Some(vol) = volatility
            && vol >= self.config.pre_kill.volatility_threshold_bps
        {
            causes.push(format!("volatility {vol:.1} bps/s"));
        }

        let divergence = snapshot.mark_mid_divergence_bps();
        if divergence >= self.config.pre_kill.mark_mid_divergence_bps {
            causes.push(format!("mark/mid divergence {divergence:.1} bps"));
        }

        if !causes.is_empty() {
            let until = now + self.config.pre_kill.pause_duration();
            // Coalesce overlapping causes to the furthest deadline.
            if self.pause_until.is_none_or(|existing| until > existing) {
                self.pause_until = Some(until);
                self.pause_reason = causes.join("; ");
            }
        }

        if let Some(until) = self.pause_until {
            if now < until {
                return Gate::PauseNew {
                    reason: self.pause_reason.clone(),
                    until,
                };
            }
            self.pause_until = None;
            self.pause_reason.clear();
        }

        Gate::Ok
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }

    /// External reset; the engine itself never clears the latch.
    pub fn reset_emergency_stop(&mut self) {
        self.emergency_stopped = false;
    }

    fn trim_marks(&mut self, now: Instant) {
        while let Some((timestamp, _)) = self.marks.front() {
            if now.saturating_duration_since(*timestamp) > VOLATILITY_WINDOW {
                self.marks.pop_front();
            } else {
                break;
            }
        }
    }
}
