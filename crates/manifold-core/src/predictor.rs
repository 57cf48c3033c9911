//! Usage forecasting from periodic telemetry snapshots.
//!
//! [`UsagePredictor`] keeps a rolling deque of cumulative
//! [`PredictionSnapshot`]s (one per sampling tick), maintains exponential
//! moving averages of the per-second token/cost/request rates between
//! consecutive snapshots, and fits an ordinary-least-squares line through
//! the series for horizon forecasts. The two estimators are blended 60/40
//! (regression/EMA) -- regression captures the day's shape, the EMA reacts
//! to the last few minutes.
//!
//! Query-side APIs degrade instead of failing: fewer than three snapshots
//! yields `None`, an idle series yields zero rates.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use manifold_types::ModelTier;

use crate::usage::UsageSnapshot;

// ── Snapshots ──────────────────────────────────────────────────────────

/// Cumulative usage sampled at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Cumulative tokens (input + output).
    pub total_tokens: u64,
    /// Cumulative cost in USD.
    pub total_cost: f64,
    /// Cumulative requests.
    pub total_requests: u64,
    /// Optional per-model cost split.
    pub cost_by_model: Option<HashMap<String, f64>>,
}

/// A horizon forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagePrediction {
    /// The horizon the forecast covers.
    pub horizon: Duration,
    /// Predicted cumulative tokens at the horizon.
    pub predicted_tokens: f64,
    /// Predicted cumulative cost in USD at the horizon.
    pub predicted_cost: f64,
    /// Predicted cumulative requests at the horizon.
    pub predicted_requests: f64,
    /// Forecast confidence, `0.0..=1.0`.
    pub confidence: f64,
}

/// Direction of a usage series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageTrend {
    /// Normalized slope above +5%.
    Increasing,
    /// Normalized slope within 5% of flat.
    Stable,
    /// Normalized slope below -5%.
    Decreasing,
}

/// Budget exhaustion forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetForecast {
    /// Whether the budget is projected to run out before the end of the
    /// calendar day of the latest snapshot.
    pub will_exhaust: bool,
    /// Projected exhaustion instant, when one exists.
    pub exhaustion_time: Option<DateTime<Utc>>,
    /// Spend as a fraction of the budget.
    pub utilization: f64,
    /// EMA-derived cost burn in USD per hour.
    pub burn_rate_per_hour: f64,
    /// Operator-facing summary of where the budget stands.
    pub recommended_action: String,
}

/// A tier change the predictor recommends under budget pressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierAdjustment {
    /// The tier the request was heading to.
    pub from: ModelTier,
    /// The tier to use instead.
    pub to: ModelTier,
    /// How pressing the change is, `0.0..=1.0`.
    pub urgency: f64,
    /// Why the change is recommended.
    pub reason: String,
}

// ── UsagePredictor ─────────────────────────────────────────────────────

/// Default snapshot capacity: 24h at one-minute granularity.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 1440;

/// EMA smoothing factor for per-second rates.
const EMA_ALPHA: f64 = 0.3;

/// Regression weight in the blended forecast (EMA takes the rest).
const REGRESSION_WEIGHT: f64 = 0.6;

#[derive(Default)]
struct EmaRates {
    tokens_per_sec: Option<f64>,
    cost_per_sec: Option<f64>,
    requests_per_sec: Option<f64>,
}

struct PredictorState {
    snapshots: VecDeque<PredictionSnapshot>,
    ema: EmaRates,
}

/// Rolling time-series store with EMA and regression forecasting.
pub struct UsagePredictor {
    state: RwLock<PredictorState>,
    max_snapshots: usize,
}

impl UsagePredictor {
    /// Create a predictor with the default snapshot capacity.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PredictorState {
                snapshots: VecDeque::new(),
                ema: EmaRates::default(),
            }),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }

    /// Cap the snapshot deque (oldest evict first).
    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots.max(2);
        self
    }

    /// Record a snapshot sampled from the shared usage tracker.
    pub fn record_from(&self, usage: &UsageSnapshot) {
        self.push_snapshot(PredictionSnapshot {
            timestamp: usage.taken_at,
            total_tokens: usage.total_tokens,
            total_cost: usage.total_cost,
            total_requests: usage.total_requests,
            cost_by_model: Some(
                usage
                    .models
                    .values()
                    .map(|m| (m.model.clone(), m.total_cost))
                    .collect(),
            ),
        });
    }

    /// Append a snapshot, folding the rate since the previous one into the
    /// exponential moving averages. Rates are clamped at zero so a counter
    /// reset does not poison the EMA with a negative burn.
    pub fn push_snapshot(&self, snapshot: PredictionSnapshot) {
        let mut state = self.state.write().expect("usage predictor lock poisoned");

        let rates = state.snapshots.back().and_then(|prev| {
            let dt = (snapshot.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
            (dt > 0.0).then(|| {
                (
                    ((snapshot.total_tokens as f64 - prev.total_tokens as f64) / dt).max(0.0),
                    ((snapshot.total_cost - prev.total_cost) / dt).max(0.0),
                    ((snapshot.total_requests as f64 - prev.total_requests as f64) / dt).max(0.0),
                )
            })
        });
        if let Some((token_rate, cost_rate, request_rate)) = rates {
            fold(&mut state.ema.tokens_per_sec, token_rate);
            fold(&mut state.ema.cost_per_sec, cost_rate);
            fold(&mut state.ema.requests_per_sec, request_rate);
        }

        if state.snapshots.len() >= self.max_snapshots {
            state.snapshots.pop_front();
        }
        state.snapshots.push_back(snapshot);
    }

    /// Number of stored snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.state
            .read()
            .expect("usage predictor lock poisoned")
            .snapshots
            .len()
    }

    /// EMA cost burn in USD per hour.
    pub fn burn_rate_per_hour(&self) -> f64 {
        let state = self.state.read().expect("usage predictor lock poisoned");
        state.ema.cost_per_sec.unwrap_or(0.0) * 3600.0
    }

    /// Forecast cumulative usage at `horizon` from now. `None` with fewer
    /// than three snapshots.
    pub fn predict_usage(&self, horizon: Duration) -> Option<UsagePrediction> {
        let state = self.state.read().expect("usage predictor lock poisoned");
        if state.snapshots.len() < 3 {
            return None;
        }

        let horizon_secs = horizon.as_secs_f64();
        let horizon_hours = horizon_secs / 3600.0;
        let latest = state.snapshots.back().expect("non-empty deque");
        let first = state.snapshots.front().expect("non-empty deque");
        let span_hours =
            (latest.timestamp - first.timestamp).num_milliseconds() as f64 / 3_600_000.0;

        let blend = |value_of: &dyn Fn(&PredictionSnapshot) -> f64, ema: Option<f64>| {
            let (slope, intercept) = regression(&state.snapshots, value_of);
            let regressed = slope * (span_hours + horizon_hours) + intercept;
            let ema_projection = value_of(latest) + ema.unwrap_or(0.0) * horizon_secs;
            (REGRESSION_WEIGHT * regressed + (1.0 - REGRESSION_WEIGHT) * ema_projection).max(0.0)
        };

        let window_minutes =
            (latest.timestamp - first.timestamp).num_milliseconds() as f64 / 60_000.0;
        let density = (state.snapshots.len() as f64 / self.max_snapshots as f64).min(1.0);
        let confidence = (0.3 + 0.6 * density) * (window_minutes / 10.0).min(1.0);

        Some(UsagePrediction {
            horizon,
            predicted_tokens: blend(&|s| s.total_tokens as f64, state.ema.tokens_per_sec),
            predicted_cost: blend(&|s| s.total_cost, state.ema.cost_per_sec),
            predicted_requests: blend(&|s| s.total_requests as f64, state.ema.requests_per_sec),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Classify the cost series direction. `None` with fewer than three
    /// snapshots.
    pub fn cost_trend(&self) -> Option<UsageTrend> {
        self.trend_of(&|s| s.total_cost)
    }

    /// Classify the request series direction.
    pub fn request_trend(&self) -> Option<UsageTrend> {
        self.trend_of(&|s| s.total_requests as f64)
    }

    fn trend_of(&self, value_of: &dyn Fn(&PredictionSnapshot) -> f64) -> Option<UsageTrend> {
        let state = self.state.read().expect("usage predictor lock poisoned");
        if state.snapshots.len() < 3 {
            return None;
        }
        let (slope, _) = regression(&state.snapshots, value_of);
        let current = value_of(state.snapshots.back().expect("non-empty deque"));
        if current == 0.0 {
            return Some(UsageTrend::Stable);
        }
        let normalized = slope / current;
        Some(if normalized > 0.05 {
            UsageTrend::Increasing
        } else if normalized < -0.05 {
            UsageTrend::Decreasing
        } else {
            UsageTrend::Stable
        })
    }

    /// Project when the daily budget runs out. `None` without snapshots or
    /// without a budget (zero means unlimited).
    ///
    /// Exhaustion counts only when it lands before the end of the calendar
    /// day (UTC) of the latest snapshot -- a burn that would cross the line
    /// tomorrow is tomorrow's problem.
    pub fn budget_forecast(&self, daily_budget_usd: f64) -> Option<BudgetForecast> {
        if daily_budget_usd <= 0.0 {
            return None;
        }
        let state = self.state.read().expect("usage predictor lock poisoned");
        let latest = state.snapshots.back()?;

        let spent = latest.total_cost;
        let remaining = daily_budget_usd - spent;
        let utilization = spent / daily_budget_usd;
        let burn_per_hour = state.ema.cost_per_sec.unwrap_or(0.0) * 3600.0;

        let (will_exhaust, exhaustion_time) = if remaining <= 0.0 {
            (true, Some(Utc::now()))
        } else if burn_per_hour <= 0.0 {
            (false, None)
        } else {
            let hours_left = remaining / burn_per_hour;
            let projected = latest.timestamp
                + chrono::Duration::milliseconds((hours_left * 3_600_000.0) as i64);
            (projected < end_of_day(latest.timestamp), Some(projected))
        };

        let recommended_action = if utilization >= 0.9 {
            "budget nearly exhausted; route everything to haiku".to_string()
        } else if utilization >= 0.7 {
            "budget running low; prefer cheaper tiers".to_string()
        } else if burn_per_hour > 0.0 {
            if will_exhaust {
                "spend on track to exhaust the budget today; watch the burn rate".to_string()
            } else {
                "budget sufficient for the current burn rate".to_string()
            }
        } else {
            "no recent spend; budget idle".to_string()
        };

        debug!(utilization, burn_per_hour, will_exhaust, "budget forecast");
        Some(BudgetForecast {
            will_exhaust,
            exhaustion_time,
            utilization,
            burn_rate_per_hour: burn_per_hour,
            recommended_action,
        })
    }

    /// Recommend a tier change under budget pressure, `None` when the
    /// current tier can stand.
    pub fn tier_adjustment(
        &self,
        current: ModelTier,
        daily_budget_usd: f64,
    ) -> Option<TierAdjustment> {
        if daily_budget_usd <= 0.0 {
            return None;
        }
        let forecast = self.budget_forecast(daily_budget_usd)?;
        let utilization = forecast.utilization;
        let hours_remaining = forecast
            .exhaustion_time
            .filter(|_| forecast.will_exhaust)
            .map(|t| (t - Utc::now()).num_milliseconds() as f64 / 3_600_000.0);

        if utilization >= 0.95 {
            return (current > ModelTier::Haiku).then(|| TierAdjustment {
                from: current,
                to: ModelTier::Haiku,
                urgency: 1.0,
                reason: format!("budget {:.0}% utilized", utilization * 100.0),
            });
        }
        if utilization >= 0.80 || hours_remaining.is_some_and(|h| h > 0.0 && h < 2.0) {
            return (current > ModelTier::Haiku).then(|| TierAdjustment {
                from: current,
                to: current.downgrade(),
                urgency: 0.7,
                reason: format!(
                    "budget {:.0}% utilized, exhaustion approaching",
                    utilization * 100.0
                ),
            });
        }
        if utilization >= 0.60
            && hours_remaining.is_some_and(|h| h < 4.0)
            && current == ModelTier::Opus
        {
            return Some(TierAdjustment {
                from: current,
                to: ModelTier::Sonnet,
                urgency: 0.4,
                reason: format!(
                    "budget {:.0}% utilized with under four hours of headroom",
                    utilization * 100.0
                ),
            });
        }
        None
    }
}

impl Default for UsagePredictor {
    fn default() -> Self {
        Self::new()
    }
}

fn fold(ema: &mut Option<f64>, rate: f64) {
    *ema = Some(match *ema {
        Some(prev) => EMA_ALPHA * rate + (1.0 - EMA_ALPHA) * prev,
        None => rate,
    });
}

/// Ordinary least squares over `(hours since first snapshot, value)`.
/// Zero x-variance degenerates to a flat line at the mean.
fn regression(
    snapshots: &VecDeque<PredictionSnapshot>,
    value_of: &dyn Fn(&PredictionSnapshot) -> f64,
) -> (f64, f64) {
    let first = match snapshots.front() {
        Some(first) => first.timestamp,
        None => return (0.0, 0.0),
    };
    let n = snapshots.len() as f64;

    let points: Vec<(f64, f64)> = snapshots
        .iter()
        .map(|s| {
            let hours = (s.timestamp - first).num_milliseconds() as f64 / 3_600_000.0;
            (hours, value_of(s))
        })
        .collect();

    let mean_x: f64 = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y: f64 = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let var_x: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if var_x == 0.0 {
        return (0.0, mean_y);
    }
    let cov: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = cov / var_x;
    (slope, mean_y - slope * mean_x)
}

/// Midnight UTC at the end of the given instant's calendar day.
fn end_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    let next = instant.date_naive().succ_opt().unwrap_or(instant.date_naive());
    Utc.with_ymd_and_hms(next.year(), next.month(), next.day(), 0, 0, 0)
        .single()
        .unwrap_or(instant)
}

// ── Tests ──────────────────────────────────────────────────────────────
