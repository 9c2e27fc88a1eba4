// =============================================================================
// Outcome Grader — periodic pass over open predictions
// =============================================================================
//
// Runs on the learning-cycle schedule, not continuously. For each pending
// entry it fetches the current price, updates the running excursion extrema
// and hit flags, and writes a terminal state when a threshold is crossed:
//
//   Loss     price at or below the stop
//   Win      price at or above the first target
//   Win      time box expired with unrealised P&L > 0
//   Neutral  time box expired with unrealised P&L <= 0
//
// Entries are processed sequentially with a small delay between price
// fetches (provider rate limits); no lock is held across that I/O. A price
// failure leaves the entry pending for the next cycle; a persistence
// failure aborts that entry only.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::FusionError;
use crate::ledger::{PredictionLedger, TradePrediction};
use crate::providers::PriceProvider;
use crate::types::PredictionState;

/// Result of one full grading pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GradeSummary {
    /// Pending entries examined.
    pub evaluated: usize,
    pub wins: usize,
    pub losses: usize,
    pub neutrals: usize,
    /// Entries skipped because no price was available.
    pub skipped: usize,
    /// Entries whose journal write failed.
    pub persist_failures: usize,
}

pub struct OutcomeGrader {
    provider: Arc<dyn PriceProvider>,
}

impl OutcomeGrader {
    pub fn new(provider: Arc<dyn PriceProvider>) -> Self {
        Self { provider }
    }

    /// Grade every pending entry in the ledger once.
    pub async fn grade_open_predictions(
        &self,
        ledger: &PredictionLedger,
        time_box_days: i64,
        delay_ms: u64,
    ) -> GradeSummary {
        let pending = ledger.pending();
        let mut summary = GradeSummary::default();

        if pending.is_empty() {
            debug!("grader: no pending predictions");
            return summary;
        }

        info!(count = pending.len(), "grading pass started");

        for mut prediction in pending {
            summary.evaluated += 1;

            let price = match self.provider.get_price(&prediction.ticker).await {
                Ok(point) => point.price,
                Err(e) => {
                    debug!(
                        id = %prediction.id,
                        ticker = %prediction.ticker,
                        error = %e,
                        "price unavailable; entry stays pending"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            apply_price_pass(&mut prediction, price, Utc::now(), time_box_days);

            if prediction.state.is_terminal() {
                info!(
                    id = %prediction.id,
                    ticker = %prediction.ticker,
                    state = %prediction.state,
                    pnl_pct = format!("{:+.2}", prediction.pnl_pct),
                    days_held = prediction.days_held,
                    mfe = format!("{:.2}", prediction.max_favorable_excursion),
                    mae = format!("{:.2}", prediction.max_adverse_excursion),
                    "prediction graded terminal"
                );
            }

            let new_state = prediction.state;
            match ledger.commit(prediction) {
                Ok(true) => match new_state {
                    PredictionState::Win => summary.wins += 1,
                    PredictionState::Loss => summary.losses += 1,
                    PredictionState::Neutral => summary.neutrals += 1,
                    PredictionState::Pending => {}
                },
                Ok(false) => {}
                Err(e @ FusionError::PersistenceFailure { .. }) => {
                    warn!(error = %e, "grading write failed; entry will be retried");
                    summary.persist_failures += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "unexpected grading error");
                    continue;
                }
            }

            // Courtesy delay between provider calls. No lock is held here.
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }

        info!(
            evaluated = summary.evaluated,
            wins = summary.wins,
            losses = summary.losses,
            neutrals = summary.neutrals,
            skipped = summary.skipped,
            "grading pass complete"
        );

        summary
    }
}

/// Apply one observed price to a prediction: excursions, hit flags, P&L,
/// days held, and (possibly) a terminal state.
///
/// Excursion invariants: `max_favorable_excursion` never decreases across
/// passes and `max_adverse_excursion` (<= 0) never increases, so the
/// recorded extrema are running bests/worsts regardless of pass order.
pub fn apply_price_pass(
    prediction: &mut TradePrediction,
    price: f64,
    now: DateTime<Utc>,
    time_box_days: i64,
) {
    if prediction.state.is_terminal() {
        // Terminal entries are immutable; re-grading is a no-op.
        return;
    }

    let entry = prediction.entry_price;
    let pnl_pct = if entry > 0.0 {
        (price - entry) / entry * 100.0
    } else {
        0.0
    };

    prediction.last_price = Some(price);
    prediction.pnl_pct = pnl_pct;
    prediction.max_favorable_excursion = prediction.max_favorable_excursion.max(pnl_pct);
    prediction.max_adverse_excursion = prediction.max_adverse_excursion.min(pnl_pct);

    if let Ok(created) = DateTime::parse_from_rfc3339(&prediction.created_at) {
        prediction.days_held = (now - created.with_timezone(&Utc)).num_days();
    }

    // Sticky hit flags.
    if price >= prediction.take_profit_1 {
        prediction.hit_flags.tp1 = true;
    }
    if price >= prediction.take_profit_2 {
        prediction.hit_flags.tp2 = true;
    }
    if price >= prediction.take_profit_3 {
        prediction.hit_flags.tp3 = true;
    }
    if price <= prediction.stop_loss {
        prediction.hit_flags.stop = true;
    }

    // Terminal thresholds. A single observed price can only be on one side
    // of entry, so stop and target cannot fire together.
    let terminal = if price <= prediction.stop_loss {
        Some(PredictionState::Loss)
    } else if price >= prediction.take_profit_1 {
        Some(PredictionState::Win)
    } else if prediction.days_held >= time_box_days {
        if pnl_pct > 0.0 {
            Some(PredictionState::Win)
        } else {
            Some(PredictionState::Neutral)
        }
    } else {
        None
    };

    prediction.graded_at = Some(now.to_rfc3339());

    if let Some(state) = terminal {
        prediction.state = state;
        prediction.terminal_at = Some(now.to_rfc3339());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StaticPriceProvider;
    use crate::store::LedgerStore;

    fn temp_ledger() -> (PredictionLedger, std::path::PathBuf) {
        let path =
            std::env::temp_dir().join(format!("meridian-grade-{}.jsonl", uuid::Uuid::new_v4()));
        let ledger = PredictionLedger::open(LedgerStore::new(&path)).unwrap();
        (ledger, path)
    }

    #[test]
    fn tp1_before_stop_is_win() {
        // Entry 100, stop 95, tp1 110; price touches 110.
        let mut p = TradePrediction::sample("NVDA", 100.0);
        p.stop_loss = 95.0;
        p.take_profit_1 = 110.0;

        apply_price_pass(&mut p, 110.0, Utc::now(), 14);
        assert_eq!(p.state, PredictionState::Win);
        assert!((p.pnl_pct - 10.0).abs() < 1e-9);
        assert!(p.hit_flags.tp1);
        assert!(!p.hit_flags.stop);
    }

    #[test]
    fn stop_before_tp1_is_loss() {
        let mut p = TradePrediction::sample("NVDA", 100.0);
        p.stop_loss = 95.0;
        p.take_profit_1 = 110.0;

        apply_price_pass(&mut p, 94.0, Utc::now(), 14);
        assert_eq!(p.state, PredictionState::Loss);
        assert!(p.pnl_pct < 0.0);
        assert!(p.hit_flags.stop);
    }

    #[test]
    fn excursions_are_monotonic_across_passes() {
        let mut p = TradePrediction::sample("NVDA", 100.0);
        p.stop_loss = 80.0;
        p.take_profit_1 = 140.0;

        apply_price_pass(&mut p, 108.0, Utc::now(), 14);
        assert!((p.max_favorable_excursion - 8.0).abs() < 1e-9);

        apply_price_pass(&mut p, 97.0, Utc::now(), 14);
        // MFE kept its high-water mark, MAE recorded the dip.
        assert!((p.max_favorable_excursion - 8.0).abs() < 1e-9);
        assert!((p.max_adverse_excursion - -3.0).abs() < 1e-9);

        apply_price_pass(&mut p, 103.0, Utc::now(), 14);
        // Neither extremum retreats on a middling print.
        assert!((p.max_favorable_excursion - 8.0).abs() < 1e-9);
        assert!((p.max_adverse_excursion - -3.0).abs() < 1e-9);
        assert_eq!(p.state, PredictionState::Pending);
    }

    #[test]
    fn expiry_with_gain_is_win_with_loss_is_neutral() {
        let mut winner = TradePrediction::sample("NVDA", 100.0);
        winner.stop_loss = 80.0;
        winner.take_profit_1 = 150.0;
        winner.created_at = (Utc::now() - chrono::Duration::days(15)).to_rfc3339();
        apply_price_pass(&mut winner, 104.0, Utc::now(), 14);
        assert_eq!(winner.state, PredictionState::Win);

        let mut stale = TradePrediction::sample("AMD", 100.0);
        stale.stop_loss = 80.0;
        stale.take_profit_1 = 150.0;
        stale.created_at = (Utc::now() - chrono::Duration::days(15)).to_rfc3339();
        apply_price_pass(&mut stale, 99.0, Utc::now(), 14);
        assert_eq!(stale.state, PredictionState::Neutral);
    }

    #[test]
    fn terminal_entry_pass_is_noop() {
        let mut p = TradePrediction::sample("NVDA", 100.0);
        p.state = PredictionState::Win;
        p.pnl_pct = 10.0;
        let before = p.clone();

        apply_price_pass(&mut p, 50.0, Utc::now(), 14);
        assert_eq!(p.state, before.state);
        assert_eq!(p.pnl_pct, before.pnl_pct);
        assert_eq!(p.last_price, before.last_price);
    }

    #[tokio::test]
    async fn missing_price_leaves_entry_pending() {
        let (ledger, path) = temp_ledger();
        ledger.insert(TradePrediction::sample("DARK", 100.0)).unwrap();

        let provider = Arc::new(StaticPriceProvider::new());
        let grader = OutcomeGrader::new(provider);

        let summary = grader.grade_open_predictions(&ledger, 14, 0).await;
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(ledger.pending().len(), 1);

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn full_pass_grades_and_persists() {
        let (ledger, path) = temp_ledger();

        let mut p = TradePrediction::sample("NVDA", 100.0);
        p.stop_loss = 95.0;
        p.take_profit_1 = 110.0;
        let id = p.id.clone();
        ledger.insert(p).unwrap();

        let provider = Arc::new(StaticPriceProvider::new());
        provider.set_price("NVDA", 111.0);
        let grader = OutcomeGrader::new(provider);

        grader.grade_open_predictions(&ledger, 14, 0).await;

        let graded = ledger.get(&id).unwrap();
        assert_eq!(graded.state, PredictionState::Win);
        assert!(ledger.pending().is_empty());

        std::fs::remove_file(path).ok();
    }
}
