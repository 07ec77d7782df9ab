use crate::allocation::AllocationSnapshot;
use crate::decimal::{fixed_string, parse_decimal};
use crate::domain::alert::{AlertPreferences, AlertSeverity, AlertType};
use crate::domain::portfolio::ClassTarget;
use crate::domain::score::StoredScore;
use crate::storage::alerts::{AlertStore, NewAlert};
use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

/// A not-held asset must out-score a held one by at least this much before
/// an opportunity alert is raised.
const OPPORTUNITY_MIN_GAP: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// An existing opportunity alert is rewritten only when the score gap moved
/// by at least this much; smaller moves are suppressed as churn.
const OPPORTUNITY_UPDATE_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Same churn guard for drift alerts, in percentage points.
const DRIFT_UPDATE_TOLERANCE: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DetectionCounts {
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
    pub suppressed: usize,
}

impl DetectionCounts {
    pub fn absorb(&mut self, other: DetectionCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.resolved += other.resolved;
        self.suppressed += other.suppressed;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertDetectionOutcome {
    pub users_processed: usize,
    pub failures: usize,
    #[serde(flatten)]
    pub counts: DetectionCounts,
}

/// Magnitude moved enough to justify rewriting an existing alert?
fn beyond_tolerance(existing: Decimal, fresh: Decimal, tolerance: Decimal) -> bool {
    (fresh - existing).abs() >= tolerance
}

fn stored_magnitude(metadata: &serde_json::Value, key: &str) -> Option<Decimal> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| parse_decimal(s).ok())
}

/// Opportunity pass for one user: each held asset is compared to the best
/// not-held asset in its class; a gap of 10+ points raises (or refreshes) an
/// alert keyed by the asset pair. Alerts whose "better" asset got bought are
/// dismissed.
pub async fn detect_opportunities_for_user(
    store: &dyn AlertStore,
    user_id: Uuid,
    scores: &[StoredScore],
    held_asset_ids: &HashSet<Uuid>,
) -> Result<DetectionCounts> {
    let mut counts = DetectionCounts::default();

    let prefs = store.preferences(user_id).await?;

    // Buying the suggested asset resolves its alert even when the detector
    // is later switched off.
    for alert in store
        .active_for_user(user_id, AlertType::Opportunity)
        .await?
    {
        let candidate = alert
            .metadata
            .get("candidate_asset_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        if let Some(candidate) = candidate {
            if held_asset_ids.contains(&candidate) {
                store.dismiss(alert.id).await?;
                counts.resolved += 1;
            }
        }
    }

    if !prefs.opportunity_alerts_enabled {
        return Ok(counts);
    }

    for held in scores.iter().filter(|s| held_asset_ids.contains(&s.asset_id)) {
        let best = scores
            .iter()
            .filter(|s| s.class_id == held.class_id && !held_asset_ids.contains(&s.asset_id))
            .max_by(|a, b| a.score.cmp(&b.score).then(b.symbol.cmp(&a.symbol)));
        let Some(best) = best else {
            continue;
        };

        let gap = best.score - held.score;
        if gap < OPPORTUNITY_MIN_GAP {
            continue;
        }

        let subject_key = format!("{}->{}", held.asset_id, best.asset_id);
        let title = format!("{} scores higher than your {}", best.symbol, held.symbol);
        let message = format!(
            "{} scores {} vs your {} ({}). Consider swapping?",
            best.symbol,
            fixed_string(best.score, 2),
            held.symbol,
            fixed_string(held.score, 2),
        );
        let metadata = json!({
            "held_asset_id": held.asset_id.to_string(),
            "candidate_asset_id": best.asset_id.to_string(),
            "held_score": fixed_string(held.score, 2),
            "candidate_score": fixed_string(best.score, 2),
            "score_gap": fixed_string(gap, 2),
        });

        match store
            .find_active(user_id, AlertType::Opportunity, &subject_key)
            .await?
        {
            None => {
                store
                    .insert(NewAlert {
                        user_id,
                        alert_type: AlertType::Opportunity,
                        severity: AlertSeverity::Info,
                        subject_key,
                        title,
                        message,
                        metadata,
                    })
                    .await?;
                counts.created += 1;
            }
            Some(existing) => {
                let previous_gap =
                    stored_magnitude(&existing.metadata, "score_gap").unwrap_or(Decimal::ZERO);
                if beyond_tolerance(previous_gap, gap, OPPORTUNITY_UPDATE_TOLERANCE) {
                    store
                        .update_content(
                            existing.id,
                            AlertSeverity::Info,
                            &title,
                            &message,
                            metadata,
                        )
                        .await?;
                    counts.updated += 1;
                } else {
                    counts.suppressed += 1;
                }
            }
        }
    }

    Ok(counts)
}

/// Drift pass for one user: a class outside its [min, max] target by at
/// least the user's threshold raises a drift alert keyed by the class;
/// returning in-range dismisses it.
pub async fn detect_drift_for_user(
    store: &dyn AlertStore,
    user_id: Uuid,
    targets: &[ClassTarget],
    allocation: &AllocationSnapshot,
    prefs: &AlertPreferences,
) -> Result<DetectionCounts> {
    let mut counts = DetectionCounts::default();
    let threshold = prefs.drift_threshold;

    for target in targets {
        let current = allocation
            .percent_by_class
            .get(&target.class_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let subject_key = target.class_id.to_string();

        let drift = if current < target.target_min {
            target.target_min - current
        } else if current > target.target_max {
            current - target.target_max
        } else {
            // Back inside the range: resolve any standing alert.
            if let Some(alert) = store
                .find_active(user_id, AlertType::AllocationDrift, &subject_key)
                .await?
            {
                store.dismiss(alert.id).await?;
                counts.resolved += 1;
            }
            continue;
        };

        if !prefs.drift_alerts_enabled || drift < threshold {
            continue;
        }

        let severity = if drift >= threshold * Decimal::TWO {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };

        let title = format!("Your {} allocation is off target", target.class_name);
        let message = format!(
            "{} is at {}%, outside its {}%-{}% target range (drift {}%).",
            target.class_name,
            fixed_string(current, 2),
            target.target_min,
            target.target_max,
            fixed_string(drift, 2),
        );
        let metadata = json!({
            "class_id": target.class_id.to_string(),
            "class_name": target.class_name,
            "current_allocation": fixed_string(current, 2),
            "target_min": target.target_min.to_string(),
            "target_max": target.target_max.to_string(),
            "drift_amount": fixed_string(drift, 2),
        });

        match store
            .find_active(user_id, AlertType::AllocationDrift, &subject_key)
            .await?
        {
            None => {
                store
                    .insert(NewAlert {
                        user_id,
                        alert_type: AlertType::AllocationDrift,
                        severity,
                        subject_key,
                        title,
                        message,
                        metadata,
                    })
                    .await?;
                counts.created += 1;
            }
            Some(existing) => {
                let previous =
                    stored_magnitude(&existing.metadata, "drift_amount").unwrap_or(Decimal::ZERO);
                if beyond_tolerance(previous, drift, DRIFT_UPDATE_TOLERANCE) {
                    store
                        .update_content(existing.id, severity, &title, &message, metadata)
                        .await?;
                    counts.updated += 1;
                } else {
                    counts.suppressed += 1;
                }
            }
        }
    }

    Ok(counts)
}
