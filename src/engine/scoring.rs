use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::geo::proximity_score;
use crate::models::courier::Courier;

const MAX_RECENCY_BONUS: f64 = 50.0;
const RATING_WEIGHT: f64 = 5.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoreBreakdown {
    pub proximity_score: u32,
    pub recency_score: f64,
    pub rating_score: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.proximity_score as f64 + self.recency_score + self.rating_score
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedCourier {
    pub courier_id: Uuid,
    pub name: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

pub fn compute_score(courier: &Courier, order_zone: &str, now: DateTime<Utc>) -> ScoreBreakdown {
    ScoreBreakdown {
        proximity_score: proximity_score(&courier.working_areas, order_zone),
        recency_score: recency_score(courier.last_active_at, now),
        rating_score: courier.rating.max(0.0) * RATING_WEIGHT,
    }
}

/// 50 for a courier active right now, one point less per idle minute.
fn recency_score(last_active_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let idle_minutes = (now - last_active_at).num_seconds().max(0) as f64 / 60.0;
    MAX_RECENCY_BONUS - idle_minutes.min(MAX_RECENCY_BONUS)
}

/// Scores `candidates`, drops those with no zone relation to `order_zone`,
/// and keeps the best `limit`, highest first.
pub fn rank_candidates(
    candidates: &[Courier],
    order_zone: &str,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<RankedCourier> {
    let mut ranked: Vec<RankedCourier> = candidates
        .iter()
        .map(|courier| {
            let breakdown = compute_score(courier, order_zone, now);
            RankedCourier {
                courier_id: courier.id,
                name: courier.name.clone(),
                score: breakdown.total(),
                breakdown,
            }
        })
        .filter(|ranked| ranked.breakdown.proximity_score > 0)
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{compute_score, rank_candidates};
    use crate::models::courier::{AccountStatus, Courier};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn courier(id_seed: u128, zones: &[&str], rating: f64, idle_minutes: i64) -> Courier {
        Courier {
            id: Uuid::from_u128(id_seed),
            user_id: Uuid::new_v4(),
            name: format!("courier-{id_seed}"),
            phone: "+962700000000".to_string(),
            plate_number: None,
            working_areas: zones.iter().map(|zone| zone.to_string()).collect::<BTreeSet<_>>(),
            location: None,
            account_status: AccountStatus::Approved,
            is_available: true,
            block: None,
            rating,
            total_deliveries: 0,
            pending_settlement: Decimal::ZERO,
            current_order_id: None,
            last_settled_at: None,
            last_active_at: now() - Duration::minutes(idle_minutes),
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn composite_score_adds_proximity_recency_and_rating() {
        let score = compute_score(&courier(1, &["عبدون"], 4.0, 10), "خلدا", now());

        assert_eq!(score.proximity_score, 75);
        assert!((score.recency_score - 40.0).abs() < 1e-9);
        assert!((score.rating_score - 20.0).abs() < 1e-9);
        assert!((score.total() - 135.0).abs() < 1e-9);
    }

    #[test]
    fn recency_bonus_bottoms_out_at_zero() {
        let score = compute_score(&courier(1, &["خلدا"], 0.0, 600), "خلدا", now());
        assert_eq!(score.recency_score, 0.0);
    }

    #[test]
    fn couriers_without_zone_relation_are_dropped() {
        let ranked = rank_candidates(
            &[courier(1, &["الزرقاء"], 5.0, 0), courier(2, &["خلدا"], 1.0, 30)],
            "خلدا",
            now(),
            5,
        );

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].courier_id, Uuid::from_u128(2));
    }

    #[test]
    fn ranking_is_descending_and_capped() {
        let candidates: Vec<Courier> = (1..=7)
            .map(|seed| courier(seed, &["خلدا"], seed as f64 * 0.5, 0))
            .collect();

        let ranked = rank_candidates(&candidates, "خلدا", now(), 5);

        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].courier_id, Uuid::from_u128(7));
        assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn direct_zone_beats_neighbour_with_equal_activity_and_rating() {
        let ranked = rank_candidates(
            &[courier(1, &["عبدون"], 4.5, 5), courier(2, &["خلدا"], 4.5, 5)],
            "خلدا",
            now(),
            5,
        );

        assert_eq!(ranked[0].courier_id, Uuid::from_u128(2));
        assert_eq!(ranked[1].courier_id, Uuid::from_u128(1));
    }
}
