//! Coarse zone adjacency for matching couriers to orders.
//!
//! Zones are the named Amman delivery areas couriers declare when they
//! register. Each zone lists its direct neighbours; a courier working a
//! neighbour-of-a-neighbour still counts as nearby, just less so.

use std::collections::BTreeSet;

pub const DIRECT_MATCH: u32 = 100;
pub const ADJACENT_MATCH: u32 = 75;
pub const SECOND_DEGREE_MATCH: u32 = 50;
pub const NO_MATCH: u32 = 0;

const AREA_ADJACENCY: &[(&str, &[&str])] = &[
    ("وسط البلد", &["جبل عمان", "جبل الحسين", "الشميساني", "الهاشمي"]),
    ("جبل عمان", &["وسط البلد", "الشميساني", "عبدون", "الرابية"]),
    ("جبل الحسين", &["وسط البلد", "الشميساني", "طبربور"]),
    ("الشميساني", &["وسط البلد", "جبل عمان", "جبل الحسين", "عبدون"]),
    ("عبدون", &["الشميساني", "جبل عمان", "الرابية", "خلدا"]),
    ("الرابية", &["عبدون", "جبل عمان", "خلدا", "الجبيهة"]),
    ("خلدا", &["عبدون", "الرابية", "الجبيهة", "صويلح"]),
    ("الجبيهة", &["خلدا", "الرابية", "صويلح", "شفا بدران"]),
    ("صويلح", &["الجبيهة", "خلدا", "شفا بدران", "أبو نصير"]),
    ("طبربور", &["جبل الحسين", "ماركا", "الهاشمي"]),
    ("ماركا", &["طبربور", "الهاشمي", "الزرقاء"]),
    ("الهاشمي", &["وسط البلد", "طبربور", "ماركا"]),
    ("أبو نصير", &["صويلح", "شفا بدران", "الجبيهة"]),
    ("شفا بدران", &["أبو نصير", "صويلح", "الجبيهة"]),
    ("المدينة الرياضية", &["الشميساني", "وسط البلد"]),
    ("الزرقاء", &["ماركا"]),
    ("السلط", &["صويلح"]),
];

/// Declared 1-hop neighbours of `zone`. Unknown zones have none.
pub fn neighbors(zone: &str) -> &'static [&'static str] {
    AREA_ADJACENCY
        .iter()
        .find(|(name, _)| *name == zone)
        .map(|(_, adjacent)| *adjacent)
        .unwrap_or(&[])
}

pub fn is_known_zone(zone: &str) -> bool {
    AREA_ADJACENCY.iter().any(|(name, _)| *name == zone)
}

/// Scores a courier's declared zones against an order's zone: 100 for the
/// zone itself, 75 for a declared neighbour, 50 for a neighbour of a
/// neighbour, 0 otherwise.
pub fn proximity_score(courier_zones: &BTreeSet<String>, order_zone: &str) -> u32 {
    if courier_zones.contains(order_zone) {
        return DIRECT_MATCH;
    }

    let adjacent = neighbors(order_zone);
    if adjacent.iter().any(|zone| courier_zones.contains(*zone)) {
        return ADJACENT_MATCH;
    }

    let second_degree = adjacent
        .iter()
        .flat_map(|zone| neighbors(zone).iter())
        .any(|zone| courier_zones.contains(*zone));
    if second_degree {
        return SECOND_DEGREE_MATCH;
    }

    NO_MATCH
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{is_known_zone, neighbors, proximity_score};

    fn zones(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn direct_zone_scores_100() {
        assert_eq!(proximity_score(&zones(&["خلدا", "عبدون"]), "خلدا"), 100);
    }

    #[test]
    fn declared_neighbour_scores_75() {
        assert_eq!(proximity_score(&zones(&["جبل عمان"]), "وسط البلد"), 75);
        assert_eq!(proximity_score(&zones(&["عبدون"]), "خلدا"), 75);
    }

    #[test]
    fn neighbour_of_neighbour_scores_50() {
        // خلدا -> الجبيهة -> شفا بدران
        assert_eq!(proximity_score(&zones(&["شفا بدران"]), "خلدا"), 50);
    }

    #[test]
    fn unrelated_zone_scores_0() {
        assert_eq!(proximity_score(&zones(&["الزرقاء"]), "خلدا"), 0);
        assert_eq!(proximity_score(&BTreeSet::new(), "خلدا"), 0);
    }

    #[test]
    fn unknown_order_zone_only_matches_directly() {
        assert!(!is_known_zone("Narnia"));
        assert!(neighbors("Narnia").is_empty());
        assert_eq!(proximity_score(&zones(&["Narnia"]), "Narnia"), 100);
        assert_eq!(proximity_score(&zones(&["خلدا"]), "Narnia"), 0);
    }

    #[test]
    fn best_relation_wins_across_several_zones() {
        assert_eq!(proximity_score(&zones(&["الزرقاء", "الرابية"]), "خلدا"), 75);
    }
}
