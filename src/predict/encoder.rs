use super::model::{Vocabularies, FEATURE_COUNT};
use crate::error::{AtlasError, Result};
use serde::Deserialize;

/// One gamer profile as submitted for prediction. Categorical fields are free
/// text and matched case-insensitively against the model vocabularies.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub age: f64,
    pub gender: String,
    pub location: String,
    pub game_genre: String,
    pub play_time_hours: f64,
    pub in_game_purchases: bool,
    pub game_difficulty: String,
    pub sessions_per_week: f64,
    pub avg_session_duration_minutes: f64,
    pub player_level: f64,
    pub achievements_unlocked: f64,
}

/// Ranges the training data covered. Inputs outside a range are clamped to
/// its edge and the clamp is surfaced as a flag on the prediction.
const NUMERIC_BOUNDS: [(&str, f64, f64); 6] = [
    ("age", 10.0, 100.0),
    ("play_time_hours", 0.0, 100.0),
    ("sessions_per_week", 0.0, 50.0),
    ("avg_session_duration_minutes", 1.0, 500.0),
    ("player_level", 1.0, 100.0),
    ("achievements_unlocked", 0.0, 100.0),
];

fn clamp(name: &'static str, value: f64, flags: &mut Vec<String>) -> f64 {
    let (_, lo, hi) = NUMERIC_BOUNDS
        .iter()
        .find(|(n, _, _)| *n == name)
        .copied()
        .unwrap_or((name, f64::MIN, f64::MAX));
    if value < lo {
        flags.push(format!("{name} clamped from {value} to {lo}"));
        lo
    } else if value > hi {
        flags.push(format!("{name} clamped from {value} to {hi}"));
        hi
    } else {
        value
    }
}

/// Turn a profile into the fixed feature vector the classifier expects.
/// Rejects non-finite numbers; out-of-range numbers clamp with a flag and
/// unseen categories fall into the unknown bucket with a flag.
pub fn encode(profile: &UserProfile, vocab: &Vocabularies) -> Result<([f64; FEATURE_COUNT], Vec<String>)> {
    let numerics = [
        ("age", profile.age),
        ("play_time_hours", profile.play_time_hours),
        ("sessions_per_week", profile.sessions_per_week),
        (
            "avg_session_duration_minutes",
            profile.avg_session_duration_minutes,
        ),
        ("player_level", profile.player_level),
        ("achievements_unlocked", profile.achievements_unlocked),
    ];
    for (name, value) in numerics {
        if !value.is_finite() {
            return Err(AtlasError::InvalidProfile(format!(
                "{name} must be a finite number"
            )));
        }
    }

    let mut flags = Vec::new();
    for (field, value) in [
        ("gender", &profile.gender),
        ("location", &profile.location),
        ("game_genre", &profile.game_genre),
        ("game_difficulty", &profile.game_difficulty),
    ] {
        if value.trim().is_empty() {
            return Err(AtlasError::InvalidProfile(format!("{field} is empty")));
        }
        if !vocab.is_known(field, value) {
            flags.push(format!("unseen {field} '{}'", value.trim()));
        }
    }

    let features = [
        clamp("age", profile.age, &mut flags),
        vocab.encode("gender", &profile.gender),
        vocab.encode("location", &profile.location),
        vocab.encode("game_genre", &profile.game_genre),
        clamp("play_time_hours", profile.play_time_hours, &mut flags),
        if profile.in_game_purchases { 1.0 } else { 0.0 },
        vocab.encode("game_difficulty", &profile.game_difficulty),
        clamp("sessions_per_week", profile.sessions_per_week, &mut flags),
        clamp(
            "avg_session_duration_minutes",
            profile.avg_session_duration_minutes,
            &mut flags,
        ),
        clamp("player_level", profile.player_level, &mut flags),
        clamp("achievements_unlocked", profile.achievements_unlocked, &mut flags),
    ];
    Ok((features, flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::model::test_artifact;

    fn profile() -> UserProfile {
        UserProfile {
            age: 27.0,
            gender: "Female".into(),
            location: "Europe".into(),
            game_genre: "Strategy".into(),
            play_time_hours: 14.5,
            in_game_purchases: true,
            game_difficulty: "Medium".into(),
            sessions_per_week: 6.0,
            avg_session_duration_minutes: 95.0,
            player_level: 42.0,
            achievements_unlocked: 18.0,
        }
    }

    #[test]
    fn in_range_profile_encodes_without_flags() {
        let vocab = test_artifact().vocab;
        let (features, flags) = encode(&profile(), &vocab).unwrap();
        assert!(flags.is_empty());
        assert_eq!(features[0], 27.0);
        assert_eq!(features[1], 0.0); // Female
        assert_eq!(features[2], 1.0); // Europe
        assert_eq!(features[5], 1.0); // purchases
    }

    #[test]
    fn out_of_range_numbers_clamp_and_flag() {
        let vocab = test_artifact().vocab;
        let mut p = profile();
        p.age = 7.0;
        p.sessions_per_week = 90.0;
        let (features, flags) = encode(&p, &vocab).unwrap();
        assert_eq!(features[0], 10.0);
        assert_eq!(features[7], 50.0);
        assert_eq!(flags.len(), 2);
        assert!(flags[0].contains("age"));
    }

    #[test]
    fn unseen_category_flags_but_still_encodes() {
        let vocab = test_artifact().vocab;
        let mut p = profile();
        p.location = "Antarctica".into();
        let (features, flags) = encode(&p, &vocab).unwrap();
        assert_eq!(features[2], 3.0); // unknown bucket past the 3 known values
        assert!(flags.iter().any(|f| f.contains("unseen location")));
    }

    #[test]
    fn non_finite_number_is_invalid_profile() {
        let vocab = test_artifact().vocab;
        let mut p = profile();
        p.player_level = f64::NAN;
        let err = encode(&p, &vocab).unwrap_err();
        assert!(matches!(err, AtlasError::InvalidProfile(_)));
    }

    #[test]
    fn empty_category_is_invalid_profile() {
        let vocab = test_artifact().vocab;
        let mut p = profile();
        p.game_genre = "  ".into();
        let err = encode(&p, &vocab).unwrap_err();
        assert!(matches!(err, AtlasError::InvalidProfile(_)));
    }
}
