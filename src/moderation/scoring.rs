//! Suspicion scoring for user profiles
//!
//! Pure and deterministic: the score depends only on the snapshot. Points are
//! summed as integers out of 100 and converted to a fraction once, so the same
//! signals always produce the same `f64`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bait channels are fresh: a handful of posts at most
pub const BAIT_MAX_POSTS: i64 = 3;

/// Wording typical of spam/bait profiles, matched case-insensitively as whole
/// words so "earn" does not fire on "learn" or "Earnest"
const PROMO_WORDS: &[&str] = &[
    "crypto",
    "cryptocurrency",
    "earn",
    "earnings",
    "profit",
    "profits",
    "invest",
    "investing",
    "investment",
    "investments",
    "casino",
    "bonus",
    "giveaway",
    "free money",
    "dating",
    "18+",
];

/// Cyrillic stems, matched as substrings to cover inflected forms
const PROMO_STEMS: &[&str] = &["заработ", "доход", "казино", "бесплатно", "инвест", "крипт"];

const INVITE_MARKERS: &[&str] = &["t.me/+", "t.me/joinchat", "telegram.me/joinchat"];
const LINK_MARKERS: &[&str] = &["http://", "https://", "t.me/", "www."];

/// Channel linked from a user's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedChannel {
    pub chat_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub post_count: i64,
}

/// What the platform glue knows about a user at analysis time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub user_id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub has_photo: bool,
    #[serde(default)]
    pub linked_channel: Option<LinkedChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    /// Linked channel with promotional wording and almost no posts
    BaitChannel,
    SparseChannel,
    PromoKeywords,
    LinkInBio,
    InviteLinkInBio,
    NoProfilePhoto,
    DigitHeavyUsername,
    NoUsername,
}

impl SuspicionReason {
    pub fn points(&self) -> u32 {
        match self {
            SuspicionReason::BaitChannel => 40,
            SuspicionReason::SparseChannel => 15,
            SuspicionReason::PromoKeywords => 20,
            SuspicionReason::LinkInBio => 15,
            SuspicionReason::InviteLinkInBio => 25,
            SuspicionReason::NoProfilePhoto => 10,
            SuspicionReason::DigitHeavyUsername => 10,
            SuspicionReason::NoUsername => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionReason::BaitChannel => "bait_channel",
            SuspicionReason::SparseChannel => "sparse_channel",
            SuspicionReason::PromoKeywords => "promo_keywords",
            SuspicionReason::LinkInBio => "link_in_bio",
            SuspicionReason::InviteLinkInBio => "invite_link_in_bio",
            SuspicionReason::NoProfilePhoto => "no_profile_photo",
            SuspicionReason::DigitHeavyUsername => "digit_heavy_username",
            SuspicionReason::NoUsername => "no_username",
        }
    }
}

impl fmt::Display for SuspicionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspicionReport {
    /// In [0, 1]
    pub score: f64,
    /// Ordered as the signals are evaluated
    pub reasons: Vec<SuspicionReason>,
}

impl SuspicionReport {
    /// Comma-separated reason list, stored as the profile's pattern text
    pub fn patterns(&self) -> String {
        self.reasons
            .iter()
            .map(SuspicionReason::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn has(&self, reason: SuspicionReason) -> bool {
        self.reasons.contains(&reason)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SuspicionScorer;

impl SuspicionScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, snapshot: &ProfileSnapshot) -> SuspicionReport {
        let mut reasons = Vec::new();

        if let Some(channel) = &snapshot.linked_channel
            && channel.post_count <= BAIT_MAX_POSTS
        {
            let channel_text = format!(
                "{} {}",
                channel.title,
                channel.description.as_deref().unwrap_or_default()
            );
            if has_promo_wording(&channel_text) {
                reasons.push(SuspicionReason::BaitChannel);
            } else {
                reasons.push(SuspicionReason::SparseChannel);
            }
        }

        let profile_text = format!(
            "{} {} {}",
            snapshot.first_name,
            snapshot.last_name.as_deref().unwrap_or_default(),
            snapshot.bio.as_deref().unwrap_or_default()
        );
        if has_promo_wording(&profile_text) {
            reasons.push(SuspicionReason::PromoKeywords);
        }

        if let Some(bio) = snapshot.bio.as_deref() {
            if contains_any(bio, INVITE_MARKERS) {
                reasons.push(SuspicionReason::InviteLinkInBio);
            } else if contains_any(bio, LINK_MARKERS) {
                reasons.push(SuspicionReason::LinkInBio);
            }
        }

        if !snapshot.has_photo {
            reasons.push(SuspicionReason::NoProfilePhoto);
        }

        match snapshot.username.as_deref() {
            None | Some("") => reasons.push(SuspicionReason::NoUsername),
            Some(username) if is_digit_heavy(username) => {
                reasons.push(SuspicionReason::DigitHeavyUsername)
            }
            Some(_) => {}
        }

        let points: u32 = reasons.iter().map(SuspicionReason::points).sum();
        SuspicionReport {
            score: f64::from(points.min(100)) / 100.0,
            reasons,
        }
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}

fn has_promo_wording(text: &str) -> bool {
    let lowered = text.to_lowercase();
    PROMO_WORDS.iter().any(|word| contains_word(&lowered, word))
        || PROMO_STEMS.iter().any(|stem| lowered.contains(stem))
}

/// `word` occurs with no letter or digit directly on either side
fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Four or more digits, or digits making up at least 40% of the name
fn is_digit_heavy(username: &str) -> bool {
    let total = username.chars().count();
    let digits = username.chars().filter(char::is_ascii_digit).count();
    digits >= 4 || (total > 0 && digits * 10 >= total * 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_snapshot() -> ProfileSnapshot {
        ProfileSnapshot {
            user_id: 77,
            first_name: "Anna".to_string(),
            last_name: Some("K".to_string()),
            username: Some("anna_k".to_string()),
            bio: Some("Gardening and cats".to_string()),
            has_photo: true,
            linked_channel: None,
        }
    }

    #[test]
    fn test_clean_profile_scores_zero() {
        let report = SuspicionScorer::new().score(&clean_snapshot());
        assert_eq!(report.score, 0.0);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn test_bait_channel_profile() {
        let snapshot = ProfileSnapshot {
            bio: Some("Join t.me/+AbCdEf".to_string()),
            has_photo: false,
            linked_channel: Some(LinkedChannel {
                chat_id: -100555,
                title: "Crypto profit daily".to_string(),
                description: None,
                post_count: 2,
            }),
            ..clean_snapshot()
        };
        let report = SuspicionScorer::new().score(&snapshot);

        // 40 bait + 25 invite + 10 no photo
        assert_eq!(report.score, 0.75);
        assert!(report.has(SuspicionReason::BaitChannel));
        assert!(report.has(SuspicionReason::InviteLinkInBio));
        assert!(!report.has(SuspicionReason::LinkInBio));
        assert_eq!(report.patterns(), "bait_channel,invite_link_in_bio,no_profile_photo");
    }

    #[test]
    fn test_established_channel_is_not_sparse() {
        let snapshot = ProfileSnapshot {
            linked_channel: Some(LinkedChannel {
                chat_id: -100556,
                title: "Crypto news".to_string(),
                description: None,
                post_count: 500,
            }),
            ..clean_snapshot()
        };
        assert!(SuspicionScorer::new().score(&snapshot).reasons.is_empty());
    }

    #[test]
    fn test_cyrillic_keywords_match() {
        let snapshot = ProfileSnapshot {
            bio: Some("Быстрый ЗАРАБОТОК без вложений".to_string()),
            ..clean_snapshot()
        };
        let report = SuspicionScorer::new().score(&snapshot);
        assert_eq!(report.reasons, vec![SuspicionReason::PromoKeywords]);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let scorer = SuspicionScorer::new();
        for bio in ["I love to learn Rust", "Yearning for summer", "Earnest about gardening"] {
            let snapshot = ProfileSnapshot {
                bio: Some(bio.to_string()),
                ..clean_snapshot()
            };
            assert!(!scorer.score(&snapshot).has(SuspicionReason::PromoKeywords), "{}", bio);
        }

        let snapshot = ProfileSnapshot {
            bio: Some("Earn daily, investment tips!".to_string()),
            ..clean_snapshot()
        };
        assert!(scorer.score(&snapshot).has(SuspicionReason::PromoKeywords));
    }

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("crypto, daily", "crypto"));
        assert!(contains_word("adults 18+ only", "18+"));
        assert!(!contains_word("cryptography", "crypto"));
        assert!(!contains_word("relearn", "earn"));
    }

    #[test]
    fn test_score_is_clamped() {
        let snapshot = ProfileSnapshot {
            user_id: 1,
            first_name: "Free crypto bonus".to_string(),
            last_name: None,
            username: Some("user48213".to_string()),
            bio: Some("https://t.me/joinchat/xyz".to_string()),
            has_photo: false,
            linked_channel: Some(LinkedChannel {
                chat_id: -1,
                title: "Casino".to_string(),
                description: None,
                post_count: 0,
            }),
        };
        let report = SuspicionScorer::new().score(&snapshot);
        assert_eq!(report.score, 1.0);
    }

    #[test]
    fn test_digit_heavy_usernames() {
        assert!(is_digit_heavy("john1987"));
        assert!(is_digit_heavy("ab12"));
        assert!(!is_digit_heavy("john_smith"));
        assert!(!is_digit_heavy("r2d"));
    }

    #[test]
    fn test_score_is_deterministic() {
        let snapshot = ProfileSnapshot {
            username: None,
            has_photo: false,
            bio: Some("www.example.com".to_string()),
            ..clean_snapshot()
        };
        let scorer = SuspicionScorer::new();
        let first = scorer.score(&snapshot);
        for _ in 0..10 {
            assert_eq!(scorer.score(&snapshot).score.to_bits(), first.score.to_bits());
        }
        assert_eq!(first.score, 0.3);
    }
}
