//! Bot account detection.
//!
//! Automation accounts (dependabot, CI users, ...) inflate developer
//! activity numbers. [`BotClassifier`] decides whether a login belongs to
//! one by case-insensitive substring matching against a list of markers.

/// Markers used when the configuration does not override them.
pub const DEFAULT_BOT_MARKERS: &[&str] = &["-bot", "[bot]", "ChiaAutomation", "deepsourcebot"];

/// Case-insensitive substring matcher for automation account names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotClassifier {
    /// Lowercased, non-empty markers.
    markers: Vec<String>,
}

impl BotClassifier {
    /// Build a classifier from a list of markers.
    ///
    /// Blank markers are ignored: an empty pattern would match every login.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// Returns `true` if `username` contains any marker, ignoring case.
    pub fn is_bot(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.markers.iter().any(|m| username.contains(m.as_str()))
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for BotClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_MARKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_markers() {
        let bots = BotClassifier::default();
        let cases = [
            ("test", false),
            ("testbot", false),
            ("test-bot", true),
            ("test[bot]", true),
            ("ChiaAutomation", true),
            ("deepsourcebot", true),
        ];
        for (name, expected) in cases {
            assert_eq!(bots.is_bot(name), expected, "unexpected result for {}", name);
        }
    }

    #[test]
    fn test_case_insensitive() {
        let bots = BotClassifier::default();
        assert!(bots.is_bot("chiaautomation"));
        assert!(bots.is_bot("Renovate[BOT]"));
        assert!(bots.is_bot("RELEASE-BOT-2"));
    }

    #[test]
    fn test_blank_markers_ignored() {
        let bots = BotClassifier::new(["", "  ", "ci-"]);
        assert_eq!(bots.markers(), &["ci-".to_string()]);
        assert!(!bots.is_bot("alice"));
        assert!(bots.is_bot("CI-runner"));
    }

    #[test]
    fn test_empty_classifier_matches_nothing() {
        let bots = BotClassifier::new(Vec::<String>::new());
        assert!(!bots.is_bot("dependabot[bot]"));
    }
}
