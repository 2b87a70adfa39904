//! Decides whether an inbound `message` event comes from a frame the page trusts.
//!
//! Two checks must pass. The first is a hostname rule: a delivery-domain suffix, an explicit
//! hostname allow-list, or an exact origin. The second, on the parent side, is an ancestry
//! walk proving that `event.source` is framed by this page.

use url::Url;

use crate::bridge::constants::{APPS_SCRIPT_CONTENT_SUFFIX, MAX_ANCESTRY_HOPS};
use crate::bridge::window::FrameWindow;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginVerdict {
    Trusted,
    /// The page's own origin, e.g. a popup echoing a login-done signal.
    SameOrigin,
    /// `"null"` or otherwise unparseable.
    Opaque,
    UntrustedHost,
    /// The hostname passed but `source` is not framed by this page.
    UnknownSource,
}

impl OriginVerdict {
    pub fn is_trusted(self) -> bool {
        matches!(self, OriginVerdict::Trusted)
    }
}

#[derive(Clone, Debug, Default)]
pub struct OriginValidator {
    host_suffixes: Vec<String>,
    hostnames: Vec<String>,
    exact_origins: Vec<String>,
    own_origin: Option<String>,
    allow_any: bool,
    check_ancestry: bool,
}

impl OriginValidator {
    /// A validator that trusts nothing until rules are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parent-side validator: Apps Script content frames plus the given hostnames, with the
    /// ancestry walk enabled.
    pub fn for_parent<I, S>(hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut validator = Self::new()
            .with_host_suffix(APPS_SCRIPT_CONTENT_SUFFIX)
            .with_ancestry_check(true);
        for hostname in hostnames {
            validator = validator.with_hostname(hostname);
        }
        validator
    }

    /// Iframe-side validator: only the embedding website's exact origin, unless any embedding
    /// is allowed.
    pub fn for_iframe(parent_website: &str, allow_any: bool) -> Self {
        Self::new()
            .with_exact_origin(parent_website)
            .with_allow_any(allow_any)
    }

    pub fn with_host_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into().to_ascii_lowercase();
        let suffix = if suffix.starts_with('.') {
            suffix
        } else {
            format!(".{suffix}")
        };
        self.host_suffixes.push(suffix);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        let hostname = hostname.into().trim().to_ascii_lowercase();
        if !hostname.is_empty() {
            self.hostnames.push(hostname);
        }
        self
    }

    pub fn with_exact_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = normalize_origin(&origin.into());
        if !origin.is_empty() {
            self.exact_origins.push(origin);
        }
        self
    }

    /// The page's own origin; messages from it are classified as [`OriginVerdict::SameOrigin`].
    pub fn with_own_origin(mut self, origin: impl Into<String>) -> Self {
        self.own_origin = Some(normalize_origin(&origin.into()));
        self
    }

    /// Development-only wildcard over every parseable origin. Opaque origins stay rejected.
    pub fn with_allow_any(mut self, allow_any: bool) -> Self {
        self.allow_any = allow_any;
        self
    }

    pub fn with_ancestry_check(mut self, enabled: bool) -> Self {
        self.check_ancestry = enabled;
        self
    }

    pub fn allows_any(&self) -> bool {
        self.allow_any
    }

    pub fn is_trusted(
        &self,
        origin: &str,
        source: Option<&dyn FrameWindow>,
        own_window: &dyn FrameWindow,
    ) -> bool {
        self.classify(origin, source, own_window).is_trusted()
    }

    pub fn classify(
        &self,
        origin: &str,
        source: Option<&dyn FrameWindow>,
        own_window: &dyn FrameWindow,
    ) -> OriginVerdict {
        let verdict = self.classify_origin(origin);
        if verdict != OriginVerdict::Trusted {
            return verdict;
        }
        if self.check_ancestry && !is_framed_by(source, own_window) {
            return OriginVerdict::UnknownSource;
        }
        OriginVerdict::Trusted
    }

    /// Hostname-only classification, without the ancestry walk.
    pub fn classify_origin(&self, origin: &str) -> OriginVerdict {
        let normalized = normalize_origin(origin);
        if self
            .own_origin
            .as_deref()
            .is_some_and(|own| !own.is_empty() && own == normalized)
        {
            return OriginVerdict::SameOrigin;
        }
        let Some(hostname) = parse_hostname(origin) else {
            return OriginVerdict::Opaque;
        };
        if self.allow_any {
            return OriginVerdict::Trusted;
        }

        let suffix_match = self
            .host_suffixes
            .iter()
            .any(|suffix| hostname.ends_with(suffix.as_str()));
        let host_match = self.hostnames.iter().any(|allowed| *allowed == hostname);
        let exact_match = self.exact_origins.iter().any(|allowed| *allowed == normalized);

        if suffix_match || host_match || exact_match {
            OriginVerdict::Trusted
        } else {
            OriginVerdict::UntrustedHost
        }
    }
}

/// Walks `source.parent` up to [`MAX_ANCESTRY_HOPS`] windows looking for `own_window`.
///
/// Stops early when a window is its own parent (the top of that tree), so self-referencing
/// cross-origin chains terminate.
pub fn is_framed_by(source: Option<&dyn FrameWindow>, own_window: &dyn FrameWindow) -> bool {
    let Some(source) = source else {
        return false;
    };
    if source.is_same_window(own_window) {
        return true;
    }

    let mut current = source.parent();
    for _ in 1..MAX_ANCESTRY_HOPS {
        let Some(window) = current else {
            return false;
        };
        if window.is_same_window(own_window) {
            return true;
        }
        let parent = window.parent();
        if parent
            .as_ref()
            .is_some_and(|parent| parent.is_same_window(window.as_ref()))
        {
            return false;
        }
        current = parent;
    }
    false
}

fn parse_hostname(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    url.host_str()
        .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
        .filter(|host| !host.is_empty())
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeWindow;

    fn validator() -> OriginValidator {
        OriginValidator::for_parent(["demo-project.firebaseapp.com", "example.org", "localhost"])
    }

    #[test]
    fn apps_script_suffix_is_trusted_regardless_of_allow_list() {
        let bare = OriginValidator::for_parent(Vec::<String>::new());
        assert_eq!(
            bare.classify_origin("https://n-abc123-0lu-script.googleusercontent.com"),
            OriginVerdict::Trusted
        );
        assert_eq!(
            bare.classify_origin("https://x.googleusercontent.com"),
            OriginVerdict::Trusted
        );
    }

    #[test]
    fn unlisted_host_is_rejected() {
        assert_eq!(
            validator().classify_origin("https://evil.example.com"),
            OriginVerdict::UntrustedHost
        );
        assert_eq!(
            validator().classify_origin("https://googleusercontent.com.evil.io"),
            OriginVerdict::UntrustedHost
        );
    }

    #[test]
    fn exact_allow_listed_hostname_is_trusted() {
        assert!(validator().classify_origin("https://example.org").is_trusted());
        assert!(validator().classify_origin("http://localhost:5173").is_trusted());
        assert!(!validator().classify_origin("https://sub.example.org").is_trusted());
    }

    #[test]
    fn opaque_origins_are_rejected() {
        assert_eq!(validator().classify_origin("null"), OriginVerdict::Opaque);
        assert_eq!(validator().classify_origin(""), OriginVerdict::Opaque);
        assert_eq!(
            validator().classify_origin("not a url"),
            OriginVerdict::Opaque
        );
    }

    #[test]
    fn wildcard_must_be_enabled_explicitly() {
        assert!(!OriginValidator::new().classify_origin("https://anything.dev").is_trusted());
        assert!(OriginValidator::new()
            .with_allow_any(true)
            .classify_origin("https://anything.dev")
            .is_trusted());
        assert_eq!(
            OriginValidator::new().with_allow_any(true).classify_origin("null"),
            OriginVerdict::Opaque
        );
    }

    #[test]
    fn own_origin_is_excluded() {
        let validator = validator().with_own_origin("https://example.org/");
        assert_eq!(
            validator.classify_origin("https://example.org"),
            OriginVerdict::SameOrigin
        );
    }

    #[test]
    fn iframe_side_matches_parent_website_exactly() {
        let validator = OriginValidator::for_iframe("https://Example.org", false);
        assert!(validator.classify_origin("https://example.org").is_trusted());
        assert!(!validator.classify_origin("https://example.org:8443").is_trusted());
        assert!(OriginValidator::for_iframe("https://example.org", true)
            .classify_origin("https://elsewhere.net")
            .is_trusted());
    }

    #[test]
    fn ancestry_walk_finds_framing_page() {
        let top = FakeWindow::top();
        let iframe = FakeWindow::child_of(&top);
        let nested = FakeWindow::child_of(&iframe);

        assert!(is_framed_by(Some(&*nested), &*top));
        assert!(validator().is_trusted(
            "https://x.googleusercontent.com",
            Some(&*iframe),
            &*top
        ));
    }

    #[test]
    fn ancestry_walk_rejects_foreign_tree() {
        let top = FakeWindow::top();
        let other_top = FakeWindow::top();
        let stranger = FakeWindow::child_of(&other_top);

        assert_eq!(
            validator().classify(
                "https://x.googleusercontent.com",
                Some(&*stranger),
                &*top
            ),
            OriginVerdict::UnknownSource
        );
        assert!(!is_framed_by(None, &*top));
    }

    #[test]
    fn ancestry_walk_terminates_on_parent_cycle() {
        let top = FakeWindow::top();
        let a = FakeWindow::detached();
        let b = FakeWindow::detached();
        a.set_parent(&b);
        b.set_parent(&a);

        assert!(!is_framed_by(Some(&*a), &*top));
    }

    #[test]
    fn ancestry_walk_is_bounded_by_hop_limit() {
        let top = FakeWindow::top();
        let mut current = FakeWindow::child_of(&top);
        for _ in 0..MAX_ANCESTRY_HOPS {
            current = FakeWindow::child_of(&current);
        }
        assert!(!is_framed_by(Some(&*current), &*top));
    }
}
