//! Clean page parameters and the Apps Script web app URL built from them.

use std::collections::BTreeMap;

use url::Url;

use crate::bridge::error::{invalid_argument, invalid_signature, BridgeResult};
use crate::page::signature::{verify_org, PublicKeyJwk};

pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "es"];
pub const DEFAULT_LANGUAGE: &str = "en";
const SCRIPT_BASE_URL: &str = "https://script.google.com/macros/s";

/// Keys copied from the page URL; anything else in the query string is ignored.
const KNOWN_KEYS: &[&str] = &["org", "sig", "lang", "session", "demo"];

/// URL parameters the page forwards to the embedded web app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageParams {
    /// Deployment id of the Apps Script web app.
    pub org: String,
    /// Signature accompanying a non-default `org`.
    pub sig: String,
    pub lang: String,
    pub session: String,
    pub demo: String,
    /// Extra keys registered with [`PageParams::allow_key`] or set by `urlParamChange`.
    pub extras: BTreeMap<String, String>,
}

impl PageParams {
    pub fn new(default_org: impl Into<String>, default_lang: Option<&str>) -> Self {
        Self {
            org: default_org.into(),
            sig: String::new(),
            lang: default_lang.unwrap_or(DEFAULT_LANGUAGE).to_string(),
            session: String::new(),
            demo: String::new(),
            extras: BTreeMap::new(),
        }
    }

    /// Registers a custom key so [`PageParams::merge_from_url`] copies it.
    pub fn allow_key(mut self, key: impl Into<String>) -> Self {
        self.extras.entry(key.into()).or_default();
        self
    }

    /// Copies known keys from `url`, then validates the language.
    pub fn merge_from_url(&mut self, url: &Url) -> BridgeResult<()> {
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            if KNOWN_KEYS.contains(&key.as_ref()) || self.extras.contains_key(key.as_ref()) {
                self.set(&key, Some(value));
            }
        }
        if !SUPPORTED_LANGUAGES.contains(&self.lang.as_str()) {
            return Err(invalid_argument(format!("Unsupported lang: {}", self.lang)));
        }
        Ok(())
    }

    /// [`merge_from_url`](Self::merge_from_url), then, when the URL names an `org`, requires
    /// `sig` to be its signature under `key`.
    pub fn merge_verified_from_url(
        &mut self,
        url: &Url,
        key: Option<&PublicKeyJwk>,
    ) -> BridgeResult<()> {
        self.merge_from_url(url)?;
        if url.query_pairs().any(|(name, _)| name == "org")
            && !verify_org(key, &self.org, &self.sig)
        {
            return Err(invalid_signature(format!(
                "Invalid signature for org {}",
                self.org
            )));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "org" => Some(&self.org),
            "sig" => Some(&self.sig),
            "lang" => Some(&self.lang),
            "session" => Some(&self.session),
            "demo" => Some(&self.demo),
            other => self.extras.get(other).map(String::as_str),
        }
    }

    /// Sets or clears a parameter. Clearing a known key resets it to the empty string.
    pub fn set(&mut self, key: &str, value: Option<String>) {
        let slot = match key {
            "org" => &mut self.org,
            "sig" => &mut self.sig,
            "lang" => &mut self.lang,
            "session" => &mut self.session,
            "demo" => &mut self.demo,
            other => {
                match value {
                    Some(value) => {
                        self.extras.insert(other.to_string(), value);
                    }
                    None => {
                        self.extras.remove(other);
                    }
                }
                return;
            }
        };
        *slot = value.unwrap_or_default();
    }

    pub fn is_demo(&self) -> bool {
        self.demo == "1"
    }

    /// `https://script.google.com/macros/s/{org}/exec?lang=..&session=..[&extra][&demo=1]&embed=1`
    ///
    /// `extra` is an already-encoded query fragment such as `"a=1&b=2"`.
    pub fn script_url(&self, extra: Option<&str>) -> String {
        let extra = extra
            .map(|extra| extra.trim_start_matches('&'))
            .filter(|extra| !extra.is_empty())
            .map(|extra| format!("&{extra}"))
            .unwrap_or_default();
        let demo = if self.is_demo() { "&demo=1" } else { "" };
        format!(
            "{SCRIPT_BASE_URL}/{}/exec?lang={}&session={}{extra}{demo}&embed=1",
            encode(&self.org),
            encode(&self.lang),
            encode(&self.session),
        )
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `URLSearchParams.set`/`delete` semantics on a [`Url`]: the first occurrence is replaced in
/// place, later duplicates are dropped, and a missing key is appended.
pub fn set_search_param(url: &mut Url, key: &str, value: Option<&str>) {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut replaced = false;
    pairs.retain_mut(|(name, current)| {
        if name != key {
            return true;
        }
        match value {
            Some(value) if !replaced => {
                *current = value.to_string();
                replaced = true;
                true
            }
            _ => false,
        }
    });
    if let (Some(value), false) = (value, replaced) {
        pairs.push((key.to_string(), value.to_string()));
    }

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_url_embeds_parameters_in_order() {
        let mut params = PageParams::new("AKfycbDemo", None);
        params.session = "s1".into();
        assert_eq!(
            params.script_url(Some("view=full")),
            "https://script.google.com/macros/s/AKfycbDemo/exec?lang=en&session=s1&view=full&embed=1"
        );

        params.demo = "1".into();
        params.lang = "es".into();
        assert_eq!(
            params.script_url(None),
            "https://script.google.com/macros/s/AKfycbDemo/exec?lang=es&session=s1&demo=1&embed=1"
        );
    }

    #[test]
    fn merge_copies_only_known_keys() {
        let url = Url::parse("https://example.org/page?lang=es&session=abc&tracking=x&unit=7")
            .unwrap();
        let mut params = PageParams::new("default-org", None).allow_key("unit");
        params.merge_from_url(&url).unwrap();

        assert_eq!(params.lang, "es");
        assert_eq!(params.session, "abc");
        assert_eq!(params.org, "default-org");
        assert_eq!(params.get("unit"), Some("7"));
        assert_eq!(params.get("tracking"), None);
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let url = Url::parse("https://example.org/?lang=fr").unwrap();
        let mut params = PageParams::new("org", None);
        let err = params.merge_from_url(&url).unwrap_err();
        assert_eq!(err.message(), "Unsupported lang: fr");
    }

    #[test]
    fn named_org_requires_its_signature() {
        use crate::bridge::error::BridgeErrorCode;
        use crate::page::signature::tests::{sign, signing_key};

        let (signing, jwk) = signing_key();
        let signature = sign(&signing, "AKfycb-partner");

        let url = Url::parse(&format!(
            "https://example.org/?org=AKfycb-partner&sig={signature}"
        ))
        .unwrap();
        let mut params = PageParams::new("default-org", None);
        params.merge_verified_from_url(&url, Some(&jwk)).unwrap();
        assert_eq!(params.org, "AKfycb-partner");

        let unsigned = Url::parse("https://example.org/?org=AKfycb-partner").unwrap();
        let err = PageParams::new("default-org", None)
            .merge_verified_from_url(&unsigned, Some(&jwk))
            .unwrap_err();
        assert_eq!(err.code, BridgeErrorCode::InvalidSignature);

        let forged = Url::parse(&format!(
            "https://example.org/?org=AKfycb-other&sig={signature}"
        ))
        .unwrap();
        assert!(PageParams::new("default-org", None)
            .merge_verified_from_url(&forged, Some(&jwk))
            .is_err());

        let plain = Url::parse("https://example.org/?lang=es").unwrap();
        let mut params = PageParams::new("default-org", None);
        params.merge_verified_from_url(&plain, None).unwrap();
        assert_eq!(params.org, "default-org");
    }

    #[test]
    fn set_search_param_follows_url_search_params() {
        let mut url = Url::parse("https://example.org/p?a=1&b=2&a=3").unwrap();
        set_search_param(&mut url, "a", Some("9"));
        assert_eq!(url.query(), Some("a=9&b=2"));

        set_search_param(&mut url, "c", Some("x y"));
        assert_eq!(url.query(), Some("a=9&b=2&c=x+y"));

        set_search_param(&mut url, "a", None);
        set_search_param(&mut url, "b", None);
        set_search_param(&mut url, "c", None);
        assert_eq!(url.as_str(), "https://example.org/p");
    }
}
