/// §4.10 origin policy: requests without an `Origin` header are permitted
/// (non-browser clients); others must match an allow-list entry after
/// stripping a trailing `#…` fragment.
pub fn is_allowed(origin_header: Option<&str>, allowed_origins: &[String]) -> bool {
    let Some(origin) = origin_header else {
        return true;
    };
    let stripped = origin.split('#').next().unwrap_or(origin);
    allowed_origins.iter().any(|allowed| allowed == stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_origin_is_always_permitted() {
        assert!(is_allowed(None, &[]));
        assert!(is_allowed(None, &["https://example.com".to_owned()]));
    }

    #[test]
    fn origin_must_match_an_allow_list_entry() {
        let allowed = vec!["https://example.com".to_owned()];
        assert!(is_allowed(Some("https://example.com"), &allowed));
        assert!(!is_allowed(Some("https://evil.example"), &allowed));
    }

    #[test]
    fn trailing_fragment_is_stripped_before_matching() {
        let allowed = vec!["https://example.com".to_owned()];
        assert!(is_allowed(Some("https://example.com#/app"), &allowed));
    }
}
