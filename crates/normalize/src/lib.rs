//! URL hygiene: canonicalization, registrable-domain extraction, and the
//! non-text extension filter. Pure, no I/O — every function here is safe
//! to call from the hot path of any worker.

use url::Url;

/// Case-insensitive, closed set of path suffixes treated as non-crawlable
/// payloads (images, video, audio, archives, executables, binary docs).
pub const NON_TEXT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tiff", "tif", "mp4", "avi", "mov",
    "wmv", "flv", "webm", "mkv", "mpg", "mpeg", "m4v", "mp3", "wav", "flac", "aac", "ogg", "wma",
    "m4a", "opus", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "zip", "rar", "7z",
    "tar", "gz", "bz2", "xz", "tgz", "exe", "msi", "dmg", "pkg", "deb", "rpm", "apk", "app", "iso",
    "bin", "dat", "db", "sqlite", "dll", "so", "dylib", "psd", "ai", "eps", "indd", "sketch",
    "fig", "xd", "csv", "json", "xml", "sql",
];

/// Canonicalize a URL: lowercase scheme/host (via `url`'s built-in IDNA
/// handling), strip the fragment and default port, drop the configured
/// tracking query parameters, and collapse a trailing slash on any path
/// but the root. Returns `None` for anything that isn't a structurally
/// valid absolute `http`/`https` URL — it never raises.
///
/// Idempotent: `normalize(normalize(u)) == normalize(u)`.
pub fn normalize(raw: &str, strip_query_params: &[String]) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = url.set_port(None);
    }

    if !strip_query_params.is_empty() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !strip_query_params.iter().any(|p| p == key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut mutator = url.query_pairs_mut();
        mutator.clear();
        if !kept.is_empty() {
            mutator.extend_pairs(kept);
        }
        drop(mutator);
        if url.query().unwrap_or_default().is_empty() {
            url.set_query(None);
        }
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    Some(url.to_string())
}

/// Extract the registrable domain (eTLD+1) for `url`, or `None` for
/// malformed URLs, bare IP literals, or single-label hosts.
pub fn extract_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;

    if url.host().is_some() && matches!(url.host(), Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_))) {
        return None;
    }
    if !host.contains('.') {
        return None;
    }

    let domain = psl::domain(host.as_bytes())?;
    std::str::from_utf8(domain.as_bytes()).ok().map(|s| s.to_string())
}

/// True if `raw`'s path ends in one of [`NON_TEXT_EXTENSIONS`] (case-insensitive).
pub fn is_likely_non_text_url(raw: &str) -> bool {
    let Some(last_segment) = raw.rsplit('/').next() else {
        return false;
    };
    // Strip query/fragment remnants a caller might have left attached.
    let last_segment = last_segment.split(['?', '#']).next().unwrap_or("");
    let Some((_, ext)) = last_segment.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    NON_TEXT_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_host_port_fragment() {
        let strip = vec![];
        assert_eq!(
            normalize("HTTPS://Example.COM:443/Path#section", &strip).unwrap(),
            "https://example.com/Path"
        );
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        let strip = vec![];
        assert_eq!(normalize("https://example.com/a/", &strip).unwrap(), "https://example.com/a");
        assert_eq!(normalize("https://example.com/", &strip).unwrap(), "https://example.com/");
    }

    #[test]
    fn strips_tracking_params() {
        let strip = vec!["utm_source".to_string(), "gclid".to_string()];
        let got = normalize("https://example.com/?a=1&utm_source=x&gclid=y", &strip).unwrap();
        assert_eq!(got, "https://example.com/?a=1");
    }

    #[test]
    fn idempotent() {
        let strip = vec!["utm_source".to_string()];
        let once = normalize("https://Example.com/a/b/?utm_source=x&b=2#frag", &strip).unwrap();
        let twice = normalize(&once, &strip).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_http_schemes() {
        let strip = vec![];
        assert_eq!(normalize("mailto:a@example.com", &strip), None);
        assert_eq!(normalize("not a url", &strip), None);
    }

    #[test]
    fn extracts_registrable_domain() {
        assert_eq!(extract_domain("https://www.example.co.uk/x").unwrap(), "example.co.uk");
        assert_eq!(extract_domain("https://example.com").unwrap(), "example.com");
    }

    #[test]
    fn rejects_ip_and_single_label_hosts() {
        assert_eq!(extract_domain("http://127.0.0.1/"), None);
        assert_eq!(extract_domain("http://localhost/"), None);
    }

    #[test]
    fn non_text_extension_filter_is_case_insensitive() {
        assert!(is_likely_non_text_url("https://example.com/report.PDF"));
        assert!(is_likely_non_text_url("https://example.com/img.jpg?x=1"));
        assert!(!is_likely_non_text_url("https://example.com/page.html"));
        assert!(!is_likely_non_text_url("https://example.com/"));
    }

    proptest::proptest! {
        #[test]
        fn idempotence_property(s in "https://[a-z]{3,10}\\.com(/[a-z]{1,5}){0,3}") {
            let strip = vec![];
            if let Some(once) = normalize(&s, &strip) {
                let twice = normalize(&once, &strip).unwrap();
                proptest::prop_assert_eq!(once, twice);
            }
        }
    }
}
