use url::Url;

/// Canonicalizes a raw request URL into the endpoint identity used for
/// aggregation: `origin + path`, plus the query string when `include_query`
/// is set. Two URLs that differ only in query normalize to the same endpoint
/// when the flag is off; that deduplication is the point.
///
/// A URL that fails to parse is returned unchanged so classification can
/// still run against the raw value. This never fails.
pub fn normalize_endpoint(raw_url: &str, include_query: bool) -> String {
    let Ok(parsed) = Url::parse(raw_url) else {
        return raw_url.to_owned();
    };

    let mut endpoint = parsed.origin().ascii_serialization();
    endpoint.push_str(parsed.path());

    if include_query {
        if let Some(query) = parsed.query() {
            endpoint.push('?');
            endpoint.push_str(query);
        }
    }

    endpoint
}
