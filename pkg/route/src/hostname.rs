use std::collections::BTreeSet;

use pkg_types::validate::validate_hostname;

/// Lowercase and strip a trailing dot.
pub fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

pub fn is_valid(host: &str) -> bool {
    validate_hostname(host).is_ok()
}

pub fn is_wildcard(host: &str) -> bool {
    host == "*" || host.starts_with("*.")
}

/// Whether `host` is matched by `wildcard`. `*.` covers exactly one label;
/// a bare `*` covers any single-label host.
pub fn matches_wildcard(host: &str, wildcard: &str) -> bool {
    let host = normalize(host);
    let wildcard = normalize(wildcard);
    if wildcard == "*" {
        return !host.is_empty() && !host.contains('.') && host != "*";
    }
    let Some(suffix) = wildcard.strip_prefix("*.") else {
        return false;
    };
    match host.split_once('.') {
        Some((label, rest)) => !label.is_empty() && label != "*" && rest == suffix,
        None => false,
    }
}

/// Intersection of a listener hostname with one route hostname, handled
/// symmetrically for wildcards on either side. A listener without a
/// hostname accepts every route hostname.
pub fn intersect(listener: Option<&str>, route: &str) -> Option<String> {
    let route = normalize(route);
    let Some(listener) = listener.map(normalize).filter(|l| !l.is_empty()) else {
        return Some(route);
    };
    if listener == route {
        return Some(route);
    }
    match (is_wildcard(&listener), is_wildcard(&route)) {
        (true, false) if matches_wildcard(&route, &listener) => Some(route),
        (false, true) if matches_wildcard(&listener, &route) => Some(listener),
        _ => None,
    }
}

/// Hostnames a route serves on a listener. A route without hostnames
/// inherits the listener hostname, or `*` when the listener has none.
/// Invalid route hostnames are skipped.
pub fn valid_hostnames(listener: Option<&str>, route_hostnames: &[String]) -> Vec<String> {
    if route_hostnames.is_empty() {
        return vec![
            listener
                .map(normalize)
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "*".to_string()),
        ];
    }
    let hosts: BTreeSet<String> = route_hostnames
        .iter()
        .filter(|h| is_valid(h))
        .filter_map(|h| intersect(listener, h))
        .collect();
    hosts.into_iter().collect()
}
