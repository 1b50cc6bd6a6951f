use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use url::Url;

use crate::conditions::condition_matching::cached_regex;
use crate::models::{UrlTarget, UrlTargetType};

const WILDCARD_PLACEHOLDER: &str = "_____";

static BARE_HOST_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:/?]*)\.").expect("static regex is valid"));

static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://").expect("static regex is valid"));

static HOST_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^/]*/").expect("static regex is valid"));

/// Parses a leading base-10 integer the way `parseInt` does: optional whitespace, an
/// optional sign, then digits up to the first non-digit.
fn parse_int_prefix(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    let n = digits[..end].parse::<i64>().ok()?;
    Some(if negative { -n } else { n })
}

/// Reads `?<key>=<index>` from `url`, returning the index when it names one of the
/// `num_variations` variations. Only the first occurrence of `key` is considered.
pub fn get_query_string_override(key: &str, url: &str, num_variations: usize) -> Option<usize> {
    if url.is_empty() {
        return None;
    }
    let search = url.split('?').nth(1)?;
    let search = search.split('#').next().unwrap_or_default();
    if search.is_empty() {
        return None;
    }

    let raw = search.split('&').find_map(|pair| {
        let mut parts = pair.split('=');
        match parts.next() {
            Some(name) if name == key => Some(parts.next().unwrap_or_default()),
            _ => None,
        }
    })?;

    let index = parse_int_prefix(raw)?;
    usize::try_from(index)
        .ok()
        .filter(|index| *index < num_variations)
}

/// Legacy experiment targeting: `pattern` must match either the full URL or its path.
pub fn url_matches_regex(pattern: &str, url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let Some(regex) = cached_regex(pattern) else {
        tracing::warn!(pattern = %pattern, "Invalid url regex");
        return false;
    };

    let without_scheme = SCHEME_PREFIX.replace(url, "");
    let path_only = HOST_PREFIX.replace(&without_scheme, "/");

    regex.is_match(url).unwrap_or(false) || regex.is_match(&path_only).unwrap_or(false)
}

/// Exclusion targets that match reject the URL outright. Otherwise the URL passes when it
/// matches any inclusion target, or when there are no inclusion targets at all.
pub fn is_url_targeted(url: &str, targets: &[UrlTarget]) -> bool {
    if targets.is_empty() {
        return false;
    }

    let mut has_include_rules = false;
    let mut is_included = false;

    for target in targets {
        let matched = eval_url_target(url, target.target_type, &target.pattern);
        if target.include == Some(false) {
            if matched {
                return false;
            }
        } else {
            has_include_rules = true;
            if matched {
                is_included = true;
            }
        }
    }

    is_included || !has_include_rules
}

fn parse_with_base(input: &str, base: &str) -> Option<Url> {
    Url::parse(base).ok()?.join(input).ok()
}

fn eval_url_target(url: &str, target_type: UrlTargetType, pattern: &str) -> bool {
    let Some(parsed) = parse_with_base(url, "https://_") else {
        return false;
    };

    match target_type {
        UrlTargetType::Regex => {
            let Some(regex) = cached_regex(pattern) else {
                return false;
            };
            let href = parsed.as_str();
            let origin = parsed.origin().ascii_serialization();
            let relative = href.get(origin.len()..).unwrap_or_default();
            regex.is_match(href).unwrap_or(false) || regex.is_match(relative).unwrap_or(false)
        }
        UrlTargetType::Simple => eval_simple_url_target(&parsed, pattern),
    }
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn hash_fragment(url: &Url) -> String {
    match url.fragment() {
        Some(fragment) if !fragment.is_empty() => format!("#{fragment}"),
        _ => String::new(),
    }
}

fn eval_simple_url_target(actual: &Url, pattern: &str) -> bool {
    let normalized = BARE_HOST_PREFIX
        .replace(pattern, "https://$1.")
        .replace('*', WILDCARD_PLACEHOLDER);
    let Some(expected) = parse_with_base(&normalized, "https://_____") else {
        return false;
    };

    let mut comparisons = vec![
        (host_with_port(actual), host_with_port(&expected), false),
        (actual.path().to_string(), expected.path().to_string(), true),
    ];

    let expected_hash = hash_fragment(&expected);
    if !expected_hash.is_empty() {
        comparisons.push((hash_fragment(actual), expected_hash, false));
    }

    for (name, value) in expected.query_pairs() {
        let actual_value = actual
            .query_pairs()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        comparisons.push((actual_value, value.into_owned(), false));
    }

    comparisons
        .iter()
        .all(|(actual, pattern, is_path)| eval_simple_url_part(actual, pattern, *is_path))
}

fn eval_simple_url_part(actual: &str, pattern: &str, is_path: bool) -> bool {
    let mut escaped = regex::escape(pattern).replace(WILDCARD_PLACEHOLDER, ".*");
    if is_path {
        let trimmed = escaped.strip_prefix('/').unwrap_or(&escaped);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        escaped = format!("/?{trimmed}/?");
    }

    RegexBuilder::new(&format!("^{escaped}$"))
        .case_insensitive(true)
        .build()
        .map(|regex| regex.is_match(actual))
        .unwrap_or(false)
}
