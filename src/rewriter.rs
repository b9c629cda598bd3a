//! Link recognition and affiliate rewriting
//!
//! Pure text transform: locates every marketplace product URL in free-form
//! text and substitutes an affiliate-tagged equivalent. Never fails to the
//! caller; anything unparseable is logged and passed through unchanged.
//! The only I/O seam is `RedirectResolver`, used to expand the two known
//! short-link domains.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::model::{LinkClass, RecognizedLink, RewrittenLink};

/// Marketplace product/search/category URLs across the known country
/// domains. Scheme optional; protocol-relative accepted.
static RE_MARKETPLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:https?://|//)?(?:www\.)?amazon\.(?:com\.(?:mx|br|au|be|tr)|co\.(?:uk|jp)|com|in|de|fr|it|es|ca|nl|se|sg|ae|sa|eg|pl)/[^\s<>]+",
    )
    .unwrap()
});

/// amzn.to short-link redirector. Always given with a scheme.
static RE_AMZN_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://amzn\.to/[A-Za-z0-9]+").unwrap());

/// a.co short-link redirector. Always given with a scheme.
static RE_A_CO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://a\.co/[A-Za-z0-9/]+").unwrap());

/// Item identifier path shapes, in priority order. The bare 10-character
/// segment is a deliberate last resort: it keeps recall on unusual paths
/// at the cost of occasional false positives.
static RE_ASIN_DP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/dp/([A-Z0-9]{10})(?:[/?#]|$)").unwrap());
static RE_ASIN_GP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/gp/product/([A-Z0-9]{10})(?:[/?#]|$)").unwrap());
static RE_ASIN_GP_AW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/gp/aw/d/([A-Z0-9]{10})(?:[/?#]|$)").unwrap());
static RE_ASIN_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([A-Z0-9]{10})(?:[/?#]|$)").unwrap());

/// Query parameters carried over into the canonical rewritten form.
/// Everything else is dropped.
const PRESERVED_PARAMS: &[&str] = &["ref", "k", "page"];

/// Expands short-link redirects. The production implementation performs a
/// bounded network fetch; tests substitute a canned map.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    /// Returns the final URL after following redirects, or the input
    /// unchanged on any failure (fails open).
    async fn resolve(&self, url: &str) -> String;
}

/// `RedirectResolver` backed by a reqwest client with a short timeout.
pub struct HttpRedirectResolver {
    client: reqwest::Client,
}

impl HttpRedirectResolver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        HttpRedirectResolver { client }
    }
}

impl Default for HttpRedirectResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve(&self, url: &str) -> String {
        // HEAD is enough; reqwest follows redirects by default and the
        // final URL is all we need.
        match self.client.head(url).send().await {
            Ok(response) => response.url().to_string(),
            Err(err) => {
                warn!(url, error = %err, "short-link expansion failed, using original URL");
                url.to_string()
            }
        }
    }
}

/// Result of a full-text rewrite pass.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub text: String,

    /// Unique links whose value actually changed. A link that was already
    /// correctly tagged contributes zero.
    pub conversions: usize,

    /// One entry per unique recognized link, first-occurrence order.
    pub links: Vec<RewrittenLink>,
}

/// One literal occurrence of a recognized URL in the source text.
struct Span {
    start: usize,
    raw: String,
    url: String,
    class: LinkClass,
}

/// Locates every recognized-domain URL occurrence, trims trailing
/// punctuation, normalizes the scheme, and drops overlapping matches.
/// Sorted by position.
fn find_spans(text: &str) -> Vec<Span> {
    let shapes: [(&Regex, LinkClass); 3] = [
        (&RE_MARKETPLACE, LinkClass::Canonical),
        (&RE_AMZN_TO, LinkClass::Shortened),
        (&RE_A_CO, LinkClass::Shortened),
    ];

    let mut spans = Vec::new();
    for (re, class) in shapes {
        for m in re.find_iter(text) {
            let raw = trim_boundary(m.as_str());
            if raw.is_empty() {
                continue;
            }
            let url = normalize_scheme(raw);
            let class = if class == LinkClass::Canonical && is_search_url(&url) {
                LinkClass::Search
            } else {
                class
            };
            spans.push(Span {
                start: m.start(),
                raw: raw.to_string(),
                url,
                class,
            });
        }
    }

    spans.sort_by_key(|s| s.start);

    // The matchers are independent; drop anything starting inside an
    // earlier match.
    let mut kept: Vec<Span> = Vec::with_capacity(spans.len());
    let mut last_end = 0usize;
    for span in spans {
        if !kept.is_empty() && span.start < last_end {
            continue;
        }
        last_end = span.start + span.raw.len();
        kept.push(span);
    }
    kept
}

/// Strips sentence punctuation and unbalanced closing brackets from the
/// tail of a match, so "see https://amazon.in/dp/B08N5WRWNW!" and
/// "(https://amzn.to/abc)" both yield clean URL boundaries.
fn trim_boundary(raw: &str) -> &str {
    let mut s = raw;
    loop {
        let before = s.len();
        s = s.trim_end_matches(['.', ',', '!', '?', ';', ':', '\'', '"']);
        for (open, close) in [('(', ')'), ('[', ']'), ('{', '}')] {
            while s.ends_with(close)
                && s.matches(open).count() < s.matches(close).count()
            {
                s = &s[..s.len() - close.len_utf8()];
            }
        }
        if s.len() == before {
            return s;
        }
    }
}

/// Prefixes `https://` when the scheme is missing or protocol-relative.
fn normalize_scheme(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{raw}")
    }
}

fn is_search_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path();
            path == "/s" || path.starts_with("/s/") || path.starts_with("/b/") || path == "/b"
        }
        Err(_) => false,
    }
}

/// Finds every recognizable product URL in `text`, de-duplicated by
/// normalized URL with first-occurrence order preserved. An empty result
/// is a normal outcome, not an error.
pub fn extract(text: &str) -> Vec<RecognizedLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for span in find_spans(text) {
        if !seen.insert(span.url.clone()) {
            continue;
        }
        let asin = resolve_identifier(&span.url);
        links.push(RecognizedLink {
            raw: span.raw,
            offset: span.start,
            url: span.url,
            asin,
            class: span.class,
        });
    }
    links
}

/// Extracts the catalog item identifier from a URL, trying the known path
/// shapes in priority order. Absence is a normal outcome; callers fall
/// back to query-parameter rewriting.
pub fn resolve_identifier(url: &str) -> Option<String> {
    for re in [&RE_ASIN_DP, &RE_ASIN_GP, &RE_ASIN_GP_AW, &RE_ASIN_SEGMENT] {
        if let Some(caps) = re.captures(url) {
            let candidate = &caps[1];
            if candidate.len() == 10 && candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn marketplace_host(host: &str) -> Option<&str> {
    let bare = host.strip_prefix("www.").unwrap_or(host);
    if bare.starts_with("amazon.") {
        Some(bare)
    } else {
        None
    }
}

/// Rewrites one URL to its affiliate-tagged form.
///
/// With an identifier: the minimal canonical form
/// `https://<domain>/dp/<id>?tag=<tag>` plus the preserved-parameter
/// allow-list. Without one, on a marketplace domain: existing query kept,
/// `tag` replaced. Any pre-existing `tag` is always dropped in favor of
/// the configured one. Unrecognized or unparseable URLs come back
/// unchanged.
pub fn rewrite(url: &str, affiliate_tag: &str, search_domain: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(url, error = %err, "unparseable URL passed through unchanged");
            return url.to_string();
        }
    };

    let host = parsed.host_str().unwrap_or("");
    let is_shortener = host == "amzn.to" || host == "a.co";
    if marketplace_host(host).is_none() && !is_shortener {
        // Not a catalog link; "output equals input" tells the caller so.
        return url.to_string();
    }

    if let Some(asin) = resolve_identifier(url) {
        // A shortener host cannot carry the canonical form itself, so the
        // configured search domain steps in.
        let domain = marketplace_host(host).unwrap_or(search_domain);
        let mut out = match Url::parse(&format!("https://{domain}/dp/{asin}")) {
            Ok(out) => out,
            Err(err) => {
                warn!(url, error = %err, "could not build canonical form, passing through");
                return url.to_string();
            }
        };
        {
            let mut pairs = out.query_pairs_mut();
            pairs.append_pair("tag", affiliate_tag);
            for (key, value) in parsed.query_pairs() {
                if PRESERVED_PARAMS.contains(&key.as_ref()) {
                    pairs.append_pair(&key, &value);
                }
            }
        }
        return out.to_string();
    }

    if is_shortener {
        // Unexpanded short link without an identifier; publish as-is.
        return url.to_string();
    }

    let mut out = parsed.clone();
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != "tag")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = out.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("tag", affiliate_tag);
    }
    out.to_string()
}

/// Rewrites every recognized link in `text`.
///
/// Shortened links are expanded through `resolver` first (each failure
/// falls back to the unexpanded URL; one slow redirect never blocks the
/// others becoming best-effort). Occurrences are replaced in reverse text
/// order so one matched URL being a prefix of another can never corrupt
/// the surrounding text. Duplicate occurrences of one URL all get
/// replaced but count as a single conversion.
pub async fn rewrite_all(
    text: &str,
    affiliate_tag: &str,
    search_domain: &str,
    resolver: &dyn RedirectResolver,
) -> RewriteOutcome {
    let spans = find_spans(text);
    if spans.is_empty() {
        return RewriteOutcome {
            text: text.to_string(),
            conversions: 0,
            links: Vec::new(),
        };
    }

    // Unique URLs in first-occurrence order.
    let mut order: Vec<&Span> = Vec::new();
    let mut seen = HashSet::new();
    for span in &spans {
        if seen.insert(span.url.as_str()) {
            order.push(span);
        }
    }

    let mut rewritten: HashMap<String, String> = HashMap::new();
    let mut links = Vec::with_capacity(order.len());
    let mut conversions = 0usize;
    for span in order {
        let mut final_url = span.url.clone();
        if span.class == LinkClass::Shortened {
            final_url = resolver.resolve(&final_url).await;
        }
        let affiliate = rewrite(&final_url, affiliate_tag, search_domain);
        if affiliate != span.url {
            conversions += 1;
        }
        debug!(original = %span.url, affiliate = %affiliate, "rewrote link");
        rewritten.insert(span.url.clone(), affiliate.clone());
        links.push(RewrittenLink {
            original: span.raw.clone(),
            affiliate,
        });
    }

    let mut out = text.to_string();
    for span in spans.iter().rev() {
        if let Some(affiliate) = rewritten.get(&span.url) {
            if affiliate != &span.raw {
                out.replace_range(span.start..span.start + span.raw.len(), affiliate);
            }
        }
    }

    RewriteOutcome {
        text: out,
        conversions,
        links,
    }
}
