//! Crawler and automation detection from the declared User-Agent

/// Lower-case substrings that mark a client as automated
const BOT_PATTERNS: &[&str] = &[
    // Search engine crawlers
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "sogou",
    "exabot",
    "facebot",
    "facebookexternalhit",
    "ia_archiver",
    "alexa",
    "msnbot",
    "mediapartners-google",
    "apis-google",
    "feedfetcher",
    "adsbot",
    // SEO tools
    "ahrefsbot",
    "semrushbot",
    "dotbot",
    "rogerbot",
    "gigabot",
    "voilabot",
    // Generic markers
    "spider",
    "crawler",
    "bot",
    "scraper",
    // Scripting libraries
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "java",
    "apache-httpclient",
    "go-http-client",
    // Headless browsers and audit tools
    "headlesschrome",
    "phantomjs",
    "selenium",
    "puppeteer",
    "lighthouse",
    "pagespeed",
    "gtmetrix",
];

/// Returns true when the user agent matches a known crawler, tool or
/// scripting-library signature. A missing user agent is not bot evidence.
pub fn is_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    BOT_PATTERNS.iter().any(|pattern| ua.contains(pattern))
}
