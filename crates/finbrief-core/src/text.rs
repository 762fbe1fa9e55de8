//! Text pass applied to collected news before persistence.

use std::sync::LazyLock;

use regex::Regex;

use crate::NewsItem;

const SUMMARY_MAX_CHARS: usize = 120;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("markup pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Finance concepts: canonical term followed by the spellings that map to it.
const VOCABULARY: &[(&str, &[&str])] = &[
    ("stock", &["stock", "equities", "股票"]),
    ("market", &["market", "市场"]),
    ("investment", &["invest", "投资"]),
    ("economy", &["economy", "economic", "经济"]),
    ("finance", &["finance", "financial", "金融"]),
    ("central bank", &["central bank", "央行"]),
    ("interest rate", &["interest rate", "利率"]),
    ("exchange rate", &["exchange rate", "汇率"]),
    ("inflation", &["inflation", "通胀"]),
    ("growth", &["growth", "增长"]),
    ("technology", &["technology", "tech", "科技"]),
    ("new energy", &["new energy", "renewable", "新能源"]),
    ("consumer", &["consumer", "consumption", "消费"]),
    ("manufacturing", &["manufacturing", "制造业"]),
];

/// Weighted sentiment terms; weights near 1 are bullish, near 0 bearish.
const LEXICON: &[(&str, f64)] = &[
    ("surge", 0.9),
    ("soar", 0.9),
    ("record high", 0.85),
    ("bullish", 0.8),
    ("rally", 0.75),
    ("beat", 0.75),
    ("upgrade", 0.75),
    ("gain", 0.7),
    ("profit", 0.7),
    ("recovery", 0.7),
    ("rise", 0.65),
    ("decline", 0.3),
    ("fall", 0.3),
    ("drop", 0.25),
    ("loss", 0.2),
    ("downgrade", 0.2),
    ("bearish", 0.2),
    ("slump", 0.15),
    ("recession", 0.1),
    ("plunge", 0.05),
    ("crash", 0.05),
    ("暴涨", 0.95),
    ("大涨", 0.85),
    ("利好", 0.8),
    ("突破", 0.75),
    ("上涨", 0.7),
    ("盈利", 0.7),
    ("下跌", 0.3),
    ("利空", 0.2),
    ("亏损", 0.2),
    ("大跌", 0.15),
    ("衰退", 0.15),
    ("暴跌", 0.05),
];

/// Strip markup, decode `&nbsp;`, collapse whitespace runs and trim.
///
/// Tags are stripped until none remain, so nested brackets such as `<<b>>`
/// cannot leave a fresh tag behind.
/// `normalize_content(normalize_content(x)) == normalize_content(x)`.
pub fn normalize_content(raw: &str) -> String {
    let mut text = raw.to_owned();
    // Each pass removes at least one `<`, so this terminates.
    while MARKUP.is_match(&text) {
        text = MARKUP.replace_all(&text, " ").into_owned();
    }
    let decoded = text.replace("&nbsp;", " ");
    WHITESPACE.replace_all(&decoded, " ").trim().to_owned()
}

/// Canonical finance terms mentioned in `text`, in vocabulary order, each once.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let haystack = text.to_lowercase();
    VOCABULARY
        .iter()
        .filter(|(_, spellings)| spellings.iter().any(|term| haystack.contains(term)))
        .map(|(canonical, _)| (*canonical).to_owned())
        .collect()
}

/// Mean weight of the lexicon terms found in `text`, or `None` when no term
/// matches.
pub fn score_sentiment(text: &str) -> Option<f64> {
    let haystack = text.to_lowercase();
    let weights: Vec<f64> = LEXICON
        .iter()
        .filter(|(term, _)| haystack.contains(term))
        .map(|(_, weight)| *weight)
        .collect();

    if weights.is_empty() {
        return None;
    }
    Some(weights.iter().sum::<f64>() / weights.len() as f64)
}

/// Normalize an item and attach keywords, sentiment and a short summary.
pub fn prepare_news(mut item: NewsItem) -> NewsItem {
    item.title = normalize_content(&item.title);
    item.content = normalize_content(&item.content);
    item.summary = if item.summary.trim().is_empty() {
        summarize(&item.content)
    } else {
        normalize_content(&item.summary)
    };

    let analysed = format!("{} {}", item.title, item.content);
    item.keywords = extract_keywords(&analysed);
    item.sentiment = score_sentiment(&analysed);
    item
}

fn summarize(content: &str) -> String {
    if content.chars().count() <= SUMMARY_MAX_CHARS {
        return content.to_owned();
    }
    let head: String = content.chars().take(SUMMARY_MAX_CHARS).collect();
    format!("{}...", head.trim_end())
}
