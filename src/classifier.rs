//! Verification code classifier
//!
//! Scores a message body and sender against keyword, numeric-pattern and
//! trusted-sender heuristics. Pure and total: every input, including the
//! empty string, produces a result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Keywords that suggest a one-time code, matched case-insensitively.
/// Order matters: matched keywords are reported in this order.
pub static VERIFICATION_KEYWORDS: &[&str] = &[
    "验证码",
    "校验码",
    "验证码为",
    "动态码",
    "密码",
    "动态密码",
    "一次性密码",
    "OTP",
    "code",
    "verification",
    "auth",
    "登录码",
    "确认码",
    "激活码",
    "注册码",
    "安全码",
    "身份验证码",
    "短信验证码",
    "手机验证码",
    "动态验证码",
    "verification code",
    "auth code",
    "security code",
    "confirmation code",
    "PIN码",
    "PIN",
    "口令",
    "令牌",
    "token",
    "授权码",
    "校验密码",
    "登录密码",
    "临时密码",
    "有效期",
    "分钟内有效",
    "有效时间",
    "过期时间",
];

/// Numeric code shapes, in extraction priority order
pub static CODE_PATTERNS: &[&str] = &[
    r"[0-9]{4,8}",
    r"[0-9]{3}-[0-9]{3}",
    r"[0-9]{4}\s?[0-9]{4}",
    r"#[0-9]{4,6}",
    r"[0-9]{3,4}-[0-9]{3,4}",
];

/// Short-code prefixes of carriers, banks and platforms
pub static TRUSTED_SENDERS: &[&str] = &[
    "106",   // service number range
    "10086", // China Mobile
    "10010", // China Unicom
    "10000", // China Telecom
    "95555", // China Merchants Bank
    "95588", // ICBC
    "95533", // CCB
    "95599", // ABC
    "95017", // Tencent
    "1069",
    "12520",
    "12306", // railway
    "95516", // UnionPay
    "1065",
];

static LOWER_KEYWORDS: Lazy<Vec<(&'static str, String)>> = Lazy::new(|| {
    VERIFICATION_KEYWORDS
        .iter()
        .map(|k| (*k, k.to_lowercase()))
        .collect()
});

static COMPILED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    CODE_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("Invalid code pattern"))
        .collect()
});

pub const KEYWORD_SCORE: u32 = 20;
pub const PATTERN_SCORE: u32 = 15;
pub const TRUSTED_SENDER_SCORE: u32 = 10;
pub const LENGTH_SCORE: u32 = 5;

/// Body lengths (in characters) that look like a typical code message
const PLAUSIBLE_LENGTH: std::ops::RangeInclusive<usize> = 20..=200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderTrust {
    High,
    Normal,
}

impl std::fmt::Display for SenderTrust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderTrust::High => write!(f, "high"),
            SenderTrust::Normal => write!(f, "normal"),
        }
    }
}

/// Outcome of classifying one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub is_verification_like: bool,
    pub confidence_score: u8,
    pub extracted_code: Option<String>,
    pub matched_keywords: Vec<String>,
    pub sender_trust_level: SenderTrust,
}

/// The three independent heuristic signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    pub has_keyword: bool,
    pub has_code_pattern: bool,
    pub trusted_sender: bool,
}

/// Turns the raw signals into the yes/no verification decision
pub trait VerificationRule: Send + Sync {
    fn decide(&self, signals: &Signals) -> bool;
}

/// Any two of the three signals are sufficient; one alone never is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoSignalRule;

impl VerificationRule for TwoSignalRule {
    fn decide(&self, s: &Signals) -> bool {
        (s.has_keyword && s.has_code_pattern)
            || (s.has_keyword && s.trusted_sender)
            || (s.has_code_pattern && s.trusted_sender)
    }
}

/// Classifier with a pluggable decision rule
pub struct Classifier {
    rule: Box<dyn VerificationRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_rule(TwoSignalRule)
    }

    pub fn with_rule(rule: impl VerificationRule + 'static) -> Self {
        Self {
            rule: Box::new(rule),
        }
    }

    pub fn classify(&self, body: &str, sender: &str) -> ClassificationResult {
        let sender_trust_level = if is_trusted_sender(sender) {
            SenderTrust::High
        } else {
            SenderTrust::Normal
        };

        if body.is_empty() {
            return ClassificationResult {
                is_verification_like: false,
                confidence_score: 0,
                extracted_code: None,
                matched_keywords: Vec::new(),
                sender_trust_level,
            };
        }

        let matched_keywords = matched_keywords(body);
        let signals = Signals {
            has_keyword: !matched_keywords.is_empty(),
            has_code_pattern: has_code_pattern(body),
            trusted_sender: sender_trust_level == SenderTrust::High,
        };

        ClassificationResult {
            is_verification_like: self.rule.decide(&signals),
            confidence_score: score(&signals, matched_keywords.len(), body),
            extracted_code: extract_code(body),
            matched_keywords,
            sender_trust_level,
        }
    }
}

/// Classify with the default two-signal rule
pub fn classify(body: &str, sender: &str) -> ClassificationResult {
    Classifier::new().classify(body, sender)
}

/// Every lexicon entry contained in the body, in lexicon order
pub fn matched_keywords(body: &str) -> Vec<String> {
    let lower = body.to_lowercase();
    LOWER_KEYWORDS
        .iter()
        .filter(|(_, k)| lower.contains(k.as_str()))
        .map(|(keyword, _)| keyword.to_string())
        .collect()
}

pub fn has_code_pattern(body: &str) -> bool {
    COMPILED_PATTERNS.iter().any(|p| p.is_match(body))
}

pub fn is_trusted_sender(sender: &str) -> bool {
    let lower = sender.to_lowercase();
    TRUSTED_SENDERS.iter().any(|t| lower.contains(t))
}

/// Quick yes/no check without building a full result
pub fn contains_verification_code(body: &str, sender: &str) -> bool {
    classify(body, sender).is_verification_like
}

pub fn confidence(body: &str, sender: &str) -> u8 {
    classify(body, sender).confidence_score
}

/// Extract the most likely code, digits only
pub fn extract_code(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    for pattern in COMPILED_PATTERNS.iter() {
        if let Some(m) = pattern.find(body) {
            let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
    }

    standalone_digit_run(body)
}

/// First maximal run of 4-8 ASCII digits
fn standalone_digit_run(body: &str) -> Option<String> {
    let mut run = String::new();
    for c in body.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            run.push(c);
            continue;
        }
        if (4..=8).contains(&run.len()) {
            return Some(run);
        }
        run.clear();
    }
    None
}

fn score(signals: &Signals, keyword_count: usize, body: &str) -> u8 {
    let mut total = KEYWORD_SCORE.saturating_mul(keyword_count as u32);
    if signals.has_code_pattern {
        total += PATTERN_SCORE;
    }
    if signals.trusted_sender {
        total += TRUSTED_SENDER_SCORE;
    }
    if PLAUSIBLE_LENGTH.contains(&body.chars().count()) {
        total += LENGTH_SCORE;
    }
    total.min(100) as u8
}
