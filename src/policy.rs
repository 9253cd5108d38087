//! Forwarding policy - decides whether a classified message goes out

use crate::classifier::ClassificationResult;
use crate::config::ForwardConfig;

/// Minimum confidence for a message to count as a code in verification-only mode
pub const CONFIDENCE_THRESHOLD: u8 = 30;

/// Why a message was or was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Forward,
    /// Verification-only mode rejected the message
    Filtered,
    /// Relay disabled or no destination configured
    Disabled,
    /// Nothing to forward: the body is blank
    Empty,
}

/// Enabled/destination gate, checked before any classification
pub fn gate(config: &ForwardConfig) -> Decision {
    if config.is_complete() {
        Decision::Forward
    } else {
        Decision::Disabled
    }
}

pub fn should_forward(config: &ForwardConfig, classification: &ClassificationResult) -> bool {
    if !config.verification_only_mode {
        return true;
    }
    classification.is_verification_like && classification.confidence_score >= CONFIDENCE_THRESHOLD
}

/// Full decision: gate first, then the verification-only filter
pub fn evaluate(config: &ForwardConfig, classification: &ClassificationResult) -> Decision {
    match gate(config) {
        Decision::Forward if should_forward(config, classification) => Decision::Forward,
        Decision::Forward => Decision::Filtered,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, SenderTrust};

    fn result(is_code: bool, score: u8) -> ClassificationResult {
        ClassificationResult {
            is_verification_like: is_code,
            confidence_score: score,
            extracted_code: None,
            matched_keywords: Vec::new(),
            sender_trust_level: SenderTrust::Normal,
        }
    }

    fn config(only_codes: bool) -> ForwardConfig {
        ForwardConfig {
            destination_url: "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=abc".into(),
            enabled: true,
            verification_only_mode: only_codes,
        }
    }

    #[test]
    fn test_threshold_value() {
        assert_eq!(CONFIDENCE_THRESHOLD, 30);
    }

    #[test]
    fn test_forward_all_mode() {
        assert!(should_forward(&config(false), &result(false, 0)));
        assert!(should_forward(&config(false), &result(true, 100)));
    }

    #[test]
    fn test_verification_only_mode() {
        let cfg = config(true);
        assert!(should_forward(&cfg, &result(true, CONFIDENCE_THRESHOLD)));
        assert!(!should_forward(&cfg, &result(true, CONFIDENCE_THRESHOLD - 1)));
        assert!(!should_forward(&cfg, &result(false, 100)));
    }

    #[test]
    fn test_evaluate_disabled() {
        let mut cfg = config(false);
        cfg.enabled = false;
        assert_eq!(evaluate(&cfg, &result(true, 90)), Decision::Disabled);
    }

    #[test]
    fn test_evaluate_filtered() {
        let cfg = config(true);
        let chat = classify("今晚一起吃饭吗", "+8613800001111");
        assert_eq!(evaluate(&cfg, &chat), Decision::Filtered);
    }

    #[test]
    fn test_evaluate_forward() {
        let cfg = config(true);
        let otp = classify("您的验证码是 385920，5分钟内有效", "95555");
        assert_eq!(evaluate(&cfg, &otp), Decision::Forward);
    }
}
