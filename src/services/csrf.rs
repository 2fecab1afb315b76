//! Double-submit CSRF protection.
//!
//! A readable cookie carries a random token; mutating requests must echo it
//! in a header. The two values are compared in constant time.

use crate::error::{SecurityError, SecurityResult};
use crate::services::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::services::tokens;

#[derive(Clone)]
pub struct CsrfGuard {
    audit: AuditLogger,
}

impl CsrfGuard {
    #[must_use]
    pub const fn new(audit: AuditLogger) -> Self {
        Self { audit }
    }

    #[must_use]
    pub fn generate_token(&self) -> String {
        tokens::generate_token()
    }

    /// Both values must be present, non-empty and identical.
    #[must_use]
    pub fn validate(header: Option<&str>, cookie: Option<&str>) -> bool {
        match (header, cookie) {
            (Some(h), Some(c)) if !h.is_empty() && !c.is_empty() => tokens::tokens_match(h, c),
            _ => false,
        }
    }

    pub fn verify(
        &self,
        header: Option<&str>,
        cookie: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> SecurityResult<()> {
        if Self::validate(header, cookie) {
            return Ok(());
        }

        metrics::counter!("warden_csrf_failures_total").increment(1);
        tracing::warn!(
            header_present = header.is_some(),
            cookie_present = cookie.is_some(),
            "CSRF validation failed"
        );

        self.audit.log(
            AuditEntry::new(AuditEventType::CsrfFailed)
                .client(ip, user_agent)
                .data(serde_json::json!({
                    "header_present": header.is_some(),
                    "cookie_present": cookie.is_some(),
                }))
                .failed(),
        );

        Err(SecurityError::CsrfInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::services::audit::tests::test_store;
    use std::sync::Arc;

    #[test]
    fn equal_values_pass() {
        let token = tokens::generate_token();
        assert!(CsrfGuard::validate(Some(&token), Some(&token)));
    }

    #[test]
    fn missing_or_mismatched_values_fail() {
        assert!(!CsrfGuard::validate(None, Some("abc")));
        assert!(!CsrfGuard::validate(Some("abc"), None));
        assert!(!CsrfGuard::validate(None, None));
        assert!(!CsrfGuard::validate(Some(""), Some("")));
        assert!(!CsrfGuard::validate(Some("abc"), Some("abcd")));
        assert!(!CsrfGuard::validate(Some("abc"), Some("abd")));
        assert!(!CsrfGuard::validate(Some("xbc"), Some("abc")));
    }

    #[tokio::test]
    async fn verify_audits_failures() {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let audit = AuditLogger::new(Arc::new(store.clone()), store.clone(), clock, 16);
        let guard = CsrfGuard::new(audit.clone());

        let token = guard.generate_token();
        assert!(guard.verify(Some(&token), Some(&token), None, None).is_ok());
        assert!(matches!(
            guard.verify(None, Some(&token), Some("9.9.9.9"), None),
            Err(SecurityError::CsrfInvalid)
        ));

        audit.flush().await;
        let filter = crate::db::AuditFilter {
            event_type: Some("security.csrf.failed".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_audit_logs(&filter).await.unwrap(), 1);
    }
}
