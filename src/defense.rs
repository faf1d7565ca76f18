//! Input Sanitization & IP Defense
//!
//! Supporting utilities: an HTML sanitizer for member-supplied text and the
//! suspicious-activity tracker that escalates misbehaving IPs to an
//! automatic block.
//!
//! # Sanitizer Ordering
//!
//! `<script>` blocks are removed first - tags **and** their contents - and
//! only then are remaining tags stripped with their inner text preserved.
//! The order matters: stripping tags first would turn
//! `<script>alert(1)</script>` into the literal text `alert(1)` and leak
//! script bodies into supposedly clean output.
//!
//! # Automatic IP Blocking
//!
//! Flagged events are counted per IP on the shared counter store. Reaching
//! ten events within the hour-long window installs a 24-hour block for that
//! IP. This is an enforcement mechanism, not advisory: the middleware
//! rejects blocked IPs outright.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{extract_client_ip, AuditEvent};
use crate::error::AppError;
use crate::store::SharedStore;

// ============================================================================
// Sanitization
// ============================================================================

/// Strip script blocks and HTML tags from member-supplied text.
///
/// Removes `<script>...</script>` blocks wholesale (case-insensitive,
/// including an unterminated trailing block), then strips remaining tags
/// while keeping their inner text.
pub fn sanitize_html(input: &str) -> String {
    let without_scripts = strip_script_blocks(input);
    strip_tags(&without_scripts)
}

fn strip_script_blocks(input: &str) -> String {
    const OPEN: &str = "<script";
    const CLOSE: &str = "</script>";

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    loop {
        match find_ascii_ci(rest, OPEN) {
            Some(start) => {
                // `start` sits on '<', an ASCII byte, so the slice is safe
                result.push_str(&rest[..start]);
                match find_ascii_ci(&rest[start..], CLOSE) {
                    Some(close_offset) => {
                        rest = &rest[start + close_offset + CLOSE.len()..];
                    }
                    None => {
                        // Unterminated script block: drop everything after it
                        return result;
                    }
                }
            }
            None => {
                result.push_str(rest);
                return result;
            }
        }
    }
}

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn strip_tags(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut in_tag = false;

    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    result
}

// ============================================================================
// Suspicious Activity Tracking
// ============================================================================

/// Flagged events per IP before an automatic block.
pub const SUSPICIOUS_THRESHOLD: u64 = 10;

/// Window over which flagged events are counted.
pub const SUSPICIOUS_WINDOW: Duration = Duration::from_secs(60 * 60);

/// How long an automatic IP block lasts.
pub const IP_BLOCK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Counts flagged events per IP and installs automatic blocks.
#[derive(Debug, Clone)]
pub struct SuspiciousActivityTracker {
    store: SharedStore,
}

impl SuspiciousActivityTracker {
    /// Build a tracker over a counter store.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn counter_key(ip: &str) -> String {
        format!("suspect:{}", ip)
    }

    fn block_key(ip: &str) -> String {
        format!("blocked:{}", ip)
    }

    /// Record one flagged event for an IP.
    ///
    /// Returns `true` when this event crossed the threshold and installed a
    /// block. The counter's window starts at the first flagged event and
    /// lapses an hour later; a quiet hour therefore clears the count.
    pub async fn record_event(&self, ip: &str, reason: &str) -> Result<bool, AppError> {
        let counter = self
            .store
            .increment(&Self::counter_key(ip), SUSPICIOUS_WINDOW)
            .await?;

        crate::audit_event!(
            AuditEvent::SuspiciousActivity,
            actor = %ip,
            detail = %reason,
            count = counter.count,
            "Suspicious activity flagged"
        );

        if counter.count >= SUSPICIOUS_THRESHOLD {
            self.store
                .put(&Self::block_key(ip), "blocked", IP_BLOCK_TTL)
                .await?;
            crate::audit_event!(
                AuditEvent::IpBlocked,
                actor = %ip,
                detail = %format!("{} flagged events within the window", counter.count),
                "IP automatically blocked"
            );
            return Ok(true);
        }

        Ok(false)
    }

    /// Whether an IP is currently blocked.
    pub async fn is_blocked(&self, ip: &str) -> Result<bool, AppError> {
        Ok(self.store.get(&Self::block_key(ip)).await?.is_some())
    }

    /// Lift a block early (operator action).
    pub async fn unblock(&self, ip: &str) -> Result<bool, AppError> {
        Ok(self.store.remove(&Self::block_key(ip)).await?)
    }
}

/// Middleware rejecting requests from blocked IPs.
///
/// Place early in the stack, before rate limiting: a blocked IP gets a flat
/// 403 and never reaches quota accounting.
pub async fn ip_block_middleware(
    State(tracker): State<Arc<SuspiciousActivityTracker>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request);
    match tracker.is_blocked(&ip).await {
        Ok(true) => AppError::forbidden("Access denied").into_response(),
        Ok(false) => next.run(request).await,
        // Store trouble must not take the portal down; the block check is
        // best-effort in that case.
        Err(_) => next.run(request).await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;

    #[test]
    fn test_script_blocks_removed_with_content() {
        let input = "Hello <script>alert('xss')</script>world";
        assert_eq!(sanitize_html(input), "Hello world");
    }

    #[test]
    fn test_script_content_never_leaks_as_text() {
        // The ordering property: the script body must vanish, not survive
        // as inner text after tag stripping.
        let input = "<script>document.cookie</script><b>bold</b>";
        let clean = sanitize_html(input);
        assert!(!clean.contains("document.cookie"));
        assert_eq!(clean, "bold");
    }

    #[test]
    fn test_plain_tags_stripped_text_kept() {
        assert_eq!(sanitize_html("<b>bold</b> and <i>italic</i>"), "bold and italic");
        assert_eq!(sanitize_html("no markup at all"), "no markup at all");
    }

    #[test]
    fn test_case_insensitive_script_matching() {
        let input = "a<SCRIPT>evil()</SCRIPT>b<ScRiPt src='x'>more()</sCrIpT>c";
        assert_eq!(sanitize_html(input), "abc");
    }

    #[test]
    fn test_unterminated_script_dropped() {
        let input = "before<script>evil() forever";
        assert_eq!(sanitize_html(input), "before");
    }

    fn tracker_with_clock() -> (SuspiciousActivityTracker, ManualClock) {
        let clock = ManualClock::new();
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        (SuspiciousActivityTracker::new(store), clock)
    }

    #[tokio::test]
    async fn test_block_installed_at_threshold() {
        let (tracker, _clock) = tracker_with_clock();

        for i in 1..SUSPICIOUS_THRESHOLD {
            let blocked = tracker.record_event("203.0.113.9", "probe").await.unwrap();
            assert!(!blocked, "event {} must not block yet", i);
        }
        assert!(!tracker.is_blocked("203.0.113.9").await.unwrap());

        let blocked = tracker.record_event("203.0.113.9", "probe").await.unwrap();
        assert!(blocked, "tenth event must block");
        assert!(tracker.is_blocked("203.0.113.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_quiet_hour_clears_counter() {
        let (tracker, clock) = tracker_with_clock();

        for _ in 0..(SUSPICIOUS_THRESHOLD - 1) {
            tracker.record_event("203.0.113.9", "probe").await.unwrap();
        }

        clock.advance_secs(SUSPICIOUS_WINDOW.as_secs() as i64 + 1);

        // Counter lapsed; the next event starts from one
        let blocked = tracker.record_event("203.0.113.9", "probe").await.unwrap();
        assert!(!blocked);
        assert!(!tracker.is_blocked("203.0.113.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_expires_after_ttl() {
        let (tracker, clock) = tracker_with_clock();

        for _ in 0..SUSPICIOUS_THRESHOLD {
            tracker.record_event("203.0.113.9", "probe").await.unwrap();
        }
        assert!(tracker.is_blocked("203.0.113.9").await.unwrap());

        clock.advance_secs(IP_BLOCK_TTL.as_secs() as i64 + 1);
        assert!(!tracker.is_blocked("203.0.113.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_unblock_lifts_early() {
        let (tracker, _clock) = tracker_with_clock();

        for _ in 0..SUSPICIOUS_THRESHOLD {
            tracker.record_event("203.0.113.9", "probe").await.unwrap();
        }
        assert!(tracker.unblock("203.0.113.9").await.unwrap());
        assert!(!tracker.is_blocked("203.0.113.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_ips_tracked_independently() {
        let (tracker, _clock) = tracker_with_clock();

        for _ in 0..SUSPICIOUS_THRESHOLD {
            tracker.record_event("203.0.113.9", "probe").await.unwrap();
        }
        assert!(tracker.is_blocked("203.0.113.9").await.unwrap());
        assert!(!tracker.is_blocked("203.0.113.10").await.unwrap());
    }
}
