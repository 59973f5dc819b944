//! Conversation handle.
//!
//! A [`Convo`] is a short-lived handle bound to one correlation identifier.
//! It offers three operations — send, expect the next message addressed to
//! it, and the send-then-expect composition — each individually timeboxed.
//! Handles are created by [`Link::convo`] and die with the exchange scope.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use parley_core::{ConvoId, LinkError, wire};

use crate::link::Link;
use crate::mailbox::Mailbox;
use crate::timebox::timebox_with;

/// One logical request/response (or push) exchange.
pub struct Convo {
    link: Link,
    id: ConvoId,
    action: String,
    started_at: DateTime<Utc>,
    mailbox: Arc<Mailbox>,
}

impl Convo {
    pub(crate) fn new(link: Link, id: ConvoId, action: String, mailbox: Arc<Mailbox>) -> Self {
        Self {
            link,
            id,
            action,
            started_at: Utc::now(),
            mailbox,
        }
    }

    /// This conversation's correlation identifier.
    #[must_use]
    pub fn id(&self) -> &ConvoId {
        &self.id
    }

    /// The action label stamped on every outgoing frame.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// When the conversation started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Send the caller's fields, tagged with this conversation's action label
    /// and correlation identifier.
    ///
    /// `fields` must be a JSON object; resolves to `()` once the transport
    /// has accepted the frame.
    pub async fn send(&self, fields: Value) -> Result<(), LinkError> {
        let frame = wire::envelope(fields, &self.action, &self.id)?;
        self.link
            .send_payload(&frame, self.link.config().send_timeout())
            .await
    }

    /// Await the next inbound message addressed to this conversation, under
    /// the configured default deadline.
    pub async fn expect(&self) -> Result<Value, LinkError> {
        self.expect_within(self.link.config().expect_timeout())
            .await
    }

    /// Await the next inbound message addressed to this conversation.
    ///
    /// Fails with [`LinkError::Timeout`] when nothing arrives within
    /// `timeout`; the abandoned mailbox wait is reaped so a later reader
    /// starts clean, and a message arriving after the deadline is backlogged
    /// rather than delivered to the caller that gave up.
    pub async fn expect_within(&self, timeout: Duration) -> Result<Value, LinkError> {
        let mailbox = Arc::clone(&self.mailbox);
        let reaper = Arc::clone(&self.mailbox);
        timebox_with(timeout, async move { mailbox.get().await }, move || {
            reaper.abandon();
        })
        .await
    }

    /// `send` then `expect`: if the send fails, its error propagates directly
    /// and no wait is attempted.
    ///
    /// `timeout` bounds only the expect half; `None` uses the configured
    /// default.
    pub async fn send_and_expect(
        &self,
        fields: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, LinkError> {
        self.send(fields).await?;
        match timeout {
            Some(timeout) => self.expect_within(timeout).await,
            None => self.expect().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::link::connect_with;
    use crate::transport::fake::FakeTransport;
    use assert_matches::assert_matches;
    use parley_core::SocketState;
    use serde_json::json;

    fn open_link() -> (Arc<FakeTransport>, Link) {
        let fake = FakeTransport::new(SocketState::Open);
        let link = connect_with(fake.clone(), LinkConfig::default());
        (fake, link)
    }

    #[tokio::test]
    async fn send_tags_action_and_identifier() {
        let (fake, link) = open_link();
        link.convo("greet", |convo| {
            let fake = Arc::clone(&fake);
            async move {
                convo.send(json!({"msg": "yo"})).await?;
                let frames = fake.sent_json();
                assert_eq!(frames.len(), 1);
                assert_eq!(
                    frames[0],
                    json!({
                        "msg": "yo",
                        "action": "greet",
                        "response_id": convo.id().as_str(),
                    })
                );
                Ok(())
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn send_rejects_non_object_fields() {
        let (fake, link) = open_link();
        link.convo("greet", |convo| {
            let fake = Arc::clone(&fake);
            async move {
                let err = convo.send(json!("just a string")).await.unwrap_err();
                assert_matches!(err, LinkError::InvalidArgument { .. });
                assert!(fake.sent().is_empty());
                Ok(())
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn send_and_expect_resolves_with_reply() {
        let (fake, link) = open_link();
        link.convo("greet", |convo| {
            let fake = Arc::clone(&fake);
            async move {
                fake.push_json(&json!({"response_id": convo.id().as_str(), "reply": "hello"}));
                let reply = convo
                    .send_and_expect(json!({"msg": "yo"}), Some(Duration::from_secs(1)))
                    .await?;
                assert_eq!(reply["reply"], "hello");
                // The outgoing frame carried the routing pair.
                let frames = fake.sent_json();
                assert_eq!(frames[0]["action"], "greet");
                assert_eq!(frames[0]["response_id"], convo.id().as_str());
                Ok(())
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn send_and_expect_skips_expect_when_send_fails() {
        let (fake, link) = open_link();
        fake.set_fail_sends(true);
        let started = std::time::Instant::now();
        let err = link
            .convo("greet", |convo| async move {
                convo
                    .send_and_expect(json!({"msg": "yo"}), Some(Duration::from_secs(30)))
                    .await
            })
            .await
            .unwrap_err();
        assert_matches!(err, LinkError::Transport { .. });
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "send failure must propagate directly, not wait out the expect"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expect_times_out_before_late_message() {
        let (fake, link) = open_link();
        let err = link
            .convo("slow", |convo| {
                let fake = Arc::clone(&fake);
                async move {
                    let id = convo.id().clone();
                    let _ = tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(70)).await;
                        fake.push_json(&json!({"response_id": id.as_str(), "late": true}));
                    });
                    let _ = convo.expect_within(Duration::from_millis(50)).await?;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_matches!(err, LinkError::Timeout { duration_ms: 50 });
    }

    #[tokio::test(start_paused = true)]
    async fn third_item_arriving_past_deadline_times_out() {
        let (fake, link) = open_link();
        let err = link
            .convo("drain", |convo| {
                let fake = Arc::clone(&fake);
                async move {
                    let id = convo.id().clone();
                    fake.push_json(&json!({"response_id": id.as_str(), "n": 1}));
                    fake.push_json(&json!({"response_id": id.as_str(), "n": 2}));
                    assert_eq!(
                        convo.expect_within(Duration::from_secs(1)).await?["n"],
                        1
                    );
                    assert_eq!(
                        convo.expect_within(Duration::from_secs(1)).await?["n"],
                        2
                    );
                    let _ = tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        fake.push_json(&json!({"response_id": id.as_str(), "n": 3}));
                    });
                    let _ = convo.expect_within(Duration::from_millis(45)).await?;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_matches!(err, LinkError::Timeout { duration_ms: 45 });
    }

    #[tokio::test]
    async fn late_message_is_backlogged_not_lost() {
        let (fake, link) = open_link();
        link.convo("retry", |convo| {
            let fake = Arc::clone(&fake);
            async move {
                let timed_out = convo.expect_within(Duration::from_millis(30)).await;
                assert_matches!(timed_out.unwrap_err(), LinkError::Timeout { .. });
                // The reply shows up after the caller gave up.
                fake.push_json(&json!({"response_id": convo.id().as_str(), "eventually": true}));
                let reply = convo.expect_within(Duration::from_secs(1)).await?;
                assert_eq!(reply["eventually"], true);
                Ok(())
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn accessors_expose_identity() {
        let (_fake, link) = open_link();
        link.convo("introspect", |convo| async move {
            assert_eq!(convo.action(), "introspect");
            assert!(!convo.id().as_str().is_empty());
            assert!(convo.started_at() <= Utc::now());
            Ok(())
        })
        .await
        .unwrap();
    }
}
