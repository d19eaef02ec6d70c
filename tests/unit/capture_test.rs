mod test_support;

use russh::server::{Auth, Handler};
use sshpot::emitter::events::EventKind;
use sshpot::emitter::EventEmitter;
use sshpot::ssh::capture::{CaptureHandler, ChannelKind, CredentialCapture, Denied};
use sshpot::ssh::handler::{HoneypotHandler, SessionSignal};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use test_support::*;
use tokio::sync::mpsc;

fn handler_with_recorder() -> (
    HoneypotHandler<RecordingCapture>,
    Arc<CaptureLog>,
    mpsc::UnboundedReceiver<SessionSignal>,
) {
    let (capture, log) = RecordingCapture::new();
    let (tx, rx) = mpsc::unbounded_channel();
    (HoneypotHandler::new(capture, peer(2200), "c0ffee00", tx), log, rx)
}

fn is_password_reject(auth: &Auth) -> bool {
    matches!(
        auth,
        Auth::Reject {
            proceed_with_methods: Some(_),
            partial_success: false
        }
    )
}

// ---------------------------------------------------------------------------
// Test 1: Password auth goes through the capture exactly once and is rejected
// ---------------------------------------------------------------------------
#[tokio::test]
async fn password_auth_reaches_capture_and_rejects() {
    let (mut handler, log, _rx) = handler_with_recorder();

    let auth = handler.auth_password("root", "toor").await.unwrap();
    assert!(is_password_reject(&auth), "password auth must be rejected");
    assert_eq!(log.password_calls(), 1);
    assert_eq!(
        log.credentials.lock().unwrap()[0],
        ("root".to_string(), "toor".to_string())
    );
}

// ---------------------------------------------------------------------------
// Test 2: Every other auth method is rejected without touching the password hook
// ---------------------------------------------------------------------------
#[tokio::test]
async fn other_methods_rejected_without_capture() {
    let (mut handler, log, _rx) = handler_with_recorder();

    let auth = handler.auth_none("root").await.unwrap();
    assert!(is_password_reject(&auth));
    let auth = handler
        .auth_keyboard_interactive("root", "", None)
        .await
        .unwrap();
    assert!(is_password_reject(&auth));

    let key = sshpot::ssh::keys::generate_host_key().unwrap();
    let public = key.public_key().clone();
    let auth = handler.auth_publickey_offered("root", &public).await.unwrap();
    assert!(is_password_reject(&auth));
    let auth = handler.auth_publickey("root", &public).await.unwrap();
    assert!(is_password_reject(&auth));

    assert_eq!(log.password_calls(), 0);
    assert_eq!(log.method_queries.load(Ordering::SeqCst), 4);
}

// ---------------------------------------------------------------------------
// Test 3: The supervisor is told once that the auth stage was reached
// ---------------------------------------------------------------------------
#[tokio::test]
async fn auth_reached_signalled_once() {
    let (mut handler, _log, mut rx) = handler_with_recorder();

    handler.auth_none("a").await.unwrap();
    handler.auth_password("a", "b").await.unwrap();
    handler.auth_password("a", "c").await.unwrap();

    assert!(matches!(rx.try_recv(), Ok(SessionSignal::AuthStarted)));
    assert!(rx.try_recv().is_err(), "only one AuthStarted signal expected");
}

// ---------------------------------------------------------------------------
// Test 4: The user-auth service request alone starts the channel wait
// ---------------------------------------------------------------------------
#[tokio::test]
async fn auth_service_request_signals_without_banner() {
    let (mut handler, log, mut rx) = handler_with_recorder();

    let banner = handler.authentication_banner().await.unwrap();
    assert!(banner.is_none(), "no banner is shown to peers");
    assert!(matches!(rx.try_recv(), Ok(SessionSignal::AuthStarted)));

    handler.auth_password("root", "toor").await.unwrap();
    assert!(rx.try_recv().is_err(), "the signal is sent once per session");
    assert_eq!(log.password_calls(), 1);
}

// ---------------------------------------------------------------------------
// Test 5: Credential capture emits verbatim login events with attempt numbers
// ---------------------------------------------------------------------------
#[tokio::test]
async fn credential_capture_emits_login_attempts() {
    let emitter = Arc::new(EventEmitter::new_noop());
    let mut capture = CredentialCapture::new(peer(40123), "abcd1234", emitter.clone());

    for (user, pass) in [("root", "toor"), ("admin", "admin"), ("", "")] {
        assert_eq!(capture.password_auth(user, pass), Denied);
    }

    let events = emitter.recent_events(10);
    assert_eq!(events.len(), 3);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.kind(), EventKind::LoginAttempt);
        let attrs = event.attributes();
        assert_eq!(attrs["attempt"], (i + 1) as u64);
        assert_eq!(attrs["source_ip"], "198.51.100.9");
        assert_eq!(attrs["source_port"], 40123);
        assert_eq!(attrs["correlation_id"], "abcd1234");
    }
    assert_eq!(events[2].attributes()["username"], "");
    assert_eq!(events[2].attributes()["password"], "");
}

// ---------------------------------------------------------------------------
// Test 6: Only session channels are approved
// ---------------------------------------------------------------------------
#[test]
fn credential_capture_channel_policy() {
    let emitter = Arc::new(EventEmitter::new_noop());
    let mut capture = CredentialCapture::new(peer(1), "x", emitter.clone());
    assert!(capture.channel_request(&ChannelKind::Session).is_accept());
    assert!(!capture.channel_request(&ChannelKind::DirectTcpip).is_accept());
    assert!(!capture.channel_request(&ChannelKind::X11).is_accept());
    assert!(emitter.recent_events(10).is_empty(), "channel policy never emits");
}
