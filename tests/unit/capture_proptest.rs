use proptest::prelude::*;
use sshpot::emitter::gelf::GelfEncoder;
use sshpot::emitter::EventEmitter;
use sshpot::ssh::capture::{CaptureHandler, CredentialCapture, Denied};
use sshpot::utils::escape_for_log;
use std::net::SocketAddr;
use std::sync::Arc;

fn capture() -> (CredentialCapture, Arc<EventEmitter>) {
    let emitter = Arc::new(EventEmitter::new_noop());
    let peer: SocketAddr = "192.0.2.44:50000".parse().unwrap();
    (CredentialCapture::new(peer, "feedface", emitter.clone()), emitter)
}

proptest! {
    #[test]
    fn password_auth_always_denies(user in any::<String>(), pass in any::<String>()) {
        let (mut cap, _) = capture();
        prop_assert_eq!(cap.password_auth(&user, &pass), Denied);
    }

    #[test]
    fn emitted_credentials_are_verbatim(user in any::<String>(), pass in any::<String>()) {
        let (mut cap, emitter) = capture();
        cap.password_auth(&user, &pass);
        let events = emitter.recent_events(1);
        prop_assert_eq!(events.len(), 1);
        let attrs = events[0].attributes();
        prop_assert_eq!(attrs["username"].as_str(), Some(user.as_str()));
        prop_assert_eq!(attrs["password"].as_str(), Some(pass.as_str()));
    }

    #[test]
    fn control_characters_survive_gelf_encoding(
        user in "[\\x00-\\x1f\\x7f a-z]{0,32}",
        pass in "[\\x00-\\x1f\\x7f\\PC]{0,64}",
    ) {
        let (mut cap, emitter) = capture();
        cap.password_auth(&user, &pass);
        let event = &emitter.recent_events(1)[0];
        let datagrams = GelfEncoder::new("h", 8192).encode(event).unwrap();
        prop_assert_eq!(datagrams.len(), 1);
        let msg: serde_json::Value = serde_json::from_slice(&datagrams[0]).unwrap();
        prop_assert_eq!(msg["_username"].as_str(), Some(user.as_str()));
        prop_assert_eq!(msg["_password"].as_str(), Some(pass.as_str()));
    }

    #[test]
    fn log_escaping_removes_control_chars(s in any::<String>()) {
        let escaped = escape_for_log(&s);
        prop_assert!(!escaped.chars().any(|c| c.is_control()));
    }

    #[test]
    fn attempt_numbers_are_sequential(n in 1usize..20) {
        let (mut cap, emitter) = capture();
        for _ in 0..n {
            cap.password_auth("u", "p");
        }
        let events = emitter.recent_events(n);
        for (i, event) in events.iter().enumerate() {
            prop_assert_eq!(event.attributes()["attempt"].as_u64(), Some(i as u64 + 1));
        }
    }
}
