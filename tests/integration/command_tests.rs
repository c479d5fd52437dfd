//! Command dispatcher: poll, ordered execution, and ack discipline.

use crate::mock_hw::*;

use tagmaster::app::commands::{CommandDispatcher, DispatcherState};
use tagmaster::app::ports::{Method, storage_keys as keys};
use tagmaster::app::scan::ScanPipeline;
use tagmaster::app::session::SessionManager;
use tagmaster::error::{Error, NetworkError, ProtocolError};

struct Fixture {
    h: Harness,
    session: SessionManager,
    scan: ScanPipeline,
    dispatcher: CommandDispatcher,
}

impl Fixture {
    fn new() -> Self {
        let mut h = Harness::new();
        h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
        h.storage.seed_str(keys::WIFI_SSID, "shop");
        h.storage.seed_str(keys::WIFI_PASS, "hunter22");
        let cfg = config();
        let mut session = SessionManager::new(identity(), &cfg);
        session.restore(&h.storage);
        Self {
            h,
            session,
            scan: ScanPipeline::new(&cfg),
            dispatcher: CommandDispatcher::new(&cfg),
        }
    }

    fn poll(&mut self) -> Result<tagmaster::app::commands::DispatchReport, Error> {
        let mut ports = self.h.ports();
        self.dispatcher
            .poll_and_dispatch(&mut self.session, &mut self.scan, &mut ports)
    }

    fn acked_ids(&self) -> Vec<String> {
        self.h
            .sent_to(ACK)
            .into_iter()
            .filter_map(|op| match op {
                Op::Sent { body: Some(b), .. } => {
                    let v: serde_json::Value = serde_json::from_str(&b).ok()?;
                    v["command_id"].as_str().map(str::to_owned)
                }
                _ => None,
            })
            .collect()
    }
}

#[test]
fn poll_is_authenticated_and_scoped_to_device() {
    let mut f = Fixture::new();
    f.poll().unwrap();

    let sent = f.h.sent_to(COMMANDS);
    assert_eq!(sent.len(), 1);
    let Op::Sent { method, bearer, .. } = &sent[0] else { unreachable!() };
    assert_eq!(*method, Method::Get);
    assert_eq!(bearer.as_deref(), Some("tok-1"));
}

#[test]
fn every_command_is_acked_once_in_order() {
    let mut f = Fixture::new();
    f.h.transport.reply(
        COMMANDS,
        Ok(json(
            200,
            r#"{"commands":[{"id":"1","action":"start-scan"},{"id":2,"action":"dance"},{"id":"3","action":"start_scan"}]}"#,
        )),
    );

    let report = f.poll().unwrap();

    assert_eq!(report.received, 3);
    assert_eq!(report.acked, vec!["1", "2", "3"]);
    assert_eq!(f.acked_ids(), vec!["1", "2", "3"]);
    assert_eq!(report.unsupported, vec!["dance"]);
    assert!(report.scan_armed);
    assert!(!report.restarting);
    assert!(f.h.display.showed("Tap card"));
    assert!(f.scan.prompt_armed(f.h.clock.now_ms.get()));
    assert_eq!(f.dispatcher.state(), DispatcherState::Idle);
}

#[test]
fn failed_ack_is_not_retried() {
    let mut f = Fixture::new();
    f.h.transport.reply(
        COMMANDS,
        Ok(json(200, r#"{"commands":[{"id":"1","action":"start-scan"},{"id":"2","action":"start-scan"}]}"#)),
    );
    f.h.transport.reply(ACK, Err(NetworkError::Timeout));

    let report = f.poll().unwrap();

    assert_eq!(report.ack_failed, vec!["1"]);
    assert_eq!(report.acked, vec!["2"]);
    assert_eq!(f.h.sent_to(ACK).len(), 2);
}

#[test]
fn reset_network_acks_then_clears_then_restarts() {
    let mut f = Fixture::new();
    f.h.transport.reply(
        COMMANDS,
        Ok(json(
            200,
            r#"{"commands":[{"id":"9","action":"reset-network"},{"id":"10","action":"start-scan"}]}"#,
        )),
    );

    let report = f.poll().unwrap();

    assert!(report.restarting);
    assert_eq!(report.acked, vec!["9"]);
    assert!(!report.scan_armed, "nothing runs after a restart request");
    assert_eq!(f.h.system.restarts, 1);
    assert!(f.h.storage.str(keys::WIFI_SSID).is_none());
    assert!(f.h.storage.str(keys::WIFI_PASS).is_none());
    // Session survives a network reset.
    assert_eq!(f.h.storage.str(keys::TOKEN), Some("tok-1"));

    let ack = f.h.position(|op| matches!(op, Op::Sent { path, .. } if path == ACK)).unwrap();
    let cleared = f.h.position(|op| *op == Op::Removed(keys::WIFI_SSID.into())).unwrap();
    let restarted = f.h.position(|op| *op == Op::Restarted).unwrap();
    assert!(ack < cleared && cleared < restarted);
    assert!(f.h.display.showed("Network reset"));
    assert!(f.h.ops().contains(&Op::Delayed(config().reset_notice_ms)));
}

#[test]
fn unacked_reset_is_deferred() {
    let mut f = Fixture::new();
    f.h.transport.reply(
        COMMANDS,
        Ok(json(200, r#"{"commands":[{"id":"9","action":"reset-network"}]}"#)),
    );
    f.h.transport.reply(ACK, Ok(json(500, r#"{"error":"db down"}"#)));

    let report = f.poll().unwrap();

    assert!(!report.restarting);
    assert_eq!(report.ack_failed, vec!["9"]);
    assert_eq!(f.h.system.restarts, 0);
    assert_eq!(f.h.storage.str(keys::WIFI_SSID), Some("shop"));
}

#[test]
fn failed_poll_processes_nothing() {
    let mut f = Fixture::new();
    f.h.transport.reply(COMMANDS, Err(NetworkError::Unreachable));

    assert_eq!(f.poll(), Err(Error::Network(NetworkError::Unreachable)));
    assert!(f.h.sent_to(ACK).is_empty());
    assert_eq!(f.dispatcher.state(), DispatcherState::Idle);
}

#[test]
fn malformed_batch_is_rejected_whole() {
    let mut f = Fixture::new();
    f.h.transport.reply(
        COMMANDS,
        Ok(json(200, r#"{"commands":[{"id":"1","action":"start-scan"},{"action":"x"}]}"#)),
    );

    assert_eq!(f.poll(), Err(Error::Protocol(ProtocolError::MalformedBody)));
    assert!(f.h.sent_to(ACK).is_empty());
}

#[test]
fn empty_poll_sends_no_acks() {
    let mut f = Fixture::new();
    f.h.transport.reply(COMMANDS, Ok(json(200, r#"{"commands":[]}"#)));

    let report = f.poll().unwrap();
    assert_eq!(report.received, 0);
    assert!(f.h.sent_to(ACK).is_empty());
}
