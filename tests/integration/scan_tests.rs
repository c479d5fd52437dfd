//! Scan pipeline: debounce, report payload, and result rendering.

use crate::mock_hw::*;

use tagmaster::app::scan::{ScanOutcome, ScanPipeline, ScanResult};
use tagmaster::app::session::SessionManager;
use tagmaster::error::{Error, NetworkError};

fn setup() -> (Harness, SessionManager, ScanPipeline) {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
    let cfg = config();
    let mut session = SessionManager::new(identity(), &cfg);
    session.restore(&h.storage);
    (h, session, ScanPipeline::new(&cfg))
}

#[test]
fn known_customer_is_shown_with_balance() {
    let (mut h, mut session, mut scan) = setup();
    h.transport.reply(
        SCAN,
        Ok(json(200, r#"{"customer":{"name":"Jane","balance":500}}"#)),
    );

    let result = scan.report(&tag("04A1B2C3"), &mut session, &mut h.ports());

    assert_eq!(
        result,
        ScanResult::Reported(ScanOutcome::KnownCustomer {
            name: "Jane".into(),
            balance: "500".into()
        })
    );
    let lines = h.display.lines();
    assert_eq!(lines[0], ("Card UID:".into(), "04A1B2C3".into()));
    let (top, bottom) = h.display.last().unwrap();
    assert_eq!(top, "Jane");
    assert!(bottom.contains("500"));
}

#[test]
fn report_names_tag_and_master_device() {
    let (mut h, mut session, mut scan) = setup();
    scan.report(&tag("04A1B2C3"), &mut session, &mut h.ports());

    let Op::Sent { body: Some(body), bearer, .. } = &h.sent_to(SCAN)[0] else {
        panic!("scan not reported");
    };
    assert_eq!(bearer.as_deref(), Some("tok-1"));
    let v: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(v["rfid_uid"], "04A1B2C3");
    assert_eq!(v["master_device_id"], "dev-1");
}

#[test]
fn new_tag_is_registered() {
    let (mut h, mut session, mut scan) = setup();
    h.transport.reply(SCAN, Ok(json(200, r#"{"success":true}"#)));

    let result = scan.report(&tag("04A1B2C3"), &mut session, &mut h.ports());

    assert_eq!(result, ScanResult::Reported(ScanOutcome::Registered));
    assert_eq!(h.display.last().unwrap().0, "Card registered");
}

#[test]
fn repeat_inside_window_sends_nothing() {
    let (mut h, mut session, mut scan) = setup();
    let uid = tag("04A1B2C3");

    scan.report(&uid, &mut session, &mut h.ports());
    h.clock.advance(1_000);
    let shown_before = h.display.lines().len();
    let again = scan.report(&uid, &mut session, &mut h.ports());

    assert_eq!(again, ScanResult::Debounced);
    assert_eq!(h.sent_to(SCAN).len(), 1);
    assert_eq!(h.display.lines().len(), shown_before);

    h.clock.advance(u64::from(config().scan_debounce_ms));
    scan.report(&uid, &mut session, &mut h.ports());
    assert_eq!(h.sent_to(SCAN).len(), 2);
}

#[test]
fn send_failure_is_shown() {
    let (mut h, mut session, mut scan) = setup();
    h.transport.reply(SCAN, Err(NetworkError::Unreachable));

    let result = scan.report(&tag("04A1B2C3"), &mut session, &mut h.ports());

    assert_eq!(result, ScanResult::Failed(Error::Network(NetworkError::Unreachable)));
    assert_eq!(h.display.last().unwrap().0, "Send failed");
}

#[test]
fn rejected_token_is_renewed_and_the_report_resent_once() {
    let (mut h, mut session, mut scan) = setup();
    h.transport.reply(SCAN, Ok(json(401, r#"{"error":"Token expired"}"#)));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-2", 1_900_000_000)));
    h.transport.reply(
        SCAN,
        Ok(json(200, r#"{"customer":{"name":"Jane","balance":500}}"#)),
    );

    let result = scan.report(&tag("04A1B2C3"), &mut session, &mut h.ports());

    assert_eq!(
        result,
        ScanResult::Reported(ScanOutcome::KnownCustomer {
            name: "Jane".into(),
            balance: "500".into()
        })
    );
    assert_eq!(h.logins(), 1);
    let sends = h.sent_to(SCAN);
    assert_eq!(sends.len(), 2);
    assert!(matches!(&sends[0], Op::Sent { bearer: Some(b), .. } if b == "tok-1"));
    assert!(matches!(&sends[1], Op::Sent { bearer: Some(b), .. } if b == "tok-2"));
    assert_eq!(h.display.last().unwrap().0, "Jane");
}

#[test]
fn armed_prompt_changes_heading_once() {
    let (mut h, mut session, mut scan) = setup();
    scan.arm_prompt(0);

    scan.report(&tag("04A1B2C3"), &mut session, &mut h.ports());
    assert_eq!(h.display.lines()[0].0, "Card read");

    scan.report(&tag("04FFFFFF"), &mut session, &mut h.ports());
    assert!(h.display.lines().iter().any(|(t, b)| t == "Card UID:" && b == "04FFFFFF"));
}
