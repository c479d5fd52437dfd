//! Session manager against the mock uplink: login, cache, and the
//! one-shot re-authentication on credential failures.

use crate::mock_hw::*;

use tagmaster::app::ports::{HttpRequest, storage_keys as keys};
use tagmaster::app::session::SessionManager;
use tagmaster::error::{AuthError, Error, NetworkError, ProtocolError};

fn manager() -> SessionManager {
    SessionManager::new(identity(), &config())
}

fn heartbeat(_: &tagmaster::app::session::Session) -> HttpRequest {
    HttpRequest::post_json(format!("{API_BASE}{HEARTBEAT}"), "{}".into(), 1_000)
}

#[test]
fn login_persists_every_field_with_expiry_last() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-1", 1_900_000_000)));
    let mut mgr = manager();

    mgr.login(&mut h.ports().uplink()).unwrap();

    let s = mgr.session().unwrap();
    assert_eq!(s.device_id(), "dev-1");
    assert_eq!(s.token(), "tok-1");
    assert_eq!(h.storage.str(keys::DEVICE_ID), Some("dev-1"));
    assert_eq!(h.storage.str(keys::COMPANY_ID), Some("co-1"));
    assert_eq!(h.storage.str(keys::TOKEN), Some("tok-1"));
    assert_eq!(h.storage.u64(keys::TOKEN_EXPIRY), Some(1_900_000_000));

    let removed = h.position(|op| *op == Op::Removed(keys::TOKEN_EXPIRY.into())).unwrap();
    let token = h.position(|op| *op == Op::Stored(keys::TOKEN.into())).unwrap();
    let expiry = h.position(|op| *op == Op::Stored(keys::TOKEN_EXPIRY.into())).unwrap();
    assert!(removed < token && token < expiry);
}

#[test]
fn login_payload_carries_identity() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-1", 1_900_000_000)));
    manager().login(&mut h.ports().uplink()).unwrap();

    let Op::Sent { body: Some(body), bearer, .. } = &h.sent_to(LOGIN)[0] else {
        panic!("login not sent");
    };
    assert!(bearer.is_none());
    let v: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(v["device_serial"], SERIAL);
    assert_eq!(v["device_type"], "master");
    assert_eq!(v["device_secret"], "s3cret");
}

#[test]
fn failed_login_keeps_previous_session() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.transport.reply(
        LOGIN,
        Ok(json(401, r#"{"error":"Invalid credentials","attemptsRemaining":2}"#)),
    );
    let mut mgr = manager();
    assert!(mgr.restore(&h.storage));

    let err = mgr.login(&mut h.ports().uplink()).unwrap_err();

    assert_eq!(err, AuthError::InvalidCredentials { attempts_remaining: Some(2) });
    assert_eq!(mgr.session().unwrap().token(), "old-token");
    assert_eq!(h.storage.str(keys::TOKEN), Some("old-token"));
}

#[test]
fn incomplete_grant_is_rejected_whole() {
    let mut h = Harness::new();
    h.transport.reply(
        LOGIN,
        Ok(json(200, r#"{"device_id":"dev-1","company_id":"","token":"t","token_expires_at":5}"#)),
    );
    let mut mgr = manager();

    assert_eq!(mgr.login(&mut h.ports().uplink()), Err(AuthError::IncompleteGrant));
    assert!(!mgr.is_authenticated());
    assert!(h.storage.values.is_empty());
}

#[test]
fn restore_requires_all_four_fields() {
    for missing in [keys::DEVICE_ID, keys::COMPANY_ID, keys::TOKEN, keys::TOKEN_EXPIRY] {
        let mut h = Harness::new();
        h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
        h.storage.values.remove(missing);
        let mut mgr = manager();
        assert!(!mgr.restore(&h.storage), "restored without {missing}");
        assert!(!mgr.is_authenticated());
    }
}

#[test]
fn credential_failure_relogs_exactly_once() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "new-token", 1_900_000_000)));
    let mut mgr = manager();
    mgr.restore(&h.storage);

    let result = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat);

    assert_eq!(result, Err(Error::Auth(AuthError::Status(401))));
    assert_eq!(h.logins(), 1);
    let beats = h.sent_to(HEARTBEAT);
    assert_eq!(beats.len(), 2);
    assert!(matches!(&beats[0], Op::Sent { bearer: Some(b), .. } if b == "old-token"));
    assert!(matches!(&beats[1], Op::Sent { bearer: Some(b), .. } if b == "new-token"));
}

#[test]
fn retry_after_relogin_can_succeed() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.transport.reply(HEARTBEAT, Ok(json(400, r#"{"error":"jwt expired"}"#)));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "new-token", 1_900_000_000)));
    let mut mgr = manager();
    mgr.restore(&h.storage);

    let resp = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat).unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(h.logins(), 1);
    assert_eq!(mgr.session().unwrap().token(), "new-token");
}

#[test]
fn network_failure_does_not_relogin() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
    h.transport.reply(HEARTBEAT, Err(NetworkError::Timeout));
    let mut mgr = manager();
    mgr.restore(&h.storage);

    let result = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat);

    assert_eq!(result, Err(Error::Network(NetworkError::Timeout)));
    assert_eq!(h.logins(), 0);
    assert_eq!(h.sent_to(HEARTBEAT).len(), 1);
}

#[test]
fn other_rejection_is_not_retried() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
    h.transport.reply(HEARTBEAT, Ok(json(500, r#"{"error":"db down"}"#)));
    let mut mgr = manager();
    mgr.restore(&h.storage);

    let result = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat);

    assert_eq!(result, Err(Error::Protocol(ProtocolError::UnexpectedStatus(500))));
    assert_eq!(h.logins(), 0);
}

#[test]
fn token_near_expiry_is_refreshed_before_the_call() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.clock.epoch.set(Some(1_900_000_000 - 100));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "new-token", 1_900_086_400)));
    let mut mgr = manager();
    mgr.restore(&h.storage);

    mgr.send_authenticated(&mut h.ports().uplink(), heartbeat).unwrap();

    let login = h.position(|op| matches!(op, Op::Sent { path, .. } if path == LOGIN)).unwrap();
    let beat = h.position(|op| matches!(op, Op::Sent { path, .. } if path == HEARTBEAT)).unwrap();
    assert!(login < beat);
    assert!(matches!(&h.sent_to(HEARTBEAT)[0], Op::Sent { bearer: Some(b), .. } if b == "new-token"));
}

#[test]
fn fresh_login_is_not_repeated_on_credential_failure() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-1", 1_900_000_000)));
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    let mut mgr = manager();

    let result = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat);

    assert_eq!(result, Err(Error::Auth(AuthError::Status(401))));
    assert_eq!(h.logins(), 1);
    assert_eq!(h.sent_to(HEARTBEAT).len(), 1);
}

#[test]
fn persist_failure_keeps_session_in_memory() {
    let mut h = Harness::new();
    h.storage.fail_writes = Some(tagmaster::app::ports::StorageError::Full);
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-1", 1_900_000_000)));
    let mut mgr = manager();

    mgr.login(&mut h.ports().uplink()).unwrap();

    assert!(mgr.is_authenticated());
    assert!(h.storage.str(keys::TOKEN).is_none());
}

#[test]
fn rejected_relogin_blocks_further_logins_until_backoff_ends() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    h.transport.reply(LOGIN, Ok(json(401, r#"{"error":"Invalid credentials"}"#)));
    let cfg = config();
    let mut mgr = manager();
    mgr.restore(&h.storage);

    let first = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat);
    assert_eq!(first, Err(Error::Auth(AuthError::Status(401))));
    assert_eq!(h.logins(), 1);
    assert_eq!(mgr.login_blocked_until(), Some(u64::from(cfg.login_backoff_ms)));

    // Still rejected by the backend, but no new login inside the window.
    h.clock.advance(u64::from(cfg.login_backoff_ms) - 1);
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    mgr.send_authenticated(&mut h.ports().uplink(), heartbeat).unwrap_err();
    assert_eq!(h.logins(), 1);

    h.clock.advance(1);
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "new-token", 1_900_000_000)));
    mgr.send_authenticated(&mut h.ports().uplink(), heartbeat).unwrap();
    assert_eq!(h.logins(), 2);
    assert_eq!(mgr.login_blocked_until(), None);
}

#[test]
fn lock_expiry_from_the_backend_sets_the_wait() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.clock.epoch.set(Some(1_900_000_000));
    h.transport.reply(
        LOGIN,
        Ok(json(423, r#"{"error":"Device locked","locked_until":1900000300}"#)),
    );
    let mut mgr = manager();
    mgr.restore(&h.storage);

    let result = mgr.send_authenticated(&mut h.ports().uplink(), heartbeat);

    let locked = AuthError::DeviceLocked { locked_until: Some(1_900_000_300) };
    assert_eq!(result, Err(Error::Auth(locked)));
    assert_eq!(mgr.login_blocked_until(), Some(300_000));
    assert!(h.sent_to(HEARTBEAT).is_empty());

    h.clock.advance(299_000);
    assert_eq!(mgr.ensure_authenticated(&mut h.ports().uplink()), Err(locked));
    assert_eq!(h.logins(), 1);
}

#[test]
fn transient_login_failure_does_not_block() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "old-token", 1_900_000_000);
    h.clock.epoch.set(Some(1_900_000_000));
    h.transport.reply(LOGIN, Err(NetworkError::Timeout));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "new-token", 1_900_086_400)));
    let mut mgr = manager();
    mgr.restore(&h.storage);

    mgr.ensure_authenticated(&mut h.ports().uplink()).unwrap_err();
    assert_eq!(mgr.login_blocked_until(), None);
    mgr.ensure_authenticated(&mut h.ports().uplink()).unwrap();
    assert_eq!(h.logins(), 2);
}
