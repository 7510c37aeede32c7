//! Single-use token semantics: one consume, supersession on reissue,
//! expiry, enumeration resistance of the reset request path.

mod common;

use auth_core::models::TokenSubject;
use auth_core::services::ServiceError;
use chrono::Duration;
use common::{drain_tasks, harness, TEST_PASSWORD};
use uuid::Uuid;

#[tokio::test]
async fn consume_succeeds_once_then_reports_already_used() {
    let h = harness();
    let subject = TokenSubject::User(Uuid::new_v4());

    let raw = h.password_reset.issue(&subject).await.unwrap();

    assert_eq!(h.password_reset.consume(&raw).await.unwrap(), subject);

    let second = h.password_reset.consume(&raw).await;
    assert!(matches!(second, Err(ServiceError::AlreadyUsed)));
}

#[tokio::test]
async fn reissue_invalidates_every_outstanding_token_for_the_subject() {
    let h = harness();
    let subject = TokenSubject::User(Uuid::new_v4());

    let first = h.password_reset.issue(&subject).await.unwrap();
    let second = h.password_reset.issue(&subject).await.unwrap();

    // The superseded token fails even though its original expiry is far off.
    let stale = h.password_reset.consume(&first).await;
    assert!(matches!(stale, Err(ServiceError::TokenExpired)));

    // The newest issue still works.
    assert_eq!(h.password_reset.consume(&second).await.unwrap(), subject);
}

#[tokio::test]
async fn reissue_does_not_cross_subjects() {
    let h = harness();
    let alice = TokenSubject::User(Uuid::new_v4());
    let bob = TokenSubject::User(Uuid::new_v4());

    let alice_token = h.password_reset.issue(&alice).await.unwrap();
    let _bob_token = h.password_reset.issue(&bob).await.unwrap();

    // Bob's issue must not invalidate Alice's token.
    assert_eq!(h.password_reset.consume(&alice_token).await.unwrap(), alice);
}

#[tokio::test]
async fn tokens_expire_on_the_clock() {
    let h = harness();
    let subject = TokenSubject::User(Uuid::new_v4());

    let raw = h.password_reset.issue(&subject).await.unwrap();
    h.clock.advance(Duration::hours(2));

    let expired = h.password_reset.consume(&raw).await;
    assert!(matches!(expired, Err(ServiceError::TokenExpired)));
}

#[tokio::test]
async fn unknown_token_reads_as_invalid_credential() {
    let h = harness();
    let result = h.password_reset.consume("never-issued").await;
    assert!(matches!(result, Err(ServiceError::InvalidCredential)));
}

#[tokio::test]
async fn email_subjects_round_trip() {
    let h = harness();
    let subject = TokenSubject::Email("new-user@example.com".to_string());

    let raw = h.registration.issue(&subject).await.unwrap();
    assert_eq!(h.registration.consume(&raw).await.unwrap(), subject);
}

#[tokio::test]
async fn reset_request_reveals_nothing_about_unknown_addresses() {
    let h = harness();
    h.seed_user("known@example.com", false).await;

    // Both calls succeed identically.
    h.auth
        .request_password_reset("known@example.com")
        .await
        .unwrap();
    h.auth
        .request_password_reset("unknown@example.com")
        .await
        .unwrap();

    // Only the real account got mail, and that is invisible to the caller.
    drain_tasks().await;
    let sent = h.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "known@example.com");
    assert_eq!(sent[0].kind, "password_reset");
}

#[tokio::test]
async fn completing_a_reset_revokes_every_other_session() {
    let h = harness();
    let user = h.seed_user("resetter@example.com", false).await;

    // Two live sessions before the reset.
    let s1 = h
        .refresh_tokens
        .issue(
            user.user_id,
            None,
            false,
            &auth_core::services::Actor::User(user.user_id),
        )
        .await
        .unwrap();
    let s2 = h
        .refresh_tokens
        .issue(
            user.user_id,
            None,
            false,
            &auth_core::services::Actor::User(user.user_id),
        )
        .await
        .unwrap();

    let raw = h
        .password_reset
        .issue(&TokenSubject::User(user.user_id))
        .await
        .unwrap();

    let tokens = h
        .auth
        .complete_password_reset(
            &raw,
            &auth_core::utils::Password::new("a brand new passphrase"),
            Some("203.0.113.9"),
        )
        .await
        .unwrap();

    // Pre-existing sessions are gone; the fresh pair works.
    assert!(h.refresh_tokens.validate(&s1.raw_token).await.is_err());
    assert!(h.refresh_tokens.validate(&s2.raw_token).await.is_err());
    assert_eq!(
        h.refresh_tokens
            .validate(&tokens.refresh_token)
            .await
            .unwrap(),
        user.user_id
    );

    // Old password out, new password in.
    assert!(h
        .credentials
        .verify_password(
            user.user_id,
            &auth_core::utils::Password::new(TEST_PASSWORD)
        )
        .await
        .is_err());
    assert!(h
        .credentials
        .verify_password(
            user.user_id,
            &auth_core::utils::Password::new("a brand new passphrase")
        )
        .await
        .is_ok());

    // And the consumed reset token is inert.
    let replay = h
        .auth
        .complete_password_reset(
            &raw,
            &auth_core::utils::Password::new("yet another"),
            None,
        )
        .await;
    assert!(matches!(replay, Err(ServiceError::AlreadyUsed)));
}
