//! MFA challenge lifecycle: verification, attempt bounds, expiry, resend.

mod common;

use auth_core::models::MfaChannel;
use auth_core::services::ServiceError;
use chrono::Duration;
use common::harness;
use uuid::Uuid;

#[tokio::test]
async fn correct_code_verifies_and_returns_the_user() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let challenge = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, Some("203.0.113.7"))
        .await
        .unwrap();

    let verified = h
        .mfa
        .verify_code(&challenge.challenge_token, &challenge.code)
        .await
        .unwrap();
    assert_eq!(verified, user_id);
}

#[tokio::test]
async fn challenge_is_consumable_at_most_once() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let challenge = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();

    h.mfa
        .verify_code(&challenge.challenge_token, &challenge.code)
        .await
        .unwrap();

    // Replaying the same correct code fails: the challenge is terminal.
    let replay = h
        .mfa
        .verify_code(&challenge.challenge_token, &challenge.code)
        .await;
    assert!(matches!(replay, Err(ServiceError::InvalidCredential)));
}

#[tokio::test]
async fn wrong_code_is_rejected_without_consuming_the_challenge() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let challenge = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();

    let wrong = h
        .mfa
        .verify_code(&challenge.challenge_token, "000000")
        .await;
    assert!(matches!(wrong, Err(ServiceError::InvalidCredential)));

    // The right code still works afterwards.
    assert_eq!(
        h.mfa
            .verify_code(&challenge.challenge_token, &challenge.code)
            .await
            .unwrap(),
        user_id
    );
}

#[tokio::test]
async fn attempts_are_bounded_even_with_the_correct_code() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let challenge = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();

    // Burn every allowed attempt (max_attempts is 3 in the test config).
    for _ in 0..3 {
        let result = h
            .mfa
            .verify_code(&challenge.challenge_token, "999999")
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidCredential)));
    }

    // Now even the correct code is refused.
    let exhausted = h
        .mfa
        .verify_code(&challenge.challenge_token, &challenge.code)
        .await;
    assert!(matches!(exhausted, Err(ServiceError::AttemptsExhausted)));
}

#[tokio::test]
async fn challenges_expire_on_the_clock() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let challenge = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(6));

    let expired = h
        .mfa
        .verify_code(&challenge.challenge_token, &challenge.code)
        .await;
    assert!(matches!(expired, Err(ServiceError::TokenExpired)));
}

#[tokio::test]
async fn unknown_challenge_fails_closed() {
    let h = harness();
    let result = h.mfa.verify_code("no-such-challenge", "123456").await;
    assert!(matches!(result, Err(ServiceError::InvalidCredential)));
}

#[tokio::test]
async fn resend_respects_the_cooldown_window() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let challenge = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();

    // Immediately asking again is throttled.
    let throttled = h.mfa.refresh_challenge(&challenge.challenge_token).await;
    assert!(matches!(throttled, Err(ServiceError::Validation(_))));

    h.clock.advance(Duration::seconds(61));

    let resent = h
        .mfa
        .refresh_challenge(&challenge.challenge_token)
        .await
        .unwrap();
    assert_eq!(resent.challenge_token, challenge.challenge_token);

    // The old code is dead, the new one verifies.
    let old = h
        .mfa
        .verify_code(&challenge.challenge_token, &challenge.code)
        .await;
    assert!(matches!(old, Err(ServiceError::InvalidCredential)));
    assert_eq!(
        h.mfa
            .verify_code(&challenge.challenge_token, &resent.code)
            .await
            .unwrap(),
        user_id
    );
}

#[tokio::test]
async fn resend_refuses_terminal_challenges() {
    let h = harness();
    let user_id = Uuid::new_v4();

    // Expired challenge.
    let expired = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(6));
    assert!(matches!(
        h.mfa.refresh_challenge(&expired.challenge_token).await,
        Err(ServiceError::TokenExpired)
    ));

    // Verified challenge.
    let verified = h
        .mfa
        .create_challenge(user_id, MfaChannel::Email, None)
        .await
        .unwrap();
    h.mfa
        .verify_code(&verified.challenge_token, &verified.code)
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(61));
    assert!(matches!(
        h.mfa.refresh_challenge(&verified.challenge_token).await,
        Err(ServiceError::InvalidCredential)
    ));
}
