//! Orchestrated flows: login, lockout, MFA branching, registration
//! completion, email verification, logout and the unlink guard.

mod common;

use auth_core::models::TokenSubject;
use auth_core::services::{LoginOutcome, ServiceError};
use auth_core::utils::Password;
use chrono::Duration;
use common::{drain_tasks, harness, TEST_PASSWORD};
use uuid::Uuid;

#[tokio::test]
async fn login_returns_a_token_pair_for_valid_credentials() {
    let h = harness();
    let user = h.seed_user("alice@example.com", false).await;

    let outcome = h
        .auth
        .login(
            "alice@example.com",
            &Password::new(TEST_PASSWORD),
            Some("203.0.113.7"),
            false,
        )
        .await
        .unwrap();

    let LoginOutcome::Authenticated(tokens) = outcome else {
        panic!("expected tokens, got an MFA challenge");
    };

    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 900);

    // The refresh token maps back to the user; the access token carries the
    // user id and roles and nothing personal.
    assert_eq!(
        h.refresh_tokens
            .validate(&tokens.refresh_token)
            .await
            .unwrap(),
        user.user_id
    );
    let claims = h.jwt.validate_access_token(&tokens.access_token).unwrap();
    assert_eq!(claims.sub, user.user_id.to_string());
    assert_eq!(claims.roles, vec!["user".to_string()]);

    // Login stamped the audit fields on the account.
    let stored = h.users.get(user.user_id).await.unwrap();
    assert!(stored.last_login_utc.is_some());
    assert_eq!(stored.last_login_ip.as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn unknown_user_and_wrong_password_are_indistinguishable() {
    let h = harness();
    h.seed_user("bob@example.com", false).await;

    let unknown = h
        .auth
        .login("nobody@example.com", &Password::new("whatever"), None, false)
        .await;
    let wrong = h
        .auth
        .login("bob@example.com", &Password::new("wrong"), None, false)
        .await;

    assert!(matches!(unknown, Err(ServiceError::InvalidCredential)));
    assert!(matches!(wrong, Err(ServiceError::InvalidCredential)));
}

#[tokio::test]
async fn repeated_failures_lock_the_account_until_the_window_passes() {
    let h = harness();
    h.seed_user("carol@example.com", false).await;

    // max_failed_logins is 3 in the test config.
    for _ in 0..3 {
        let result = h
            .auth
            .login("carol@example.com", &Password::new("wrong"), None, false)
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidCredential)));
    }

    // Even the correct password is refused while locked.
    let locked = h
        .auth
        .login(
            "carol@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await;
    assert!(matches!(locked, Err(ServiceError::AccountLocked { .. })));

    // After the lockout window a correct login goes through and resets the
    // counters.
    h.clock.advance(Duration::minutes(16));
    let outcome = h
        .auth
        .login(
            "carol@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
}

#[tokio::test]
async fn mfa_users_get_a_challenge_instead_of_tokens() {
    let h = harness();
    let user = h.seed_user("dave@example.com", true).await;

    let outcome = h
        .auth
        .login(
            "dave@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await
        .unwrap();

    let LoginOutcome::MfaRequired { challenge_token } = outcome else {
        panic!("expected an MFA challenge");
    };

    // The code went out of band, never in the login response.
    drain_tasks().await;
    let sent = h.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "mfa_code");
    assert_eq!(sent[0].to, "dave@example.com");

    // No session exists until the challenge is completed.
    use auth_core::repository::RefreshTokenRepository;
    use common::ClockExt;
    let active = h
        .refresh_repo
        .count_active_for_user(user.user_id, h.clock.now_utc())
        .await
        .unwrap();
    assert_eq!(active, 0);

    let tokens = h
        .auth
        .complete_mfa(&challenge_token, &sent[0].secret, None, false)
        .await
        .unwrap();
    assert_eq!(
        h.refresh_tokens
            .validate(&tokens.refresh_token)
            .await
            .unwrap(),
        user.user_id
    );
}

#[tokio::test]
async fn wrong_mfa_code_does_not_log_in() {
    let h = harness();
    h.seed_user("erin@example.com", true).await;

    let outcome = h
        .auth
        .login(
            "erin@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await
        .unwrap();
    let LoginOutcome::MfaRequired { challenge_token } = outcome else {
        panic!("expected an MFA challenge");
    };

    let result = h.auth.complete_mfa(&challenge_token, "000000", None, false).await;
    assert!(matches!(result, Err(ServiceError::InvalidCredential)));
}

#[tokio::test]
async fn registration_completion_activates_and_logs_in() {
    let h = harness();
    let user = h.seed_pending_user("fresh@example.com").await;

    let raw = h
        .registration
        .issue(&TokenSubject::Email("fresh@example.com".to_string()))
        .await
        .unwrap();

    let tokens = h
        .auth
        .complete_registration(&raw, &Password::new("chosen passphrase"), None)
        .await
        .unwrap();

    let stored = h.users.get(user.user_id).await.unwrap();
    assert!(stored.is_active);
    assert!(stored.email_verified);

    assert_eq!(
        h.refresh_tokens
            .validate(&tokens.refresh_token)
            .await
            .unwrap(),
        user.user_id
    );

    // The account can now log in normally with the chosen password.
    let login = h
        .auth
        .login(
            "fresh@example.com",
            &Password::new("chosen passphrase"),
            None,
            false,
        )
        .await
        .unwrap();
    assert!(matches!(login, LoginOutcome::Authenticated(_)));

    // The registration token is spent.
    let replay = h
        .auth
        .complete_registration(&raw, &Password::new("again"), None)
        .await;
    assert!(matches!(replay, Err(ServiceError::AlreadyUsed)));
}

#[tokio::test]
async fn email_verification_marks_the_address() {
    let h = harness();
    let user = h.seed_pending_user("unverified@example.com").await;

    let raw = h
        .email_verification
        .issue(&TokenSubject::User(user.user_id))
        .await
        .unwrap();

    h.auth.verify_email(&raw).await.unwrap();

    let stored = h.users.get(user.user_id).await.unwrap();
    assert!(stored.email_verified);
}

#[tokio::test]
async fn refresh_rotates_and_returns_a_new_pair() {
    let h = harness();
    let user = h.seed_user("grace@example.com", false).await;

    let LoginOutcome::Authenticated(first) = h
        .auth
        .login(
            "grace@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await
        .unwrap()
    else {
        panic!("expected tokens");
    };

    let second = h.auth.refresh(&first.refresh_token, None).await.unwrap();

    // Old refresh token is spent, the new one lives.
    assert!(h.refresh_tokens.validate(&first.refresh_token).await.is_err());
    assert_eq!(
        h.refresh_tokens
            .validate(&second.refresh_token)
            .await
            .unwrap(),
        user.user_id
    );
}

#[tokio::test]
async fn logout_revokes_the_presented_session() {
    let h = harness();
    h.seed_user("henry@example.com", false).await;

    let LoginOutcome::Authenticated(tokens) = h
        .auth
        .login(
            "henry@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await
        .unwrap()
    else {
        panic!("expected tokens");
    };

    assert!(h.auth.logout(&tokens.refresh_token).await.unwrap());
    assert!(h.refresh_tokens.validate(&tokens.refresh_token).await.is_err());
    // Logging out twice is harmless.
    assert!(!h.auth.logout(&tokens.refresh_token).await.unwrap());
}

#[tokio::test]
async fn unlink_refuses_to_remove_the_last_auth_method() {
    let h = harness();

    // A user whose only way in is one external login.
    let user = h.seed_pending_user("sso-only@example.com").await;
    h.link_external_login(user.user_id, "google").await;

    let refused = h.auth.unlink_external_login(user.user_id, "google").await;
    assert!(matches!(refused, Err(ServiceError::LastAuthMethod)));

    // With a second provider linked, the first may go.
    h.link_external_login(user.user_id, "github").await;
    h.auth
        .unlink_external_login(user.user_id, "google")
        .await
        .unwrap();

    // And with a password set, the final external login may go too.
    h.credentials
        .set_password(
            user.user_id,
            &Password::new("now has a password"),
            &auth_core::services::Actor::User(user.user_id),
        )
        .await
        .unwrap();
    h.auth
        .unlink_external_login(user.user_id, "github")
        .await
        .unwrap();
}

#[tokio::test]
async fn unlink_unknown_provider_is_a_validation_error() {
    let h = harness();
    let user = h.seed_user("ivy@example.com", false).await;

    let result = h.auth.unlink_external_login(user.user_id, "google").await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn deleted_accounts_cannot_log_in() {
    let h = harness();
    let mut user = h.seed_user("judy@example.com", false).await;
    user.is_deleted = true;
    h.users.insert(user).await;

    let result = h
        .auth
        .login(
            "judy@example.com",
            &Password::new(TEST_PASSWORD),
            None,
            false,
        )
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidCredential)));
}

#[tokio::test]
async fn session_cap_applies_across_repeated_logins() {
    let h = harness();
    let user = h.seed_user("kate@example.com", false).await;

    let mut refresh_tokens = Vec::new();
    for i in 0..4i64 {
        h.clock.advance(Duration::minutes(i));
        let LoginOutcome::Authenticated(tokens) = h
            .auth
            .login(
                "kate@example.com",
                &Password::new(TEST_PASSWORD),
                None,
                false,
            )
            .await
            .unwrap()
        else {
            panic!("expected tokens");
        };
        refresh_tokens.push(tokens.refresh_token);
    }

    // The first login was evicted by the fourth; the cap is 3.
    assert!(h.refresh_tokens.validate(&refresh_tokens[0]).await.is_err());
    for token in &refresh_tokens[1..] {
        assert_eq!(
            h.refresh_tokens.validate(token).await.unwrap(),
            user.user_id
        );
    }
}
