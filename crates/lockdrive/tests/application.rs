//! Login flows and token lifecycle

mod common;

use std::sync::{Arc, Mutex};

use lockdrive::error::DriveError;
use lockdrive::prelude::*;
use lockdrive::testkit::{TestServer, TestServerOptions};

#[tokio::test]
async fn test_login_missing_credentials() {
    let server = TestServer::new();
    let application = server.application();

    let result = application
        .login_with_credentials(&Credentials::default())
        .await;
    assert!(matches!(result, Err(DriveError::UsernamePasswordMissing)));
}

#[tokio::test]
async fn test_login_wrong_password() {
    let server = TestServer::new();
    let application = server.application();

    let mut credentials = server.credentials();
    credentials.password = "wrong".to_string();

    let result = application.login_with_credentials(&credentials).await;
    assert!(matches!(result, Err(DriveError::Transport(_))));
}

#[tokio::test]
async fn test_login_requires_two_factor_token() {
    let server = TestServer::with_options(TestServerOptions {
        two_fa: Some("424242".to_string()),
        ..TestServerOptions::default()
    });
    let application = server.application();

    let mut credentials = server.credentials();
    credentials.two_fa = String::new();

    let result = application.login_with_credentials(&credentials).await;
    assert!(matches!(result, Err(DriveError::TwoFactorTokenMissing)));

    // With the code, the whole session comes up
    let credentials = server.credentials();
    application.login_with_credentials(&credentials).await.unwrap();
    let session = Session::open(&application, DriveConfig::default())
        .await
        .unwrap();
    assert!(session.links().root().is_some());
    session.close();
}

#[tokio::test]
async fn test_login_requires_mailbox_password() {
    let server = TestServer::with_options(TestServerOptions {
        mailbox_password: Some("mailbox only".to_string()),
        ..TestServerOptions::default()
    });
    let application = server.application();

    let mut credentials = server.credentials();
    credentials.mailbox_password = String::new();

    let result = application.login_with_credentials(&credentials).await;
    assert!(matches!(result, Err(DriveError::MailboxPasswordMissing)));

    // The mailbox password is what unlocks the keyrings
    let credentials = server.credentials();
    application.login_with_credentials(&credentials).await.unwrap();
    let session = Session::open(&application, DriveConfig::default())
        .await
        .unwrap();
    assert!(session.links().root().is_some());
    session.close();
}

#[tokio::test]
async fn test_login_with_persisted_tokens() {
    let server = TestServer::new();

    let tokens = {
        let application = server.application();
        application
            .login_with_credentials(&server.credentials())
            .await
            .unwrap();
        application.tokens().unwrap()
    };

    // A fresh application restores from the four tokens alone
    let application = server.application();
    application.login_with_tokens(tokens);

    let session = Session::open(&application, DriveConfig::default())
        .await
        .unwrap();
    assert!(session.links().root().is_some());
    session.close();
}

#[tokio::test]
async fn test_token_refresh_fires_update_handler() {
    let server = TestServer::new();
    let application = server.application();
    application
        .login_with_credentials(&server.credentials())
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<Tokens>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    application.on_tokens_updated(Box::new(move |tokens| {
        sink.lock().unwrap().push(tokens.clone());
    }));

    let before = application.tokens().unwrap();
    let auth = server.rotate_tokens();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].access_token, auth.access_token);
    // The salted key pass survives transport token rotation
    assert_eq!(seen[0].salted_key_pass, before.salted_key_pass);
    assert_eq!(
        application.tokens().unwrap().access_token,
        auth.access_token
    );
}

#[tokio::test]
async fn test_deauth_fires_expired_handler() {
    let server = TestServer::new();
    let application = server.application();
    application
        .login_with_credentials(&server.credentials())
        .await
        .unwrap();

    let fired = Arc::new(Mutex::new(false));
    let sink = fired.clone();
    application.on_tokens_expired(Box::new(move || {
        *sink.lock().unwrap() = true;
    }));

    server.expire_session();
    assert!(*fired.lock().unwrap());
}

#[tokio::test]
async fn test_session_requires_login() {
    let server = TestServer::new();
    let application = server.application();

    let result = Session::open(&application, DriveConfig::default()).await;
    assert!(matches!(result, Err(DriveError::Transport(_))));
}

#[tokio::test]
async fn test_identity_indexes() {
    let (_server, session) = common::setup_session().await;

    let user = session.user();
    for address in user.addresses() {
        let by_email = user.address_from_email(address.email()).unwrap();
        let by_id = user.address_from_id(by_email.id()).unwrap();
        assert_eq!(by_id.email(), address.email());
    }

    assert!(user.address_from_email("nobody@lockdrive.test").is_none());

    session.close();
}
