//! Integration tests for token sealing through the integration repository.

use std::sync::Arc;

use linktrail::crypto::{CryptoError, CryptoKey, decrypt_token, encrypt_token};
use linktrail::providers::Provider;
use linktrail::repositories::{IntegrationRepository, NewIntegration};
use uuid::Uuid;

mod test_utils;

fn test_crypto_key(byte: u8) -> CryptoKey {
    CryptoKey::new(vec![byte; 32]).expect("valid test key")
}

fn new_integration(user_id: Uuid) -> NewIntegration {
    NewIntegration {
        user_id,
        provider: Provider::Calendly,
        access_token: "plaintext-access-token".to_string(),
        refresh_token: Some("plaintext-refresh-token".to_string()),
        token_expires_at: None,
        provider_identity: None,
        external_user_id: Some("https://api.calendly.com/users/U1".to_string()),
        external_org_id: Some("https://api.calendly.com/organizations/O1".to_string()),
        webhook_id: None,
    }
}

#[tokio::test]
async fn test_tokens_are_stored_as_ciphertext() {
    let db = Arc::new(test_utils::setup_test_db().await.unwrap());
    let repo = IntegrationRepository::new(db, test_crypto_key(1));
    let user_id = Uuid::new_v4();

    let model = repo.upsert_connected(new_integration(user_id)).await.unwrap();

    let access = model.access_token_ciphertext.clone().expect("access sealed");
    assert!(
        !access
            .windows(b"plaintext".len())
            .any(|w| w == b"plaintext")
    );

    let tokens = repo.decrypt_tokens(&model).unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("plaintext-access-token"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("plaintext-refresh-token"));
    assert!(!format!("{tokens:?}").contains("plaintext"));
}

#[tokio::test]
async fn test_rows_cannot_be_opened_with_another_key() {
    let db = Arc::new(test_utils::setup_test_db().await.unwrap());
    let writer = IntegrationRepository::new(db.clone(), test_crypto_key(1));
    let reader = IntegrationRepository::new(db, test_crypto_key(2));
    let user_id = Uuid::new_v4();

    let model = writer.upsert_connected(new_integration(user_id)).await.unwrap();
    assert!(reader.decrypt_tokens(&model).is_err());
}

#[tokio::test]
async fn test_reconnect_without_refresh_token_keeps_stored_one() {
    let db = Arc::new(test_utils::setup_test_db().await.unwrap());
    let repo = IntegrationRepository::new(db, test_crypto_key(1));
    let user_id = Uuid::new_v4();

    repo.upsert_connected(new_integration(user_id)).await.unwrap();
    let model = repo
        .upsert_connected(NewIntegration {
            access_token: "second-access".to_string(),
            refresh_token: None,
            ..new_integration(user_id)
        })
        .await
        .unwrap();

    let tokens = repo.decrypt_tokens(&model).unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("second-access"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("plaintext-refresh-token"));
    assert_eq!(repo.list_for_user(user_id).await.unwrap().len(), 1);
}

#[test]
fn test_ciphertext_is_bound_to_user_and_provider() {
    let key = test_crypto_key(3);
    let user_id = Uuid::new_v4();
    let sealed = encrypt_token(&key, user_id, Provider::Youtube, "token").unwrap();

    assert_eq!(
        decrypt_token(&key, user_id, Provider::Youtube, &sealed).unwrap(),
        "token"
    );
    assert!(matches!(
        decrypt_token(&key, Uuid::new_v4(), Provider::Youtube, &sealed),
        Err(CryptoError::DecryptionFailed(_))
    ));
    assert!(decrypt_token(&key, user_id, Provider::Calendly, &sealed).is_err());
}

#[test]
fn test_nonces_are_unique() {
    let key = test_crypto_key(4);
    let user_id = Uuid::new_v4();
    let first = encrypt_token(&key, user_id, Provider::Calendly, "same").unwrap();
    let second = encrypt_token(&key, user_id, Provider::Calendly, "same").unwrap();
    assert_ne!(first, second);
}
