//! Identity service flows over a real HTTP listener: registration, credential
//! login, token-mode verification and password updates.

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::tempdir;

use slink::identity::Principal;
use slink::identity_server::{router, AppState};
use slink::security::SharedCredentials;
use slink::token::{decode_claims, TokenCodec};

async fn spawn_identity(db_root: &std::path::Path, secret: &str) -> Result<(String, SharedCredentials)> {
    let creds = SharedCredentials::new(db_root)?;
    creds.ensure_default_admin()?;
    let codec = TokenCodec::new(secret)?;
    let app = router(AppState { creds: creds.clone(), codec });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((base, creds))
}

async fn register(client: &reqwest::Client, base: &str, username: &str, password: &str) -> Result<u16> {
    let resp = client
        .post(format!("{base}/users"))
        .json(&json!({"username": username, "password": password}))
        .send()
        .await?;
    Ok(resp.status().as_u16())
}

async fn login(client: &reqwest::Client, base: &str, body: Value) -> Result<(u16, Value)> {
    let resp = client.post(format!("{base}/users/login")).json(&body).send().await?;
    let status = resp.status().as_u16();
    let body: Value = resp.json().await.unwrap_or_else(|_| json!({}));
    Ok((status, body))
}

async fn login_token(client: &reqwest::Client, base: &str, username: &str, password: &str) -> Result<String> {
    let (status, body) = login(client, base, json!({"username": username, "password": password})).await?;
    assert_eq!(status, 201, "login should issue a token: {body}");
    Ok(body.get("token").and_then(|t| t.as_str()).expect("token in body").to_string())
}

#[tokio::test]
async fn register_login_and_verify_flow() -> Result<()> {
    let tmp = tempdir()?;
    let (base, _creds) = spawn_identity(tmp.path(), "test-key-1").await?;
    let client = reqwest::Client::new();

    assert_eq!(register(&client, &base, "alice", "wonderland").await?, 201);
    assert_eq!(register(&client, &base, "alice", "other").await?, 409);

    let token = login_token(&client, &base, "alice", "wonderland").await?;

    // token mode: the service verifies the signature it issued
    let (status, _) = login(&client, &base, json!({"token": token})).await?;
    assert_eq!(status, 200);

    // a tampered token is rejected
    let mut tampered: Vec<char> = token.chars().collect();
    let last = tampered.len() - 1;
    tampered[last] = if tampered[last] == 'A' { 'B' } else { 'A' };
    let tampered: String = tampered.into_iter().collect();
    let (status, _) = login(&client, &base, json!({"token": tampered})).await?;
    assert_eq!(status, 403);
    Ok(())
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_missing_fields() -> Result<()> {
    let tmp = tempdir()?;
    let (base, _creds) = spawn_identity(tmp.path(), "test-key-1").await?;
    let client = reqwest::Client::new();

    assert_eq!(register(&client, &base, "alice", "wonderland").await?, 201);

    // wrong password and unknown user look identical from outside
    let (status, _) = login(&client, &base, json!({"username": "alice", "password": "nope"})).await?;
    assert_eq!(status, 403);
    let (status, _) = login(&client, &base, json!({"username": "nobody", "password": "nope"})).await?;
    assert_eq!(status, 403);

    let (status, _) = login(&client, &base, json!({"username": "alice"})).await?;
    assert_eq!(status, 400);
    let (status, _) = login(&client, &base, json!({})).await?;
    assert_eq!(status, 400);
    Ok(())
}

#[tokio::test]
async fn issued_claims_carry_the_stored_admin_flag() -> Result<()> {
    let tmp = tempdir()?;
    let (base, _creds) = spawn_identity(tmp.path(), "test-key-1").await?;
    let client = reqwest::Client::new();

    assert_eq!(register(&client, &base, "alice", "wonderland").await?, 201);
    let alice_token = login_token(&client, &base, "alice", "wonderland").await?;
    let alice: Principal = decode_claims(&alice_token)?;
    assert_eq!(alice.name, "alice");
    assert!(!alice.is_admin);

    // the seeded default admin signs with admin=true
    let admin_token = login_token(&client, &base, "admin", "admin").await?;
    let admin: Principal = decode_claims(&admin_token)?;
    assert_eq!(admin.name, "admin");
    assert!(admin.is_admin);
    assert_eq!(admin.subject, "auth");
    Ok(())
}

#[tokio::test]
async fn verification_is_stateless_over_the_persisted_token() -> Result<()> {
    let tmp = tempdir()?;
    let (base, creds) = spawn_identity(tmp.path(), "test-key-1").await?;
    let client = reqwest::Client::new();

    assert_eq!(register(&client, &base, "alice", "wonderland").await?, 201);
    let token = login_token(&client, &base, "alice", "wonderland").await?;
    assert_eq!(creds.current_token("alice")?.as_deref(), Some(token.as_str()));

    // Simulate a newer issue overwriting the stored token: the old one still
    // verifies because only the signature is checked.
    assert!(creds.set_token("alice", "replaced.by.newer")?);
    let (status, _) = login(&client, &base, json!({"token": token})).await?;
    assert_eq!(status, 200);
    Ok(())
}

#[tokio::test]
async fn user_listing_excludes_secret_material() -> Result<()> {
    let tmp = tempdir()?;
    let (base, _creds) = spawn_identity(tmp.path(), "test-key-1").await?;
    let client = reqwest::Client::new();

    assert_eq!(register(&client, &base, "alice", "wonderland").await?, 201);
    let token = login_token(&client, &base, "alice", "wonderland").await?;

    let resp = client.get(format!("{base}/users")).send().await?;
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.text().await?;
    assert!(body.contains("alice"));
    assert!(body.contains("admin"));
    assert!(!body.contains("$argon2"), "password hashes must not be listed");
    assert!(!body.contains(&token), "issued tokens must not be listed");
    assert!(!body.contains("wonderland"), "raw passwords must not be listed");
    Ok(())
}

#[tokio::test]
async fn password_update_flow() -> Result<()> {
    let tmp = tempdir()?;
    let (base, _creds) = spawn_identity(tmp.path(), "test-key-1").await?;
    let client = reqwest::Client::new();

    assert_eq!(register(&client, &base, "alice", "wonderland").await?, 201);

    let put = |body: Value| {
        let client = client.clone();
        let url = format!("{base}/users");
        async move { client.put(url).json(&body).send().await }
    };

    let resp = put(json!({"username": "alice", "old-password": "wonderland"})).await?;
    assert_eq!(resp.status().as_u16(), 400);

    let resp = put(json!({"username": "nobody", "old-password": "a", "new-password": "b"})).await?;
    assert_eq!(resp.status().as_u16(), 404);

    let resp = put(json!({"username": "alice", "old-password": "wonderland", "new-password": "wonderland"})).await?;
    assert_eq!(resp.status().as_u16(), 422);

    let resp = put(json!({"username": "alice", "old-password": "wrong", "new-password": "looking-glass"})).await?;
    assert_eq!(resp.status().as_u16(), 403);

    let resp = put(json!({"username": "alice", "old-password": "wonderland", "new-password": "looking-glass"})).await?;
    assert_eq!(resp.status().as_u16(), 200);

    // old password no longer logs in, the new one does
    let (status, _) = login(&client, &base, json!({"username": "alice", "password": "wonderland"})).await?;
    assert_eq!(status, 403);
    let (status, body) = login(&client, &base, json!({"username": "alice", "password": "looking-glass"})).await?;
    assert_eq!(status, 201, "login with new password: {body}");
    Ok(())
}
