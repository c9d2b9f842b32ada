//! End-to-end publish cycles over a scripted transport
//!
//! These tests drive `PublishService` the way `machi-post` does, including
//! first-run authorization for both schemes, and check what ends up in the
//! catalog and on the wire.

use anyhow::Result;
use libmachi::credentials::{BearerToken, ScriptedPrompt, TokenPair, TokenStore};
use libmachi::scan::scan;
use libmachi::transport::mock::MockTransport;
use libmachi::{Config, CycleOutcome, PublishService};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(temp_dir: &TempDir) -> Config {
    let root = temp_dir.path();
    let mut config = Config::default();
    config.database.path = root.join("machi.db").to_string_lossy().to_string();
    config.media.location = root.join("videos").to_string_lossy().to_string();
    config.oauth1.consumer_key = Some("consumer-key".to_string());
    config.oauth1.consumer_secret = Some("consumer-secret".to_string());
    config.oauth1.token_file = root.join("creds").join("oauth1.json").to_string_lossy().to_string();
    config.oauth2.client_id = Some("client-id".to_string());
    config.oauth2.client_secret = Some("client-secret".to_string());
    config.oauth2.token_file = root.join("creds").join("oauth2.json").to_string_lossy().to_string();
    config.upload.chunk_size = 1024;
    config
}

fn write_videos(config: &Config, names: &[&str]) {
    let root = config.media_root();
    std::fs::create_dir_all(&root).unwrap();
    for name in names {
        std::fs::write(root.join(name), vec![0u8; 1500]).unwrap();
    }
}

fn store_tokens(config: &Config) {
    TokenStore::new(&config.oauth1.token_file)
        .save(&TokenPair {
            token: "pair-token".to_string(),
            token_secret: "pair-secret".to_string(),
        })
        .unwrap();
    TokenStore::new(&config.oauth2.token_file)
        .save(&BearerToken {
            access_token: "bearer".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: chrono::Utc::now().timestamp() + 7200,
            scope: vec!["tweet.write".to_string()],
            token_type: "bearer".to_string(),
        })
        .unwrap();
}

/// INIT, two APPENDs (1500 bytes in 1024-byte chunks) and FINALIZE
fn queue_upload(transport: &MockTransport, media_id: &str) {
    transport.push_json(202, json!({"media_id_string": media_id}));
    transport.push(204, "");
    transport.push(204, "");
    transport.push_json(201, json!({"media_id_string": media_id}));
}

fn queue_post(transport: &MockTransport, n: usize) {
    transport.push_json(
        201,
        json!({"data": {"id": format!("17{}", n), "text": format!("video https://t.co/link{}", n)}}),
    );
}

#[tokio::test]
async fn test_first_run_authorizes_both_schemes_then_publishes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = test_config(&temp_dir);
    write_videos(&config, &["Sunset.mp4"]);

    let transport = MockTransport::new();
    // OAuth1 PIN flow, run when the uploader first acquires its credential
    transport.push(200, "oauth_token=temp&oauth_token_secret=temp-secret&oauth_callback_confirmed=true");
    transport.push(200, "oauth_token=pair-token&oauth_token_secret=pair-secret&user_id=1&screen_name=machi");
    // Upload with one processing poll
    transport.push_json(202, json!({"media_id_string": "900"}));
    transport.push(204, "");
    transport.push(204, "");
    transport.push_json(201, json!({"media_id_string": "900", "processing_info": {"state": "pending", "check_after_secs": 1}}));
    transport.push_json(200, json!({"media_id_string": "900", "processing_info": {"state": "succeeded"}}));
    // OAuth2 code exchange, then the post itself
    transport.push_json(
        200,
        json!({"token_type": "bearer", "expires_in": 7200, "access_token": "fresh-bearer", "scope": "tweet.read tweet.write", "refresh_token": "fresh-refresh"}),
    );
    queue_post(&transport, 1);

    let prompt = Arc::new(ScriptedPrompt::new().answer("1234567").answer_with(|url| {
        let url = url::Url::parse(url).unwrap();
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        format!("https://localhost/?state={}&code=auth-code", state)
    }));

    let service = PublishService::with_transport(
        Arc::new(config.clone()),
        Arc::new(transport.clone()),
        prompt.clone(),
    )
    .await?;
    scan(service.ledger(), &config.media_root(), &[]).await?;

    let outcome = service.run(None, None).await?;

    match outcome {
        CycleOutcome::Published { media, link, .. } => {
            assert_eq!(media.title, "Sunset");
            assert_eq!(link, "https://t.co/link1");
        }
        other => panic!("Expected Published, got {:?}", other),
    }
    assert_eq!(prompt.times_asked(), 2);
    assert_eq!(transport.remaining(), 0);

    // Both credentials were persisted
    let pair: TokenPair = TokenStore::new(&config.oauth1.token_file).load()?.unwrap();
    assert_eq!(pair.token, "pair-token");
    let bearer: BearerToken = TokenStore::new(&config.oauth2.token_file).load()?.unwrap();
    assert_eq!(bearer.access_token, "fresh-bearer");

    // Upload calls were signed with the permanent pair, the post with the bearer
    let requests = transport.requests();
    let init = &requests[2];
    assert_eq!(init.field("command"), Some("INIT"));
    assert!(init
        .header_value("Authorization")
        .unwrap()
        .contains("oauth_token=\"pair-token\""));
    let post = requests.last().unwrap();
    assert_eq!(post.header_value("Authorization"), Some("Bearer fresh-bearer"));

    Ok(())
}

#[tokio::test]
async fn test_round_robin_across_cycles() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = test_config(&temp_dir);
    let names = ["a.mp4", "b.mp4", "c.mp4"];
    write_videos(&config, &names);
    store_tokens(&config);

    let transport = MockTransport::new();
    let service = PublishService::with_transport(
        Arc::new(config.clone()),
        Arc::new(transport.clone()),
        Arc::new(ScriptedPrompt::new()),
    )
    .await?;
    let report = scan(service.ledger(), &config.media_root(), &[]).await?;
    assert_eq!(report.added, 3);

    let mut seen = Vec::new();
    for n in 0..6 {
        queue_upload(&transport, &format!("{}", 100 + n));
        queue_post(&transport, n);

        match service.run(None, None).await? {
            CycleOutcome::Published { media, .. } => seen.push(media.title),
            other => panic!("Expected Published, got {:?}", other),
        }
    }

    let first: HashSet<_> = seen[..3].iter().cloned().collect();
    assert_eq!(first.len(), 3, "each asset once before any repeats: {:?}", seen);
    assert_eq!(seen[..3], seen[3..], "second round repeats the first round's order");

    let history = service.ledger().history(10).await?;
    assert_eq!(history.len(), 6);
    assert_eq!(history[0].link, "https://t.co/link5");

    Ok(())
}

#[tokio::test]
async fn test_deleted_file_is_skipped() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = test_config(&temp_dir);
    write_videos(&config, &["gone.mp4", "kept.mp4"]);
    store_tokens(&config);

    let transport = MockTransport::new();
    let service = PublishService::with_transport(
        Arc::new(config.clone()),
        Arc::new(transport.clone()),
        Arc::new(ScriptedPrompt::new()),
    )
    .await?;
    scan(service.ledger(), &config.media_root(), &[]).await?;
    std::fs::remove_file(config.media_root().join("gone.mp4"))?;

    queue_upload(&transport, "1");
    queue_post(&transport, 1);

    match service.run(None, None).await? {
        CycleOutcome::Published { media, .. } => assert_eq!(media.title, "kept"),
        other => panic!("Expected Published, got {:?}", other),
    }
    assert_eq!(service.ledger().count_media().await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_expired_bearer_refreshed_once_per_cycle() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = test_config(&temp_dir);
    write_videos(&config, &["a.mp4"]);
    store_tokens(&config);

    // Expire the bearer token
    let store = TokenStore::new(&config.oauth2.token_file);
    let mut token: BearerToken = store.load()?.unwrap();
    token.expires_at = chrono::Utc::now().timestamp() + 60;
    store.save(&token)?;

    let transport = MockTransport::new();
    let service = PublishService::with_transport(
        Arc::new(config.clone()),
        Arc::new(transport.clone()),
        Arc::new(ScriptedPrompt::new()),
    )
    .await?;
    scan(service.ledger(), &config.media_root(), &[]).await?;

    queue_upload(&transport, "1");
    transport.push_json(200, json!({"access_token": "renewed", "expires_in": 7200}));
    queue_post(&transport, 1);

    service.run(None, None).await?;

    let refreshes: Vec<_> = transport
        .requests()
        .into_iter()
        .filter(|r| r.field("grant_type") == Some("refresh_token"))
        .collect();
    assert_eq!(refreshes.len(), 1);

    let saved: BearerToken = store.load()?.unwrap();
    assert_eq!(saved.access_token, "renewed");
    assert_eq!(saved.refresh_token.as_deref(), Some("refresh"));

    Ok(())
}
