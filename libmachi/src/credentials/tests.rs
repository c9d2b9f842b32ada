use super::*;
use crate::config::Config;
use crate::error::MachiError;
use crate::transport::mock::MockTransport;
use serde::Deserialize;
use tempfile::TempDir;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    count: u32,
}

fn record() -> Record {
    Record {
        name: "machi".to_string(),
        count: 3,
    }
}

fn config_with_secrets(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.oauth1.consumer_key = Some("ck".to_string());
    config.oauth1.consumer_secret = Some("cs".to_string());
    config.oauth1.token_file = temp_dir.path().join("oauth1.json").to_string_lossy().to_string();
    config.oauth2.client_id = Some("id".to_string());
    config.oauth2.client_secret = Some("secret".to_string());
    config.oauth2.token_file = temp_dir.path().join("oauth2.json").to_string_lossy().to_string();
    config
}

mod token_store_tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::new(&temp_dir.path().join("absent.json").to_string_lossy());

        let loaded: Option<Record> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("token.json");
        let store = TokenStore::new(&path.to_string_lossy());

        store.save(&record()).unwrap();

        assert!(path.exists());
        let loaded: Record = store.load().unwrap().unwrap();
        assert_eq!(loaded, record());
    }

    #[test]
    fn test_saved_file_is_pretty_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");
        let store = TokenStore::new(&path.to_string_lossy());

        store.save(&record()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains('\n'));
        assert!(content.contains("\"name\": \"machi\""));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");
        let store = TokenStore::new(&path.to_string_lossy());

        store.save(&record()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = TokenStore::new(&path.to_string_lossy());

        let result: Result<Option<Record>> = store.load();
        match result {
            Err(MachiError::Credential(CredentialError::MalformedStore { path: p, .. })) => {
                assert_eq!(p, path);
            }
            other => panic!("Expected MalformedStore, got {:?}", other),
        }
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::new(&temp_dir.path().join("token.json").to_string_lossy());

        store.save(&record()).unwrap();
        store
            .save(&Record {
                name: "other".to_string(),
                count: 9,
            })
            .unwrap();

        let loaded: Record = store.load().unwrap().unwrap();
        assert_eq!(loaded.count, 9);
    }
}

mod factory_tests {
    use super::*;

    #[test]
    fn test_credential_for_each_scheme() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_with_secrets(&temp_dir);
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        let prompt: Arc<dyn Prompt> = Arc::new(ScriptedPrompt::new());

        let oauth1 = credential_for(AuthScheme::OAuth1, &config, transport.clone(), prompt.clone()).unwrap();
        let oauth2 = credential_for(AuthScheme::OAuth2, &config, transport, prompt).unwrap();

        assert_eq!(oauth1.scheme(), AuthScheme::OAuth1);
        assert_eq!(oauth2.scheme(), AuthScheme::OAuth2);
    }

    #[test]
    fn test_missing_secret_names_the_field() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_with_secrets(&temp_dir);
        config.oauth2.client_id = Some("   ".to_string());

        let result = credential_for(
            AuthScheme::OAuth2,
            &config,
            Arc::new(MockTransport::new()),
            Arc::new(ScriptedPrompt::new()),
        );

        match result {
            Err(MachiError::Credential(CredentialError::MissingSecret(field))) => {
                assert_eq!(field, "oauth2.client_id");
            }
            Err(other) => panic!("Expected MissingSecret, got {:?}", other),
            Ok(_) => panic!("Expected MissingSecret"),
        }
    }

    #[test]
    fn test_missing_secret_exit_code() {
        let err: MachiError = CredentialError::MissingSecret("oauth1.consumer_key".to_string()).into();
        assert_eq!(err.exit_code(), 2);
    }
}

mod authorization_tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let auth = Authorization::Bearer(SecretString::from("abc".to_string()));
        let mut request = HttpRequest::post("https://api.test/2/tweets");

        auth.authorize(&mut request);

        assert_eq!(request.header_value("Authorization"), Some("Bearer abc"));
        assert_eq!(auth.scheme(), AuthScheme::OAuth2);
    }

    #[test]
    fn test_token_pair_header_is_oauth1() {
        let pair = TokenPair {
            token: "t".to_string(),
            token_secret: "ts".to_string(),
        };
        let auth = Authorization::TokenPair(oauth1::SigningKeys::new("ck", "cs", Some(&pair)));
        let mut request = HttpRequest::post("https://upload.test/1.1/media/upload.json");

        auth.authorize(&mut request);

        let header = request.header_value("Authorization").unwrap();
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_token=\"t\""));
        assert!(header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert_eq!(auth.scheme(), AuthScheme::OAuth1);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = Authorization::Bearer(SecretString::from("very-secret".to_string()));
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("REDACTED"));
    }
}

mod prompt_tests {
    use super::*;

    #[test]
    fn test_scripted_answers_in_order() {
        let prompt = ScriptedPrompt::new()
            .answer("first")
            .answer_with(|url| format!("{}#seen", url));

        assert_eq!(prompt.ask("go", "https://a.test").unwrap(), "first");
        assert_eq!(prompt.ask("go", "https://b.test").unwrap(), "https://b.test#seen");
        assert!(prompt.ask("go", "https://c.test").is_err());
        assert_eq!(prompt.times_asked(), 3);
        assert_eq!(prompt.shown()[1], "https://b.test");
    }
}
