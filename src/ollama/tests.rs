use super::*;

fn test_config() -> OllamaConfig {
    OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        embedding_model: "embed-model".to_string(),
        generation_model: "chat-model".to_string(),
        batch_size: 8,
        temperature: 0.5,
        timeout_secs: 10,
        retry_attempts: 1,
    }
}

#[test]
fn client_configuration() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");

    assert_eq!(client.embedding_model, "embed-model");
    assert_eq!(client.generation_model, "chat-model");
    assert_eq!(client.batch_size, 8);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, 1);
    assert_eq!(Embedder::model_id(&client), "embed-model");
    assert_eq!(LanguageModel::model_id(&client), "chat-model");
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&test_config())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);
    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn generate_request_carries_options() {
    let request = GenerateRequest {
        model: "chat-model",
        prompt: "Question: why?\nAnswer:",
        stream: true,
        options: GenerateOptions {
            temperature: 0.25,
            num_predict: 128,
        },
    };

    let json = serde_json::to_value(&request).expect("can serialize request");
    assert_eq!(json["model"], "chat-model");
    assert_eq!(json["stream"], true);
    assert_eq!(json["options"]["num_predict"], 128);
    assert_eq!(json["options"]["temperature"], 0.25);
}

#[test]
fn embed_request_uses_input_field() {
    let texts = vec!["a".to_string(), "b".to_string()];
    let request = EmbedRequest {
        model: "embed-model",
        input: &texts,
    };

    let json = serde_json::to_value(&request).expect("can serialize request");
    assert_eq!(json["input"], serde_json::json!(["a", "b"]));
}

#[test]
fn stream_line_parsing() {
    let partial: GenerateResponse =
        serde_json::from_str(r#"{"model":"m","response":"Hel","done":false}"#)
            .expect("can parse line");
    assert_eq!(partial.response, "Hel");
    assert!(!partial.done);

    let last: GenerateResponse =
        serde_json::from_str(r#"{"model":"m","done":true,"total_duration":12}"#)
            .expect("can parse final line");
    assert!(last.response.is_empty());
    assert!(last.done);

    let failed: GenerateResponse =
        serde_json::from_str(r#"{"error":"model not found"}"#).expect("can parse error line");
    assert_eq!(failed.error.as_deref(), Some("model not found"));
}

#[test]
fn latest_tag_matches_untagged_model() {
    assert!(model_matches("nomic-embed-text:latest", "nomic-embed-text"));
    assert!(model_matches("qwen2.5:3b-instruct", "qwen2.5:3b-instruct"));
    assert!(!model_matches("qwen2.5:7b", "qwen2.5:3b-instruct"));
    assert!(!model_matches("llama3:latest", "nomic-embed-text"));
}

#[test]
fn unreachable_server_maps_to_typed_errors() {
    let config = OllamaConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        ..test_config()
    };
    let client = OllamaClient::new(&config)
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(2));

    let embed = client.embed(&["hello".to_string()]);
    assert!(matches!(embed, Err(RagError::EmbeddingUnavailable(_))));

    let answer = client.generate("prompt", 16);
    assert!(matches!(answer, Err(RagError::ModelUnavailable(_))));
}

#[test]
fn empty_batch_makes_no_request() {
    let config = OllamaConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        ..test_config()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    let embeddings = client.embed(&[]).expect("empty input needs no server");
    assert!(embeddings.is_empty());
}
