use super::*;
use crate::retrieval::RetrievalMode;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8080,
                embedding_model: "test-embed".to_string(),
                generation_model: "test-llm".to_string(),
                batch_size: 32,
                ..OllamaConfig::default()
            },
            ..Config::default()
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn partial_config_with_defaults() {
        let partial_toml = r#"
            [ollama]
            host = "custom-host"

            [retrieval]
            top_k = 6
        "#;

        let config: Config = toml::from_str(partial_toml).expect("partial config should parse");
        assert_eq!(config.ollama.host, "custom-host");
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.retrieval.max_context_chars, 4000);
        assert_eq!(config.chunking.chunk_size, 250);
    }

    #[test]
    fn retrieval_mode_accepts_mmr_alias() {
        let toml_str = r#"
            [retrieval]
            mode = "mmr"
        "#;

        let config: Config = toml::from_str(toml_str).expect("mmr alias should parse");
        assert_eq!(config.retrieval.mode, RetrievalMode::Diversity);

        let rendered = toml::to_string(&config).expect("should serialize");
        assert!(rendered.contains("mode = \"diversity\""));
    }

    #[test]
    fn complete_valid_config() {
        let valid_toml = r#"
            [ollama]
            protocol = "http"
            host = "localhost"
            port = 11434
            embedding_model = "nomic-embed-text"
            generation_model = "qwen2.5:3b-instruct"
            batch_size = 64
            temperature = 0.2
            timeout_secs = 60
            retry_attempts = 2

            [chunking]
            chunk_size = 500
            chunk_overlap = 100

            [retrieval]
            top_k = 5
            mode = "similarity"
            max_context_chars = 3000
            max_answer_tokens = 512
            show_context = true

            [paths]
            documents_dir = "/srv/docs"
            index_dir = "cache"
        "#;

        let mut config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
        config.base_dir = "/base".into();
        assert!(config.validate().is_ok());
        assert_eq!(config.ollama.batch_size, 64);
        assert_eq!(config.ollama.retry_attempts, 2);
        assert_eq!(config.chunking.chunk_size, 500);
        assert!(config.retrieval.show_context);
        assert_eq!(config.documents_dir(), std::path::Path::new("/srv/docs"));
        assert_eq!(config.index_dir(), std::path::Path::new("/base/cache"));
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let config = Config {
                ollama: OllamaConfig {
                    protocol: protocol.to_string(),
                    host: host.to_string(),
                    port,
                    ..OllamaConfig::default()
                },
                ..Config::default()
            };

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::InvalidChunkOverlap(200, 250),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(!message.is_empty());
            assert!(message.len() > 10);
        }
    }
}
