use super::load_existing_config as load_existing_config_impl;
use crate::config::settings::HOME_ENV_VAR;
use serial_test::serial;
use tempfile::TempDir;

#[test]
#[serial]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: guarded by `serial`, no other test touches the environment concurrently
    unsafe { std::env::set_var(HOME_ENV_VAR, temp_dir.path()) };

    let config = load_existing_config_impl().expect("config loaded successfully");

    // SAFETY: see above
    unsafe { std::env::remove_var(HOME_ENV_VAR) };

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.ollama.embedding_model.is_empty());
    assert!(config.ollama.batch_size > 0);
}
