use god_chatbot::config::AppConfig;
use god_chatbot::render::{Granularity, PresentationMode, ResponseRenderer};
use god_chatbot::session::HistoryRetention;
use god_chatbot::vertex::{DEFAULT_MODEL, GenerationConfig};
use serial_test::serial;
use std::env;
use std::fs;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("CHATBOT_SERVER__PORT");
        env::remove_var("CHATBOT_MODEL__MODEL");
        env::remove_var("CHATBOT_HISTORY__MAX_TURNS");
        env::remove_var("CHATBOT_PRESENTATION__MODE");
        env::remove_var("CONFIG_FILE");
        env::remove_var("BIND_HOST");
        env::remove_var("PORT");
        env::remove_var("PRESENTATION_MODE");
        env::remove_var("TYPING_DELAY_MS");
        env::remove_var("HISTORY_MAX_TURNS");
    }
}

fn load(args: &[&str]) -> AppConfig {
    let argv = std::iter::once("god-chatbot").chain(args.iter().copied());
    AppConfig::load_from_args(argv).expect("Failed to load config")
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]);
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.request_timeout_secs, 120);
    assert_eq!(config.model.model, DEFAULT_MODEL);
    assert_eq!(config.model.location, "us-central1");
    assert!(config.model.access_token.is_none());
    assert_eq!(config.credentials.env_var, "GOOGLE_APPLICATION_CREDENTIALS_BASE64");
    assert_eq!(config.credentials.binding_var, "GOOGLE_APPLICATION_CREDENTIALS");
    assert_eq!(config.presentation.mode, PresentationMode::Incremental);
    assert_eq!(config.presentation.granularity, Granularity::Fragment);
    assert_eq!(config.presentation.delay_ms, 100);
    assert_eq!(config.history.max_turns, None);

    assert_eq!(
        ResponseRenderer::from(&config.presentation),
        ResponseRenderer::default()
    );
    assert_eq!(
        HistoryRetention::from(&config.history),
        HistoryRetention::unbounded()
    );
}

#[test]
#[serial]
fn test_generation_parameters_are_fixed() {
    let generation = GenerationConfig::default();
    assert_eq!(generation.max_output_tokens, 8192);
    assert!((generation.temperature - 1.0).abs() < f32::EPSILON);
    assert!((generation.top_p - 0.95).abs() < f32::EPSILON);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CHATBOT_SERVER__PORT", "9090");
        env::set_var("CHATBOT_MODEL__MODEL", "gemini-test");
        env::set_var("CHATBOT_HISTORY__MAX_TURNS", "20");
    }

    let config = load(&[]);
    clear_env_vars();

    assert_eq!(config.server.port, 9090);
    assert_eq!(config.model.model, "gemini-test");
    assert_eq!(config.history.max_turns, Some(20));
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CHATBOT_SERVER__PORT", "9090");
        env::set_var("CHATBOT_PRESENTATION__MODE", "incremental");
    }

    let config = load(&["--port", "7171", "--presentation-mode", "Atomic"]);
    clear_env_vars();

    assert_eq!(config.server.port, 7171);
    assert_eq!(config.presentation.mode, PresentationMode::Atomic);
    assert_eq!(
        ResponseRenderer::from(&config.presentation),
        ResponseRenderer::atomic()
    );
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let config_content = r#"
server:
  port: 7070
presentation:
  granularity: character
  delay_ms: 25
history:
  max_turns: 10
    "#;

    let file_path = "test_chatbot_config.yaml";
    fs::write(file_path, config_content).expect("Failed to write temp config");

    let result = AppConfig::load_from_args(["god-chatbot", "--config", file_path]);
    fs::remove_file(file_path).expect("Failed to remove temp config");

    let config = result.expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.presentation.granularity, Granularity::Character);
    assert_eq!(config.presentation.delay_ms, 25);
    assert_eq!(
        HistoryRetention::from(&config.history),
        HistoryRetention::capped(10)
    );
    // Untouched keys keep their defaults.
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
#[serial]
fn test_missing_explicit_config_file_fails() {
    clear_env_vars();

    let result = AppConfig::load_from_args(["god-chatbot", "--config", "does-not-exist.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let config_content = r#"
server:
  port: 6060
    "#;
    let cwd_path = "config.yaml";
    fs::write(cwd_path, config_content).expect("Failed to write ./config.yaml");

    let result = AppConfig::load_from_args(["god-chatbot"]);
    fs::remove_file(cwd_path).expect("Failed to remove ./config.yaml");

    assert_eq!(result.expect("Failed to load config").server.port, 6060);
}
