use super::*;
use tempfile::TempDir;

#[test]
fn overrides_fall_back_to_defaults() {
    let defaults = RetrievalSettings::default();

    let settings = SettingsOverrides::default().apply(&defaults);
    assert_eq!(settings, defaults);

    let settings = SettingsOverrides {
        top_k: Some(8),
        mode: Some(RetrievalMode::Diversity),
        max_context_chars: None,
        max_tokens: Some(512),
        show_context: true,
    }
    .apply(&defaults);
    assert_eq!(settings.top_k, 8);
    assert_eq!(settings.mode, RetrievalMode::Diversity);
    assert_eq!(settings.max_context_chars, defaults.max_context_chars);
    assert_eq!(settings.max_answer_tokens, 512);
    assert!(settings.show_context);
}

#[test]
fn repl_commands() {
    assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
    assert_eq!(ReplCommand::parse("/quit"), ReplCommand::Quit);
    assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Quit);
    assert_eq!(ReplCommand::parse("/clear"), ReplCommand::Clear);
    assert_eq!(ReplCommand::parse("/history"), ReplCommand::History);
    assert_eq!(ReplCommand::parse("/doc"), ReplCommand::NoDocument);
    assert_eq!(
        ReplCommand::parse("/doc  my notes.txt "),
        ReplCommand::Document("my notes.txt")
    );
    assert_eq!(
        ReplCommand::parse("What is covered?"),
        ReplCommand::Question("What is covered?")
    );
    assert_eq!(
        ReplCommand::parse("/unknown thing"),
        ReplCommand::Question("/unknown thing")
    );
}

#[test]
fn documents_resolve_against_documents_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("guide.txt"), "text").expect("should write file");

    let resolved = resolve_document(temp_dir.path(), Path::new("guide.txt"));
    assert_eq!(resolved, temp_dir.path().join("guide.txt"));

    let absent = resolve_document(temp_dir.path(), Path::new("nowhere.txt"));
    assert_eq!(absent, PathBuf::from("nowhere.txt"));

    let absolute = temp_dir.path().join("other.txt");
    assert_eq!(resolve_document(temp_dir.path(), &absolute), absolute);
}

#[test]
fn sizes_are_human_readable() {
    assert_eq!(format_size(512), "512 B");
    assert_eq!(format_size(2048), "2.0 KB");
    assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
}
