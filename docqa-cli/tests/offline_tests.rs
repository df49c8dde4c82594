//! The CLI flows against the offline backend.

use std::path::PathBuf;
use std::sync::Arc;

use docqa_cli::commands::{OutputOptions, answer, execute, open_session, upload_files};
use docqa_cli::{Backend, ChatCommand, render};
use docqa_model::{MockLlm, ModelError};
use docqa_rag::{DocQa, DocumentLibrary, HashingEmbeddingProvider, IngestMode, RagError, Settings};
use tempfile::TempDir;

fn settings(temp: &TempDir) -> Settings {
    Settings {
        persist_directory: temp.path().join("db"),
        source_directory: temp.path().join("source"),
        ..Settings::default()
    }
}

fn local_file(temp: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = temp.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn upload_ingest_and_ask() {
    let temp = tempfile::tempdir().unwrap();
    let settings = settings(&temp);
    let file = local_file(&temp, "france.txt", "The capital of France is Paris.");

    let library = DocumentLibrary::new(&settings.source_directory);
    let uploaded = upload_files(&library, &[file]).await.unwrap();
    assert_eq!(uploaded[0].name, "france.txt");

    let qa = open_session(Backend::Offline, &settings, false).await.unwrap();
    let mut out = Vec::new();
    assert!(execute(&qa, ChatCommand::Ingest { rebuild: false }, OutputOptions::default(), &mut out)
        .await
        .unwrap());
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("1 indexed"), "{text}");

    let mut out = Vec::new();
    let answered = answer(&qa, "What is the capital of France?", OutputOptions::default(), &mut out)
        .await
        .unwrap()
        .unwrap();
    assert!(answered.text.contains("Paris"));
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("> Answer:"));
    assert!(text.contains("Source Documents:\n\n> france.txt"));
    qa.close().await.unwrap();
}

#[tokio::test]
async fn hidden_sources_and_muted_stream() {
    let temp = tempfile::tempdir().unwrap();
    let settings = settings(&temp);
    let qa = open_session(Backend::Offline, &settings, false).await.unwrap();
    qa.upload("notes.md", b"# Notes\n\nThe meeting is on Tuesday.").await.unwrap();
    qa.ingest(docqa_rag::IngestMode::Incremental).await.unwrap();

    let output = OutputOptions { show_sources: false, stream: false };
    let mut out = Vec::new();
    let answered = answer(&qa, "When is the meeting?", output, &mut out).await.unwrap().unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(!text.contains("Source Documents"));
    assert!(text.contains(&answered.text));
}

#[tokio::test]
async fn chat_commands_manage_the_library() {
    let temp = tempfile::tempdir().unwrap();
    let settings = settings(&temp);
    let qa = open_session(Backend::Offline, &settings, false).await.unwrap();
    let a = local_file(&temp, "a.txt", "Alpha document.");
    let b = local_file(&temp, "b.txt", "Beta document.");

    let mut out = Vec::new();
    let options = OutputOptions::default();
    execute(&qa, ChatCommand::Upload(vec![a, b]), options, &mut out).await.unwrap();
    execute(&qa, ChatCommand::Ingest { rebuild: false }, options, &mut out).await.unwrap();
    execute(&qa, ChatCommand::Delete(vec!["a.txt".into()]), options, &mut out).await.unwrap();
    execute(&qa, ChatCommand::Ingest { rebuild: true }, options, &mut out).await.unwrap();
    assert!(qa.index().chunks_for_document("a.txt").await.is_empty());
    assert!(!qa.index().chunks_for_document("b.txt").await.is_empty());

    let mut listing = Vec::new();
    execute(&qa, ChatCommand::List, options, &mut listing).await.unwrap();
    let listing = String::from_utf8(listing).unwrap();
    assert!(listing.contains("b.txt"));
    assert!(!listing.contains("a.txt"));

    assert!(!execute(&qa, ChatCommand::Exit, options, &mut out).await.unwrap());
    let err = execute(&qa, ChatCommand::Delete(vec!["gone.txt".into()]), options, &mut out)
        .await
        .unwrap_err();
    assert!(render::error(&err).contains("gone.txt"));
}

#[tokio::test]
async fn changed_embedding_model_needs_a_rebuild() {
    let temp = tempfile::tempdir().unwrap();
    let mut settings = settings(&temp);
    let qa = open_session(Backend::Offline, &settings, false).await.unwrap();
    qa.upload("a.txt", b"Some text.").await.unwrap();
    qa.ingest(docqa_rag::IngestMode::Incremental).await.unwrap();
    qa.close().await.unwrap();

    settings.embedding_dimensions = 128;
    let err = open_session(Backend::Offline, &settings, false).await.unwrap_err();
    assert!(render::error(&err).contains("docqa ingest --rebuild"));

    let qa = open_session(Backend::Offline, &settings, true).await.unwrap();
    assert!(qa.index().is_empty().await);
}

#[tokio::test]
async fn sources_are_shown_when_the_model_fails() {
    let temp = tempfile::tempdir().unwrap();
    let settings = settings(&temp);
    let llm = MockLlm::failing(ModelError::Unavailable { provider: "mock".into(), message: "down".into() });
    let embedder = HashingEmbeddingProvider::new(settings.embedding_dimensions);
    let qa = DocQa::open(&settings, Arc::new(embedder), Arc::new(llm)).await.unwrap();
    qa.upload("france.txt", b"The capital of France is Paris.").await.unwrap();
    qa.ingest(IngestMode::Incremental).await.unwrap();

    let mut out = Vec::new();
    let err = answer(&qa, "What is the capital of France?", OutputOptions::default(), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::GenerationService(_))), "{err:?}");
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Source Documents:\n\n> france.txt"), "{text}");

    let mut out = Vec::new();
    let hidden = OutputOptions { show_sources: false, ..OutputOptions::default() };
    assert!(answer(&qa, "What is the capital of France?", hidden, &mut out).await.is_err());
    assert!(!String::from_utf8(out).unwrap().contains("Source Documents"));
}
