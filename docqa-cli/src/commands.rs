//! Subcommand implementations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow};
use docqa_model::{Llm, MockLlm, OllamaConfig, OllamaModel};
use docqa_rag::{
    Answer, DocQa, DocumentInfo, DocumentLibrary, EmbeddingProvider, HashingEmbeddingProvider,
    IngestMode, OllamaEmbeddingProvider, QueryFailure, RagError, Settings,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, info};

use crate::cli::{Backend, CHAT_HELP, ChatCommand, Cli, Command};
use crate::render;

/// How answers are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    /// Print the retrieved chunks under each answer.
    pub show_sources: bool,
    /// Print tokens as they arrive rather than once complete.
    pub stream: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { show_sources: true, stream: true }
    }
}

impl From<&Cli> for OutputOptions {
    fn from(cli: &Cli) -> Self {
        Self { show_sources: !cli.hide_source, stream: !cli.mute_stream }
    }
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings(Settings::from_env()?)?;
    let output = OutputOptions::from(&cli);
    let library = DocumentLibrary::new(&settings.source_directory);
    debug!(command = ?cli.command, backend = ?cli.backend, "running");

    match cli.command {
        Command::Upload { files } => {
            for document in upload_files(&library, &files).await? {
                println!("uploaded {} ({})", document.name, render::human_size(document.size));
            }
        }
        Command::Delete { names } => {
            for name in &names {
                library.delete(name).await?;
                println!("deleted {name}");
            }
            println!("Run `docqa ingest` to drop them from the index.");
        }
        Command::List => println!("{}", render::documents(&library.list()?)),
        Command::Ingest { rebuild } => {
            let qa = open_session(cli.backend, &settings, rebuild).await?;
            let mode = if rebuild { IngestMode::Rebuild } else { IngestMode::Incremental };
            let report = qa.ingest(mode).await?;
            println!("{}", render::report(&report));
            qa.close().await?;
        }
        Command::Ask { question } => {
            let qa = open_session(cli.backend, &settings, false).await?;
            answer(&qa, &question.join(" "), output, &mut io::stdout()).await?;
            qa.close().await?;
        }
        Command::Chat => {
            let qa = open_session(cli.backend, &settings, false).await?;
            let result = chat(&qa, output).await;
            qa.close().await?;
            result?;
        }
    }
    Ok(())
}

/// The embedding provider and language model for `backend`.
pub fn providers(
    backend: Backend,
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn EmbeddingProvider>, Arc<dyn Llm>)> {
    match backend {
        Backend::Ollama => {
            let embedder =
                OllamaEmbeddingProvider::new(&settings.embeddings_model, settings.embedding_dimensions)?
                    .with_host(&settings.ollama_host)?;
            let llm = OllamaModel::new(
                OllamaConfig::new(&settings.model).with_host(&settings.ollama_host),
            )?;
            Ok((Arc::new(embedder), Arc::new(llm)))
        }
        Backend::Offline => Ok((
            Arc::new(HashingEmbeddingProvider::new(settings.embedding_dimensions)),
            Arc::new(MockLlm::echo().with_name("offline-echo")),
        )),
    }
}

/// Open a session. With `reset`, an index built with another embedding
/// model or found corrupt is discarded instead of refused.
pub async fn open_session(backend: Backend, settings: &Settings, reset: bool) -> anyhow::Result<DocQa> {
    let (embedder, llm) = providers(backend, settings)?;
    let qa = if reset {
        DocQa::open_or_reset(settings, embedder, llm).await?
    } else {
        DocQa::open(settings, embedder, llm).await?
    };
    info!(
        index = %settings.persist_directory.display(),
        chunks = qa.index().len().await,
        model = qa.llm().name(),
        "session opened"
    );
    Ok(qa)
}

/// Copy local files into the library under their file names.
pub async fn upload_files(
    library: &DocumentLibrary,
    files: &[PathBuf],
) -> anyhow::Result<Vec<DocumentInfo>> {
    let mut uploaded = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        uploaded.push(library.upload(name, &content).await?);
    }
    Ok(uploaded)
}

/// Ask `question` and print the answer to `out` as it streams.
///
/// Ctrl-C stops the answer; the partial answer is kept on screen and
/// `Ok(None)` is returned.
pub async fn answer(
    qa: &DocQa,
    question: &str,
    output: OutputOptions,
    out: &mut dyn Write,
) -> anyhow::Result<Option<Answer>> {
    let started = Instant::now();
    let mut handle = match qa.ask(question).await {
        Ok(handle) => handle,
        Err(failure) => return Err(failed(failure, output, out)?),
    };

    let cancel = handle.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    writeln!(out, "\n> Question:\n{question}\n\n> Answer:")?;
    while let Some(token) = handle.next_token().await {
        if output.stream {
            write!(out, "{token}")?;
            out.flush()?;
        }
    }
    watcher.abort();

    match handle.finish().await {
        Ok(answer) => {
            if !output.stream {
                write!(out, "{}", answer.text)?;
            }
            writeln!(out, "\n{}", render::elapsed(started.elapsed()))?;
            if output.show_sources {
                writeln!(out, "\n{}", render::sources(&answer.retrieval))?;
            }
            Ok(Some(answer))
        }
        Err(failure) if matches!(failure.error, RagError::Cancelled) => {
            writeln!(out, "\n[answer cancelled]")?;
            Ok(None)
        }
        Err(failure) => Err(failed(failure, output, out)?),
    }
}

/// Show whatever was retrieved before a query failed, then hand back its error.
fn failed(failure: QueryFailure, output: OutputOptions, out: &mut dyn Write) -> io::Result<anyhow::Error> {
    if let Some(retrieval) = failure.retrieval.as_deref().filter(|r| !r.is_empty()) {
        if output.show_sources {
            writeln!(out, "\n{}", render::sources(retrieval))?;
        }
    }
    Ok(failure.error.into())
}

/// Run one chat command. Returns `false` when the user asked to leave.
pub async fn execute(
    qa: &DocQa,
    command: ChatCommand,
    output: OutputOptions,
    out: &mut dyn Write,
) -> anyhow::Result<bool> {
    match command {
        ChatCommand::Empty => {}
        ChatCommand::Exit => return Ok(false),
        ChatCommand::Help => writeln!(out, "{CHAT_HELP}")?,
        ChatCommand::List => writeln!(out, "{}", render::documents(&qa.list_documents()?))?,
        ChatCommand::Upload(files) => {
            for document in upload_files(qa.library(), &files).await? {
                writeln!(out, "uploaded {} ({})", document.name, render::human_size(document.size))?;
            }
            writeln!(out, "Run /ingest to index them.")?;
        }
        ChatCommand::Delete(names) => {
            for name in &names {
                qa.delete(name).await?;
                writeln!(out, "deleted {name}")?;
            }
            writeln!(out, "Run /ingest to drop them from the index.")?;
        }
        ChatCommand::Ingest { rebuild } => {
            let mode = if rebuild { IngestMode::Rebuild } else { IngestMode::Incremental };
            let report = qa.ingest(mode).await?;
            writeln!(out, "{}", render::report(&report))?;
        }
        ChatCommand::Ask(question) => {
            answer(qa, &question, output, out).await?;
        }
    }
    Ok(true)
}

/// Interactive loop. Errors are reported and the loop continues unless the
/// index is damaged.
pub async fn chat(qa: &DocQa, output: OutputOptions) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("docqa chat, answering with {}. Type /help for commands.", qa.llm().name());

    loop {
        let line = match editor.readline("\nEnter a query: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        let command = match ChatCommand::parse(&line) {
            Ok(command) => command,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };
        match execute(qa, command, output, &mut io::stdout()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                eprintln!("{}", render::error(&e));
                let fatal = e.downcast_ref::<RagError>().is_some_and(RagError::is_fatal_to_process);
                if fatal {
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
