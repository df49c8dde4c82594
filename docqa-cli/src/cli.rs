//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use docqa_rag::{ChunkingStrategy, Settings};
use docqa_telemetry::LogFormat;

/// Ask questions about your documents, answered by a local model.
#[derive(Parser, Debug, Clone)]
#[command(name = "docqa", version, about = "Ask questions about your documents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding uploaded documents [default from SOURCE_DIRECTORY]
    #[arg(long, global = true)]
    pub source_dir: Option<PathBuf>,

    /// Directory holding the index [default from PERSIST_DIRECTORY]
    #[arg(long, global = true)]
    pub persist_dir: Option<PathBuf>,

    /// Language model tag [default from MODEL]
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding model tag [default from EMBEDDINGS_MODEL_NAME]
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// Dimensionality of the embedding model [default from EMBEDDINGS_DIMENSIONS]
    #[arg(long, global = true)]
    pub embedding_dimensions: Option<usize>,

    /// Ollama base URL [default from OLLAMA_HOST]
    #[arg(long, global = true)]
    pub ollama_host: Option<String>,

    /// Where embeddings and answers come from
    #[arg(long, global = true, value_enum, env = "DOCQA_BACKEND", default_value_t = Backend::Ollama)]
    pub backend: Backend,

    /// How documents are split: fixed, recursive or markdown
    #[arg(long, global = true)]
    pub chunking: Option<ChunkingStrategy>,

    /// Maximum chunk size [default from CHUNK_SIZE]
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Overlap between chunks [default from CHUNK_OVERLAP]
    #[arg(long, global = true)]
    pub chunk_overlap: Option<usize>,

    /// Chunks retrieved per question [default from TARGET_SOURCE_CHUNKS]
    #[arg(short = 'k', long, global = true)]
    pub top_k: Option<usize>,

    /// Drop retrieved chunks scoring below this
    #[arg(long, global = true)]
    pub similarity_threshold: Option<f32>,

    /// Do not print the source documents under each answer
    #[arg(short = 'S', long, global = true)]
    pub hide_source: bool,

    /// Print the answer only once it is complete
    #[arg(short = 'M', long, global = true)]
    pub mute_stream: bool,

    /// Log output format
    #[arg(long, global = true, env = "DOCQA_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Copy files into the document library
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Remove documents from the library
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List the documents in the library
    List,
    /// Index the library; only changed documents unless --rebuild
    Ingest {
        /// Discard the index and re-embed every document
        #[arg(long)]
        rebuild: bool,
    },
    /// Ask a single question
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Ask questions interactively
    Chat,
}

/// Embedding and language-model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Models served by Ollama.
    Ollama,
    /// Hashing embeddings and an echoing model; needs no server.
    Offline,
}

impl Cli {
    /// Apply command-line overrides on top of `base` and validate the result.
    pub fn settings(&self, mut base: Settings) -> docqa_rag::Result<Settings> {
        if let Some(dir) = &self.source_dir {
            base.source_directory = dir.clone();
        }
        if let Some(dir) = &self.persist_dir {
            base.persist_directory = dir.clone();
        }
        if let Some(model) = &self.model {
            base.model = model.clone();
        }
        if let Some(model) = &self.embedding_model {
            base.embeddings_model = model.clone();
        }
        if let Some(dimensions) = self.embedding_dimensions {
            base.embedding_dimensions = dimensions;
        }
        if let Some(host) = &self.ollama_host {
            base.ollama_host = host.clone();
        }
        if let Some(strategy) = self.chunking {
            base.rag.chunking = strategy;
        }
        if let Some(size) = self.chunk_size {
            base.rag.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            base.rag.chunk_overlap = overlap;
        }
        if let Some(k) = self.top_k {
            base.rag.top_k = k;
        }
        if let Some(threshold) = self.similarity_threshold {
            base.rag.similarity_threshold = threshold;
        }
        base.validate()?;
        Ok(base)
    }
}

/// A line typed into `docqa chat`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Ask(String),
    Upload(Vec<PathBuf>),
    Delete(Vec<String>),
    List,
    Ingest { rebuild: bool },
    Help,
    Exit,
    Empty,
}

impl ChatCommand {
    /// Parse a chat line. Lines not starting with `/` are questions.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        if matches!(line, "exit" | "quit") {
            return Ok(Self::Exit);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Ask(line.to_string()));
        };

        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        match name {
            "exit" | "quit" => Ok(Self::Exit),
            "help" | "?" => Ok(Self::Help),
            "list" | "ls" => Ok(Self::List),
            "ingest" => match args.as_slice() {
                [] => Ok(Self::Ingest { rebuild: false }),
                ["--rebuild"] => Ok(Self::Ingest { rebuild: true }),
                _ => Err("usage: /ingest [--rebuild]".to_string()),
            },
            "upload" if !args.is_empty() => {
                Ok(Self::Upload(args.into_iter().map(PathBuf::from).collect()))
            }
            "upload" => Err("usage: /upload <file>...".to_string()),
            "delete" | "rm" if !args.is_empty() => {
                Ok(Self::Delete(args.into_iter().map(str::to_string).collect()))
            }
            "delete" | "rm" => Err("usage: /delete <name>...".to_string()),
            other => Err(format!("unknown command '/{other}'; type /help")),
        }
    }
}

/// Help text for `docqa chat`.
pub const CHAT_HELP: &str = "\
Type a question to ask it. Commands:
  /upload <file>...   copy files into the library
  /delete <name>...   remove documents from the library
  /list               list the library
  /ingest [--rebuild] index new and changed documents
  /help               show this help
  /exit               leave (also: exit, quit, Ctrl-D)
Press Ctrl-C while an answer is streaming to stop it.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_global_flags() {
        let cli = Cli::try_parse_from([
            "docqa",
            "ask",
            "What",
            "is",
            "Paris?",
            "-k",
            "2",
            "--backend",
            "offline",
            "--chunking",
            "markdown",
            "-S",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Ask { question: vec!["What".into(), "is".into(), "Paris?".into()] }
        );
        assert_eq!(cli.top_k, Some(2));
        assert_eq!(cli.backend, Backend::Offline);
        assert_eq!(cli.chunking, Some(ChunkingStrategy::Markdown));
        assert!(cli.hide_source);
        assert!(!cli.mute_stream);

        let cli = Cli::try_parse_from(["docqa", "ingest", "--rebuild"]).unwrap();
        assert_eq!(cli.command, Command::Ingest { rebuild: true });
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn rejects_missing_arguments() {
        assert!(Cli::try_parse_from(["docqa"]).is_err());
        assert!(Cli::try_parse_from(["docqa", "ask"]).is_err());
        assert!(Cli::try_parse_from(["docqa", "upload"]).is_err());
        assert!(Cli::try_parse_from(["docqa", "list", "--chunking", "sideways"]).is_err());
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::try_parse_from([
            "docqa",
            "list",
            "--source-dir",
            "/tmp/docs",
            "--top-k",
            "7",
            "--chunk-size",
            "300",
            "--chunk-overlap",
            "30",
        ])
        .unwrap();
        let settings = cli.settings(Settings::default()).unwrap();
        assert_eq!(settings.source_directory, PathBuf::from("/tmp/docs"));
        assert_eq!(settings.persist_directory, PathBuf::from("db"));
        assert_eq!(settings.rag.top_k, 7);
        assert_eq!(settings.rag.chunk_size, 300);
        assert_eq!(settings.rag.chunk_overlap, 30);

        let cli = Cli::try_parse_from(["docqa", "list", "--chunk-size", "10", "--chunk-overlap", "20"])
            .unwrap();
        assert!(cli.settings(Settings::default()).is_err());
    }

    #[test]
    fn parses_chat_lines() {
        assert_eq!(ChatCommand::parse("  "), Ok(ChatCommand::Empty));
        assert_eq!(ChatCommand::parse("quit"), Ok(ChatCommand::Exit));
        assert_eq!(
            ChatCommand::parse("What is in notes.md?"),
            Ok(ChatCommand::Ask("What is in notes.md?".into()))
        );
        assert_eq!(ChatCommand::parse("/ingest"), Ok(ChatCommand::Ingest { rebuild: false }));
        assert_eq!(ChatCommand::parse("/ingest --rebuild"), Ok(ChatCommand::Ingest { rebuild: true }));
        assert_eq!(
            ChatCommand::parse("/upload a.txt b.md"),
            Ok(ChatCommand::Upload(vec![PathBuf::from("a.txt"), PathBuf::from("b.md")]))
        );
        assert_eq!(ChatCommand::parse("/rm a.txt"), Ok(ChatCommand::Delete(vec!["a.txt".into()])));
        assert!(ChatCommand::parse("/upload").is_err());
        assert!(ChatCommand::parse("/ingest now").is_err());
        assert!(ChatCommand::parse("/frobnicate").is_err());
    }
}
