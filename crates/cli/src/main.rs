use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use codex_core::embedder::Embedder;

const PACK_PATH_ENV: &str = "CODEX_PACK_PATH";

#[derive(Parser)]
#[command(name = "codex", version, about = "Query and build Codex Packs for the OMOP terminology server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a Codex Pack from a directory of OMOP CSVs.
    Build {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "v1.0")]
        version: String,
        #[arg(long = "source-date", default_value = "1970-01-01")]
        source_date: String,
        #[arg(long, default_value_t = codex_core::builder::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Resolve free text to Standard Concepts.
    Normalize {
        text: String,
        #[arg(long)]
        pack: Option<PathBuf>,
        #[arg(long, default_value_t = codex_core::normalizer::DEFAULT_K)]
        k: usize,
        #[arg(long)]
        domain: Option<String>,
    },
    /// List every descendant of a concept in the hierarchy.
    Descendants {
        concept_id: i64,
        #[arg(long)]
        pack: Option<PathBuf>,
    },
    /// Translate a code to its mapped concepts.
    Translate {
        source_id: i64,
        #[arg(long, default_value = "Maps to")]
        relationship: String,
        #[arg(long = "target-vocab")]
        target_vocab: Option<String>,
        #[arg(long)]
        pack: Option<PathBuf>,
    },
    /// Check whether a specific relationship edge exists.
    Check {
        a: i64,
        b: i64,
        relationship: String,
        #[arg(long)]
        pack: Option<PathBuf>,
    },
    /// Print the CLI version.
    Version,
}

fn resolve_pack(pack: Option<PathBuf>) -> PathBuf {
    pack.or_else(|| std::env::var(PACK_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| {
            eprintln!("error: no pack directory given; pass --pack or set {PACK_PATH_ENV}");
            std::process::exit(1);
        })
}

/// Placeholder embedder: the embedding model is an external collaborator
/// (spec.md §1 Out of scope), so this binary ships no concrete model and
/// `build`/`normalize` always fail with `EmbedderFailure` as run here.
/// Deployments that need those two subcommands to work fork this binary
/// (or call `codex_core::builder::Builder::build` / `codex_core::initialize`
/// directly) and substitute a real `Embedder` — a local ONNX model, a
/// remote API client — for `UnconfiguredEmbedder` in the match arms below.
struct UnconfiguredEmbedder;
impl Embedder for UnconfiguredEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
        Err("no embedder configured for this CLI invocation".to_string())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Build { source, output, version, source_date, batch_size } => {
            let builder = codex_core::builder::Builder::new(source, output);
            match builder.build(&UnconfiguredEmbedder, &version, &source_date, batch_size) {
                Ok(()) => println!("build complete"),
                Err(err) => fail(&err),
            }
        }
        Command::Normalize { text, pack, k, domain } => {
            if let Err(err) = codex_core::initialize(&resolve_pack(pack), Arc::new(UnconfiguredEmbedder)) {
                fail(&err);
            }
            match codex_core::normalize(&text, k, domain.as_deref()) {
                Ok(matches) => print_json(&matches),
                Err(err) => fail(&err),
            }
        }
        Command::Descendants { concept_id, pack } => {
            if let Err(err) = codex_core::initialize(&resolve_pack(pack), Arc::new(UnconfiguredEmbedder)) {
                fail(&err);
            }
            match codex_core::get_descendants(concept_id) {
                Ok(ids) => print_json(&ids),
                Err(err) => fail(&err),
            }
        }
        Command::Translate { source_id, relationship, target_vocab, pack } => {
            if let Err(err) = codex_core::initialize(&resolve_pack(pack), Arc::new(UnconfiguredEmbedder)) {
                fail(&err);
            }
            match codex_core::translate_code(source_id, Some(&relationship), target_vocab.as_deref()) {
                Ok(concepts) => print_json(&concepts),
                Err(err) => fail(&err),
            }
        }
        Command::Check { a, b, relationship, pack } => {
            if let Err(err) = codex_core::initialize(&resolve_pack(pack), Arc::new(UnconfiguredEmbedder)) {
                fail(&err);
            }
            match codex_core::check_relationship(a, b, &relationship) {
                Ok(result) => print_json(&result),
                Err(err) => fail(&err),
            }
        }
        Command::Version => {
            println!("codex {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("error: failed to serialize result: {err}");
            std::process::exit(1);
        }
    }
}

fn fail(err: &codex_core::CodexError) -> ! {
    tracing::error!(error = %err, "command failed");
    eprintln!("error: {err}");
    std::process::exit(1);
}
