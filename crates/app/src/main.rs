use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use policy_rag_core::{
    build_and_persist, open_or_build, Answer, CharacterNgramEmbedder, Embedder, IndexError, IngestError,
    OpenAiChatModel, OpenAiEmbedder, OpenAiEndpoint, OpenedIndex, PolicyAssistant, QueryError, RagConfig,
    ServiceError, Session, VectorIndex,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "policy-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Embedding backend used for ingestion and queries.
    #[arg(long, value_enum, env = "POLICY_RAG_EMBEDDER", default_value = "ngram")]
    embedder: EmbedderKind,

    /// Base URL of an OpenAI-compatible embeddings API.
    #[arg(long, env = "POLICY_RAG_EMBEDDING_URL", default_value = "https://api.openai.com/v1")]
    embedding_url: String,

    #[arg(long, env = "POLICY_RAG_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Vector dimension; must match the index being queried.
    #[arg(long, env = "POLICY_RAG_EMBEDDING_DIMS", default_value = "256")]
    embedding_dims: usize,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[arg(long, env = "POLICY_RAG_LLM_URL", default_value = "http://localhost:11434/v1")]
    llm_url: String,

    #[arg(long, env = "POLICY_RAG_LLM_MODEL", default_value = "llama3.1")]
    llm_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Number of passages retrieved per question.
    #[arg(long, env = "POLICY_RAG_TOP_K", default_value = "4")]
    top_k: usize,

    /// Minimum cosine similarity for a passage to be used.
    #[arg(long, env = "POLICY_RAG_MIN_SCORE", default_value = "0.3")]
    min_score: f32,

    /// Previous turns shown to the query rewriter.
    #[arg(long, env = "POLICY_RAG_HISTORY_WINDOW", default_value = "4")]
    history_window: usize,

    /// Per-call timeout for the embedding and language model services, in seconds.
    #[arg(long, env = "POLICY_RAG_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Local hashed character trigrams; works offline.
    Ngram,
    /// OpenAI-compatible embeddings endpoint.
    Openai,
}

#[derive(Args)]
struct IndexArgs {
    /// Directory holding the persisted index.
    #[arg(long, env = "POLICY_RAG_INDEX")]
    index: PathBuf,
    /// Folder to build the index from when none exists yet.
    #[arg(long, env = "POLICY_RAG_SOURCE")]
    source: Option<PathBuf>,
    /// Rebuild the index from `--source` even if one exists.
    #[arg(long, default_value_t = false, requires = "source")]
    rebuild: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and persist every pdf and txt file under a folder.
    Ingest {
        /// Folder that contains policy documents recursively.
        #[arg(long, env = "POLICY_RAG_SOURCE")]
        source: PathBuf,
        /// Directory the index files are written to.
        #[arg(long, env = "POLICY_RAG_INDEX")]
        index: PathBuf,
    },
    /// Ask one question and print the cited answer.
    Ask {
        #[command(flatten)]
        location: IndexArgs,
        #[arg(long)]
        question: String,
    },
    /// Interactive session on stdin. `/reset` clears the history, `/quit` exits.
    Chat {
        #[command(flatten)]
        location: IndexArgs,
    },
}

impl Cli {
    fn rag_config(&self) -> anyhow::Result<RagConfig> {
        let config = RagConfig {
            top_k: self.top_k,
            min_score: self.min_score,
            history_window: self.history_window,
            service_timeout_secs: self.timeout_secs,
            ..RagConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn endpoint(&self, base_url: &str) -> anyhow::Result<OpenAiEndpoint> {
        let endpoint = OpenAiEndpoint::new(
            base_url,
            self.api_key.clone(),
            Duration::from_secs(self.timeout_secs),
        )?;
        Ok(endpoint)
    }

    fn language_model(&self) -> anyhow::Result<OpenAiChatModel> {
        Ok(OpenAiChatModel::new(self.endpoint(&self.llm_url)?, self.llm_model.as_str())?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        embedder = ?cli.embedder,
        "policy-rag boot"
    );

    match cli.embedder {
        EmbedderKind::Ngram => {
            let embedder = CharacterNgramEmbedder::new(cli.embedding_dims);
            run(&cli, embedder).await
        }
        EmbedderKind::Openai => {
            let endpoint = cli.endpoint(&cli.embedding_url)?;
            let embedder = OpenAiEmbedder::new(endpoint, cli.embedding_model.as_str(), cli.embedding_dims)?;
            run(&cli, embedder).await
        }
    }
}

async fn run<E: Embedder>(cli: &Cli, embedder: E) -> anyhow::Result<()> {
    let config = cli.rag_config()?;

    match &cli.command {
        Command::Ingest { source, index } => {
            let opened = build_and_persist(source, index, &embedder, &config).await?;
            print_ingestion(index, &opened);
            Ok(())
        }
        Command::Ask { location, question } => {
            let assistant = open_assistant(cli, location, embedder, &config).await?;
            let mut session = Session::new();
            println!("{}", reply_text(assistant.answer(&mut session, question).await)?);
            Ok(())
        }
        Command::Chat { location } => {
            let assistant = open_assistant(cli, location, embedder, &config).await?;
            chat(&assistant).await
        }
    }
}

fn print_ingestion(index_dir: &Path, opened: &OpenedIndex) {
    let Some(report) = &opened.report else {
        return;
    };

    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
    }
    for document in &report.documents {
        println!(
            "{}: {} page(s), {} chunk(s)",
            document.document_id, document.pages, document.chunks
        );
    }
    println!(
        "{} chunks from {} document(s) indexed into {} ({} skipped) at {}",
        report.chunk_count,
        report.documents.len(),
        index_dir.display(),
        report.skipped.len(),
        report.finished_at.to_rfc3339()
    );
}

async fn open_assistant<E: Embedder>(
    cli: &Cli,
    args: &IndexArgs,
    embedder: E,
    config: &RagConfig,
) -> anyhow::Result<PolicyAssistant<E, OpenAiChatModel>> {
    let opened = open_or_build(&args.index, args.source.as_deref(), &embedder, config, args.rebuild)
        .await
        .map_err(|error| match error {
            IngestError::Index(IndexError::MissingIndex(_)) => anyhow::anyhow!(
                "{error}; run `policy-rag ingest` first or pass --source to build it"
            ),
            other => other.into(),
        })?;
    print_ingestion(&args.index, &opened);

    let manifest = &opened.manifest;
    if manifest.dimension != embedder.dimensions() {
        anyhow::bail!(
            "index at {} holds {}-dimensional vectors but the embedder produces {}",
            args.index.display(),
            manifest.dimension,
            embedder.dimensions()
        );
    }
    if manifest.embedder != embedder.name() {
        warn!(
            indexed_with = %manifest.embedder,
            querying_with = embedder.name(),
            "index was built with a different embedder"
        );
    }
    info!(index = %args.index.display(), chunks = opened.index.len(), "index loaded");

    Ok(PolicyAssistant::new(
        Arc::new(opened.index),
        Arc::new(embedder),
        Arc::new(cli.language_model()?),
        config,
    ))
}

async fn chat<E: Embedder>(assistant: &PolicyAssistant<E, OpenAiChatModel>) -> anyhow::Result<()> {
    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Ask a question about company policy. /reset clears the conversation, /quit exits.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.clear();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        println!("{}", reply_text(assistant.answer(&mut session, line).await)?);
    }

    Ok(())
}

/// Text shown for one turn. Service failures become a degraded reply; other
/// errors are returned.
fn reply_text(result: Result<Answer, QueryError>) -> Result<String, QueryError> {
    match result {
        Ok(answer) => Ok(format_answer(&answer)),
        Err(QueryError::Service(error)) => {
            warn!(%error, "question not answered");
            Ok(degraded_reply(&error))
        }
        Err(error) => Err(error),
    }
}

fn degraded_reply(error: &ServiceError) -> String {
    if error.is_retryable() {
        format!("The policy assistant is temporarily unavailable ({error}). Please try again.")
    } else {
        format!("The policy assistant could not answer this question ({error}).")
    }
}

fn format_answer(answer: &Answer) -> String {
    let mut text = answer.text.clone();
    if answer.citations.is_empty() {
        return text;
    }

    text.push_str("\nSources:");
    for citation in &answer.citations {
        text.push_str(&format!("\n  - {} [score={:.3}]", citation.label(), citation.score));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_rag_core::{AnswerOutcome, Citation};

    fn grounded() -> Answer {
        Answer {
            text: "Employees get 20 days of annual leave.".to_string(),
            citations: vec![Citation {
                document_id: "LeavePolicy.txt".to_string(),
                document_title: "LeavePolicy".to_string(),
                page: 1,
                chunk_id: "c1".to_string(),
                snippet: None,
                score: 0.4381,
            }],
            outcome: AnswerOutcome::Grounded,
            rewritten_query: "How many leave days do I get?".to_string(),
        }
    }

    #[test]
    fn answers_list_their_sources() -> Result<(), QueryError> {
        let text = reply_text(Ok(grounded()))?;
        assert_eq!(
            text,
            "Employees get 20 days of annual leave.\nSources:\n  - LeavePolicy (page 1) [score=0.438]"
        );
        Ok(())
    }

    #[test]
    fn service_outage_gives_a_degraded_reply() -> Result<(), QueryError> {
        let text = reply_text(Err(QueryError::Service(ServiceError::Timeout {
            service: "language model".to_string(),
            after: Duration::from_secs(30),
        })))?;
        assert!(text.starts_with("The policy assistant is temporarily unavailable"));

        let text = reply_text(Err(QueryError::Service(ServiceError::InvalidResponse {
            service: "language model".to_string(),
            details: "empty completion".to_string(),
        })))?;
        assert!(text.starts_with("The policy assistant could not answer"));
        Ok(())
    }

    #[test]
    fn other_errors_are_not_masked() {
        assert!(matches!(
            reply_text(Err(QueryError::EmptyQuestion)),
            Err(QueryError::EmptyQuestion)
        ));
    }

    #[test]
    fn rebuild_requires_a_source() {
        let parsed = Cli::try_parse_from([
            "policy-rag", "ask", "--index", "idx", "--question", "q", "--rebuild",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "policy-rag", "chat", "--index", "idx", "--source", "docs", "--rebuild",
        ]);
        assert!(parsed.is_ok());
    }
}
