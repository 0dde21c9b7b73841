//! `ragline ask`: single-question or interactive chat mode.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragline_config::AppConfig;
use ragline_core::{ConversationMessage, ScopeFilter, SessionId};
use ragline_pipeline::{ChatRequest, InferenceExecutor, Pipeline, StreamEvent};
use ragline_retrieval::{InMemoryHistory, ScopedRetriever};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

pub async fn run(
    question: Option<String>,
    docs: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    eprint!("  Loading {} engine...", config.engine.kind);
    let engine_config = config.engine.clone();
    let engine =
        tokio::task::spawn_blocking(move || ragline_engine::build_engine(&engine_config))
            .await??;
    eprint!("\r                                        \r");

    let executor = Arc::new(InferenceExecutor::start(
        engine,
        config.executor.fragment_buffer,
    )?);
    let retriever = Arc::new(ScopedRetriever::new(&config.retrieval));

    let mut scope = ScopeFilter::new();
    for path in &docs {
        let source_id = index_file(&retriever, path).await?;
        scope.insert(source_id);
    }

    let pipeline = Pipeline::from_config(
        &config,
        executor,
        retriever,
        Arc::new(InMemoryHistory::new()),
    );
    let session = SessionId::new();

    if let Some(question) = question {
        let conversation = vec![ConversationMessage::user(question)];
        let request = ChatRequest::new(conversation)
            .with_scope(scope)
            .with_session(session);
        stream_reply(&pipeline, request).await?;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ragline interactive session");
    println!("  Engine:   {} ({})", config.engine.kind, config.engine.model);
    println!("  Sources:  {}", scope.len());
    println!("  Type your message and press Enter. Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut conversation: Vec<ConversationMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if line.is_empty() {
            prompt()?;
            continue;
        }

        conversation.push(ConversationMessage::user(line));
        let request = ChatRequest::new(conversation.clone())
            .with_scope(scope.clone())
            .with_session(session.clone());

        match stream_reply(&pipeline, request).await {
            Ok(reply) => conversation.push(ConversationMessage::assistant(reply)),
            Err(e) => {
                eprintln!("  [Error] {e}");
                // Keep the transcript consistent for the next turn.
                conversation.pop();
            }
        }
        println!();
        prompt()?;
    }

    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Index one plain-text file under its file name.
async fn index_file(
    retriever: &ScopedRetriever,
    path: &Path,
) -> Result<String, Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let source_id = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let chunks = retriever.ingest(&source_id, &text).await?;
    eprintln!("  Indexed {source_id} ({chunks} chunks)");
    Ok(source_id)
}

/// Print fragments as they arrive and return the full reply.
async fn stream_reply(
    pipeline: &Pipeline,
    request: ChatRequest,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut response = pipeline.stream(request).await?;
    let mut stdout = std::io::stdout();

    while let Some(event) = response.events.recv().await {
        match event {
            StreamEvent::Chunk { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamEvent::Done {
                full_text, stats, ..
            } => {
                writeln!(stdout)?;
                debug!(
                    prompt_tokens = stats.total_tokens,
                    safe_limit = stats.safe_limit,
                    passages = stats.passages_kept(),
                    turns_dropped = stats.turns_dropped(),
                    "Reply complete"
                );
                return Ok(full_text);
            }
            StreamEvent::Error { message } => {
                writeln!(stdout)?;
                return Err(format!("Generation failed: {message}").into());
            }
        }
    }

    Err("Reply stream ended unexpectedly".into())
}
