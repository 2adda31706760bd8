//! `ragdesk ask` — Send a single question through the orchestrator.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use ragdesk_agent::citations::partition_by_domain;
use ragdesk_agent::{ChatRequest, ChatResponse, Orchestrator, StreamEvent};
use ragdesk_config::AppConfig;
use ragdesk_core::event::EventBus;
use ragdesk_memory::{SessionStore, TracingTurnLog};

pub struct AskArgs {
    pub message: String,
    pub user: String,
    pub session: Option<String>,
    pub stream: bool,
    pub image: Option<String>,
}

fn build_orchestrator(config: &AppConfig) -> Arc<Orchestrator> {
    let sessions = Arc::new(SessionStore::with_limits(
        config.session.ttl_secs,
        config.session.max_turns,
    ));
    Arc::new(Orchestrator::new(
        config,
        ragdesk_providers::factory::build_generator(config),
        ragdesk_providers::factory::build_retriever(config),
        sessions,
        Arc::new(TracingTurnLog),
        Arc::new(EventBus::default()),
    ))
}

pub async fn run(config_path: Option<&Path>, args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    if config.generation.api_key.is_none() && config.generation.api_url.is_none() {
        eprintln!("No generation backend configured.");
        eprintln!("   Set RAGDESK_GENERATION_API_KEY (or OPENAI_API_KEY), or generation.api_url in the config file.");
        return Err("generation backend not configured".into());
    }

    let orchestrator = build_orchestrator(&config);
    let mut request = ChatRequest::new(args.user, args.message);
    request.session_id = args.session;
    request.image_context = args.image;

    let response = if args.stream {
        stream_answer(&orchestrator, request).await?
    } else {
        let response = orchestrator.handle(request).await?;
        if response.error {
            return Err(response.response.into());
        }
        println!("{}", response.response);
        response
    };

    print_footer(&response);
    Ok(())
}

async fn stream_answer(
    orchestrator: &Arc<Orchestrator>,
    request: ChatRequest,
) -> Result<ChatResponse, Box<dyn std::error::Error>> {
    let mut events = orchestrator.handle_stream(request)?;
    let mut stdout = std::io::stdout();
    let mut streamed = String::new();

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Content(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
                streamed.push_str(&text);
            }
            StreamEvent::Done(response) => {
                writeln!(stdout)?;
                // Final text drops failed sections and renumbers citations
                if response.response != streamed {
                    writeln!(stdout, "\n---\n{}", response.response)?;
                }
                return Ok(response);
            }
            StreamEvent::Error(message) => {
                writeln!(stdout)?;
                return Err(message.into());
            }
        }
    }
    Err("stream ended without a final response".into())
}

/// Source lines for the footer, grouped per domain when several answered.
fn source_lines(response: &ChatResponse) -> Vec<String> {
    let line = |c: &ragdesk_core::citation::Citation| format!("   [{}] {} ({})", c.id, c.title, c.source);
    if response.domains.len() <= 1 {
        return response.citations.iter().map(line).collect();
    }

    let mut lines = Vec::new();
    for (domain, citations) in partition_by_domain(&response.citations, &response.domains) {
        if citations.is_empty() {
            continue;
        }
        lines.push(format!("  {domain}:"));
        lines.extend(citations.into_iter().map(line));
    }
    lines
}

fn print_footer(response: &ChatResponse) {
    if !response.citations.is_empty() {
        println!();
        println!("Sources:");
        for line in source_lines(response) {
            println!("{line}");
        }
    }

    if let Some(questions) = &response.follow_up_questions {
        println!();
        println!("You could also ask:");
        for q in questions {
            println!("   - {q}");
        }
    }

    println!();
    let domains: Vec<&str> = response.domains.iter().map(|d| d.as_str()).collect();
    println!("   Domains: {}", domains.join(", "));
    println!("   Session: {}", response.session_id);
    if response.degraded {
        println!("   Note: some specialists were unavailable for this answer");
    }
}
