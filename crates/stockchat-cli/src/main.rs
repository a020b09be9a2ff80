use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use stockchat_contracts::agent_schema::{supports_image_input, AgentSchema};
use stockchat_contracts::capabilities::{PORTFOLIO, STOCK_PRICE};
use stockchat_contracts::chat::{parse_input, ChatInput, CHAT_HELP_COMMANDS};
use stockchat_contracts::conversation::{ContentPart, ConversationState, Message};
use stockchat_contracts::dispatch::DispatchResult;
use stockchat_contracts::events::EventLog;
use stockchat_contracts::ui::UiEvent;
use stockchat_engine::{
    fetch_agent_schema, prepare_image, AlphaVantageQuotes, CompletionService, Dispatcher,
    DryrunCompletion, EngineConfig, EnvSource, OpenAiChatCompletions, ProcessedImage,
    QuoteSource, StaticQuotes,
};

#[derive(Debug, Parser)]
#[command(name = "stockchat", version, about = "Stockbroker agent chat and dispatch CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Ask(AskArgs),
    PrepareImage(PrepareImageArgs),
    SchemaCheck(SchemaCheckArgs),
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Chat model used for intent resolution.
    #[arg(long)]
    model: Option<String>,
    /// JSONL diagnostics file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Resolve intent offline with the keyword resolver.
    #[arg(long)]
    dryrun: bool,
    /// Ticker-to-price JSON file used instead of the live quote service.
    #[arg(long)]
    quotes: Option<PathBuf>,
    #[arg(long)]
    env_file: Option<PathBuf>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Args)]
struct SchemaArgs {
    /// Local JSON file holding the agent's `input_schema`/`output_schema`.
    #[arg(long)]
    agent_schema: Option<PathBuf>,
    /// LangGraph server to query for the assistant's schemas.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long, default_value = "agent")]
    assistant_id: String,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(flatten)]
    schema: SchemaArgs,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct PrepareImageArgs {
    path: PathBuf,
}

#[derive(Debug, Parser)]
struct SchemaCheckArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stockchat error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args),
        Command::PrepareImage(args) => run_prepare_image(args),
        Command::SchemaCheck(args) => run_schema_check(args),
    }
}

fn env_source(env_file: Option<&Path>) -> EnvSource {
    match env_file {
        Some(path) => EnvSource::with_dotenv(path),
        None => EnvSource::process(),
    }
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_source(&env_source(args.env_file.as_deref()));
    if let Some(model) = args.model.as_deref().map(str::trim) {
        if !model.is_empty() {
            config.model = model.to_string();
        }
    }
    if let Some(secs) = args.timeout_secs.filter(|secs| *secs > 0) {
        config.request_timeout = Duration::from_secs(secs);
    }
    config
}

fn event_log(path: Option<&Path>) -> EventLog {
    let thread_id = uuid::Uuid::new_v4().to_string();
    match path {
        Some(path) => EventLog::new(path, thread_id),
        None => EventLog::disabled(thread_id),
    }
}

fn build_dispatcher(args: &EngineArgs, config: &EngineConfig, events: &EventLog) -> Result<Dispatcher> {
    let completion: Box<dyn CompletionService> = if args.dryrun {
        Box::new(DryrunCompletion)
    } else {
        Box::new(OpenAiChatCompletions::new(config)?)
    };
    let quotes: Box<dyn QuoteSource> = match args.quotes.as_deref() {
        Some(path) => Box::new(StaticQuotes::from_json_file(path)?),
        None => Box::new(AlphaVantageQuotes::new(config)?),
    };
    Ok(Dispatcher::new(completion, quotes, events.clone()))
}

fn load_agent_schema(
    args: &SchemaArgs,
    config: &EngineConfig,
    events: &EventLog,
) -> Result<Option<AgentSchema>> {
    if let Some(path) = args.agent_schema.as_deref() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        return Ok(AgentSchema::from_value(&value));
    }
    let Some(api_url) = args.api_url.as_deref() else {
        return Ok(None);
    };
    Ok(fetch_agent_schema(
        api_url,
        config.langgraph_api_key.as_deref(),
        &args.assistant_id,
        config.request_timeout,
        events,
    ))
}

fn user_message(text: &str, image: Option<&ProcessedImage>) -> Message {
    match image {
        Some(image) => Message::user_parts(vec![ContentPart::text(text), image.content_part()]),
        None => Message::user(text),
    }
}

fn render_ui_event(event: &UiEvent) -> String {
    match event.name.as_str() {
        STOCK_PRICE => event
            .props
            .get("instruction")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "Stock price: (no data)".to_string()),
        PORTFOLIO => "Portfolio: [portfolio view]".to_string(),
        other => format!("{other}: {}", Value::Object(event.props.clone())),
    }
}

/// Lines shown for one finished turn: assistant text first, then one line
/// per UI event in publish order.
fn render_result(result: &DispatchResult) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(message) = result.assistant_message() {
        let text = message.content_string();
        if !text.trim().is_empty() {
            lines.push(text.trim().to_string());
        }
    }
    lines.extend(result.ui.events().iter().map(render_ui_event));
    lines
}

fn describe_image(image: &ProcessedImage) -> String {
    format!(
        "{} ({}x{}, {})",
        image.original_name, image.width, image.height, image.mime_type
    )
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events = event_log(args.engine.events.as_deref());
    let mut config = engine_config(&args.engine);
    let mut dispatcher = build_dispatcher(&args.engine, &config, &events)?;
    let schema = load_agent_schema(&args.schema, &config, &events)?;
    let image_support = supports_image_input(schema.as_ref());

    let stdin = io::stdin();
    let mut line = String::new();
    let mut state = ConversationState::default();
    let mut pending_image: Option<ProcessedImage> = None;

    println!("Stockchat started. Type /help for commands.");
    if !image_support {
        println!("Image input is disabled: the agent does not accept images.");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_input(line.trim_end_matches(['\n', '\r'])) {
            ChatInput::Noop => continue,
            ChatInput::Help => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            ChatInput::AttachImage(path) => {
                if path.is_empty() {
                    println!("/image requires a path");
                    continue;
                }
                if !image_support {
                    println!("This agent does not accept image input.");
                    continue;
                }
                match prepare_image(Path::new(&path)) {
                    Ok(image) => {
                        println!("Attached {}", describe_image(&image));
                        pending_image = Some(image);
                    }
                    Err(err) => println!("Image upload failed: {err:#}"),
                }
            }
            ChatInput::ClearImage => {
                pending_image = None;
                println!("Attachment cleared.");
            }
            ChatInput::SetModel(None) => {
                println!("Model: {}", config.model);
            }
            ChatInput::SetModel(Some(model)) => {
                config.model = model;
                dispatcher = build_dispatcher(&args.engine, &config, &events)?;
                println!("Model set to {}", config.model);
            }
            ChatInput::Reset => {
                state.clear();
                pending_image = None;
                println!("Conversation reset.");
            }
            ChatInput::Quit => break,
            ChatInput::Unknown { command, .. } => {
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            ChatInput::Message(text) => {
                state.push(user_message(&text, pending_image.take().as_ref()));
                match dispatcher.dispatch(&state) {
                    Ok(result) => {
                        for rendered in render_result(&result) {
                            println!("{rendered}");
                        }
                        state.apply(result);
                    }
                    Err(err) => {
                        state.messages.pop();
                        println!("Dispatch failed: {err:#}");
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_ask(args: AskArgs) -> Result<i32> {
    if args.prompt.trim().is_empty() {
        bail!("--prompt must not be empty");
    }
    let events = event_log(args.engine.events.as_deref());
    let config = engine_config(&args.engine);
    let dispatcher = build_dispatcher(&args.engine, &config, &events)?;
    let image = args
        .image
        .as_deref()
        .map(prepare_image)
        .transpose()?;

    let state = ConversationState::new(vec![user_message(args.prompt.trim(), image.as_ref())]);
    let result = dispatcher.dispatch(&state)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(0)
}

fn prepared_image_json(image: &ProcessedImage) -> Value {
    json!({
        "original_name": image.original_name,
        "mime_type": image.mime_type,
        "width": image.width,
        "height": image.height,
        "base64": image.base64,
    })
}

fn run_prepare_image(args: PrepareImageArgs) -> Result<i32> {
    let image = prepare_image(&args.path)?;
    println!("{}", serde_json::to_string_pretty(&prepared_image_json(&image))?);
    Ok(0)
}

fn run_schema_check(args: SchemaCheckArgs) -> Result<i32> {
    if args.schema.agent_schema.is_none() && args.schema.api_url.is_none() {
        bail!("schema-check needs --agent-schema or --api-url");
    }
    let config = EngineConfig::from_source(&env_source(args.env_file.as_deref()));
    let events = EventLog::disabled("schema-check");
    let schema = load_agent_schema(&args.schema, &config, &events)?;
    let report = json!({
        "assistant_id": args.schema.assistant_id,
        "schema_found": schema.is_some(),
        "supports_image_input": supports_image_input(schema.as_ref()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if schema.is_some() { 0 } else { 2 })
}
