//! Interactive command loop: rule management, start/stop and writer settings.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use anyhow::Result;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use lib_stream::core::counter::DEFAULT_REFRESH;
use lib_stream::core::{Dispatcher, EventCounter};
use lib_stream::ingestors::StreamController;
use lib_stream::retrieve::{ApiResponse, RulesClient, RulesResponse};
use lib_stream::storage::{RotatingFileWriter, DEFAULT_MAX_FILE_SIZE};

pub const COUNTER_SUBSCRIBER: &str = "counter";
pub const WRITER_SUBSCRIBER: &str = "save_to_file";

const COMMANDS: &[&str] = &[
    "callbacks", "create", "delete", "exit", "help", "list", "refresh", "save_to", "size",
    "start", "status", "stop",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help(Option<String>),
    List,
    Create { tag: String, query: String },
    Delete(Vec<String>),
    Start,
    Stop,
    SaveTo(PathBuf),
    Size(Option<u64>),
    Refresh(Option<u64>),
    Callbacks,
    Status,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command '{0}'. Type help for the list of commands.")]
    Unknown(String),

    #[error("Missing argument. Format: {0}")]
    MissingArgument(&'static str),

    #[error("Cannot parse {0} into an integer number.")]
    NotANumber(String),
}

/// Whether the loop keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Turns one input line into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (line, ""),
    };

    let command = match name {
        "" => Command::Empty,
        "help" | "?" => Command::Help((!args.is_empty()).then(|| args.to_string())),
        "list" => Command::List,
        "create" => {
            let Some((tag, query)) = args.split_once(char::is_whitespace) else {
                return Err(ParseError::MissingArgument("create <tag> <query>"));
            };
            let query = query.trim();
            if query.is_empty() {
                return Err(ParseError::MissingArgument("create <tag> <query>"));
            }
            Command::Create {
                tag: tag.to_string(),
                query: query.to_string(),
            }
        }
        "delete" => {
            let ids: Vec<String> = args.split_whitespace().map(str::to_string).collect();
            if ids.is_empty() {
                return Err(ParseError::MissingArgument("delete <id> [<id>...]"));
            }
            Command::Delete(ids)
        }
        "start" => Command::Start,
        "stop" => Command::Stop,
        "save_to" => {
            if args.is_empty() {
                return Err(ParseError::MissingArgument("save_to <path>"));
            }
            Command::SaveTo(PathBuf::from(args))
        }
        "size" => Command::Size(parse_number(args)?),
        "refresh" => Command::Refresh(parse_number(args)?),
        "callbacks" => Command::Callbacks,
        "status" => Command::Status,
        "exit" | "quit" | "EOF" => Command::Exit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(command)
}

fn parse_number(args: &str) -> Result<Option<u64>, ParseError> {
    if args.is_empty() {
        return Ok(None);
    }
    args.parse()
        .map(Some)
        .map_err(|_| ParseError::NotANumber(args.to_string()))
}

/// Prompt text for the given state.
pub fn render_prompt(collecting: bool, count: u64, save_path: &Path) -> String {
    format!(
        "[{} ({} since last start), save path \"{}\"]> ",
        if collecting { "collecting" } else { "not collecting" },
        count,
        save_path.display()
    )
}

pub struct Shell {
    controller: Arc<StreamController>,
    writer: Arc<RotatingFileWriter>,
    counter: Arc<EventCounter>,
    rules: RulesClient,
}

impl Shell {
    /// Wires the counter and the writer into the controller's dispatcher.
    pub fn new(
        controller: Arc<StreamController>,
        writer: Arc<RotatingFileWriter>,
        rules: RulesClient,
        refresh: u64,
    ) -> Result<Self> {
        let weak_controller: Weak<StreamController> = Arc::downgrade(&controller);
        let weak_writer: Weak<RotatingFileWriter> = Arc::downgrade(&writer);
        let counter = Arc::new(EventCounter::new(refresh, move |count| {
            let collecting = weak_controller.upgrade().is_some_and(|c| c.is_running());
            let Some(writer) = weak_writer.upgrade() else {
                return;
            };
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "\n{}", render_prompt(collecting, count, &writer.save_path()));
            let _ = stdout.flush();
        })?);

        let dispatcher: &Arc<Dispatcher> = controller.dispatcher();
        let c = Arc::clone(&counter);
        dispatcher.register(COUNTER_SUBSCRIBER, move |event| {
            c.on_event(event);
            Ok(())
        });
        dispatcher.register_arc(WRITER_SUBSCRIBER, writer.subscriber());

        Ok(Self {
            controller,
            writer,
            counter,
            rules,
        })
    }

    pub fn prompt(&self) -> String {
        render_prompt(
            self.controller.is_running(),
            self.counter.count(),
            &self.writer.save_path(),
        )
    }

    /// Prints the banner, then reads commands from `input` until `exit` or EOF.
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "stream_collect {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(stdout)?;
        writeln!(stdout, "Available commands (type help <command> for details):")?;
        writeln!(stdout, "{}", COMMANDS.join(", "))?;
        writeln!(stdout)?;
        self.execute(Command::List, &mut stdout).await?;
        writeln!(stdout)?;

        let mut lines = input.lines();
        loop {
            write!(stdout, "{}", self.prompt())?;
            stdout.flush()?;

            let Some(line) = lines.next_line().await? else {
                writeln!(stdout)?;
                break;
            };
            let flow = match parse_command(&line) {
                Ok(command) => self.execute(command, &mut stdout).await?,
                Err(e) => {
                    writeln!(stdout, "{}", e)?;
                    Flow::Continue
                }
            };
            if flow == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Runs one command, writing its output to `out`.
    pub async fn execute<W: Write>(&self, command: Command, out: &mut W) -> Result<Flow> {
        match command {
            Command::Empty => {}
            Command::Help(topic) => write_help(out, topic.as_deref())?,
            Command::List => self.list_rules(out).await?,
            Command::Create { tag, query } => {
                writeln!(
                    out,
                    "Events matching the query \"{}\" will be saved in {}",
                    query,
                    self.writer.save_path().join(format!("{tag}_<n>.json")).display()
                )?;
                match self.rules.add_rule(&query, &tag).await {
                    Ok(response) => match response_rules(&response) {
                        Ok(rules) => {
                            for rule in rules {
                                writeln!(out, "ID={}", rule.id.as_deref().unwrap_or("?"))?;
                            }
                        }
                        Err(message) => writeln!(out, "Error: {}", message)?,
                    },
                    Err(e) => writeln!(out, "Error: {}", e)?,
                }
            }
            Command::Delete(ids) => match self.rules.delete_rules(&ids).await {
                Ok(response) => {
                    if let Err(message) = response_rules(&response) {
                        writeln!(out, "Error: {}", message)?;
                    }
                }
                Err(e) => writeln!(out, "Error: {}", e)?,
            },
            Command::Start => {
                self.counter.reset();
                if self.controller.start().await {
                    writeln!(out, "Started collecting.")?;
                } else {
                    writeln!(out, "Already collecting, counter reset.")?;
                }
            }
            Command::Stop => {
                if self.controller.stop().await {
                    writeln!(out, "Stopped collecting.")?;
                }
            }
            Command::SaveTo(path) => match self.writer.set_save_path(&path) {
                Ok(true) => writeln!(out, "Saving to {}", path.display())?,
                Ok(false) => {}
                Err(e) => writeln!(out, "Error: {}", e)?,
            },
            Command::Size(value) => {
                if let Some(bytes) = value {
                    if let Err(e) = self.writer.set_max_file_size(bytes) {
                        writeln!(out, "{}", e)?;
                    }
                }
                writeln!(out, "Maximum file size is set to {}.", self.writer.max_file_size())?;
            }
            Command::Refresh(value) => {
                if let Some(every) = value {
                    if let Err(e) = self.counter.set_refresh_every(every) {
                        writeln!(out, "{}", e)?;
                    }
                }
                writeln!(
                    out,
                    "Automatically refreshing prompt every {} collected events.",
                    self.counter.refresh_every()
                )?;
            }
            Command::Callbacks => {
                writeln!(out, "Registered callbacks:")?;
                for name in self.controller.dispatcher().names() {
                    writeln!(out, "\t{}", name)?;
                }
            }
            Command::Status => {
                let metrics = self.controller.metrics();
                writeln!(
                    out,
                    "{}",
                    if self.controller.is_running() { "collecting" } else { "not collecting" }
                )?;
                writeln!(
                    out,
                    "sessions={} reconnections={} failures={} resets={}",
                    metrics.sessions,
                    metrics.reconnections,
                    metrics.failures,
                    metrics.connection_resets
                )?;
                writeln!(
                    out,
                    "lines={} events={} heartbeats={} malformed={} callback_failures={}",
                    metrics.lines_read,
                    metrics.events_dispatched,
                    metrics.heartbeats,
                    metrics.malformed_lines,
                    metrics.callback_failures
                )?;
                for (tag, path) in self.writer.open_files() {
                    writeln!(out, "\t{}\t{}", tag, path.display())?;
                }
            }
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    async fn list_rules<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "Registered queries:")?;
        let response = match self.rules.get_rules().await {
            Ok(response) => response,
            Err(e) => {
                writeln!(out, "Error: {}", e)?;
                return Ok(());
            }
        };
        let rules = match response_rules(&response) {
            Ok(rules) => rules,
            Err(message) => {
                writeln!(out, "Error: {}", message)?;
                return Ok(());
            }
        };

        if rules.is_empty() {
            writeln!(out, "\tno registered queries")?;
        }
        for rule in rules {
            writeln!(
                out,
                "\tID={}\tquery=\"{}\"\ttag=\"{}\"",
                rule.id.as_deref().unwrap_or("?"),
                rule.value,
                rule.tag.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }

    /// Stops collection and closes every output file.
    pub async fn shutdown(&self) {
        if self.controller.stop().await {
            log::info!("Collection stopped on exit.");
        }
        self.writer.close_all();
    }
}

/// Rules from a successful answer, or the message to show the operator.
fn response_rules(
    response: &ApiResponse<RulesResponse>,
) -> std::result::Result<&[lib_stream::retrieve::Rule], String> {
    if !response.success {
        return Err(format!(
            "status {}: {}",
            response.status,
            response.error_body.as_deref().unwrap_or("")
        ));
    }
    let Some(body) = response.data.as_ref() else {
        return Ok(&[]);
    };
    if let Some(first) = body.errors.as_ref().and_then(|errors| errors.first()) {
        let message = first
            .get("message")
            .or_else(|| first.get("title"))
            .and_then(|m| m.as_str())
            .unwrap_or("request rejected");
        return Err(message.to_string());
    }
    Ok(body.rules())
}

fn write_help<W: Write>(out: &mut W, topic: Option<&str>) -> std::io::Result<()> {
    let text = match topic {
        None => {
            writeln!(out, "Available commands (type help <command> for details):")?;
            return writeln!(out, "{}", COMMANDS.join(", "));
        }
        Some("list") => "Lists the rules, their ID and their tag, currently registered for the filtered stream.",
        Some("create") => "Creates a filtering rule associated to a tag.\nThe tag is the first argument and cannot contain spaces; the rest of the line is the query.\nMatching events are saved in <save_path>/<tag>_<n>.json.\nFormat:\n\t>create <tag> <query>",
        Some("delete") => "Deletes the filtering rules with the given IDs (see list).\nFormat:\n\t>delete <ID> [<ID>...]",
        Some("start") => "Starts collecting. Continues if already collecting (resets the counter).",
        Some("stop") => "Stops collecting. Nothing happens if not collecting.",
        Some("save_to") => "Sets the directory where the JSON files are written; it is created if missing.\nOpen files are closed.\nFormat:\n\t>save_to <path>",
        Some("size") => "Sets the maximum file size in bytes (at least 102400). A new file <tag>_<n+1>.json is started once the current one reaches it.\nFormat:\n\t>size <number>",
        Some("refresh") => "Sets how many collected events trigger a redraw of the prompt (at least 10).\nFormat:\n\t>refresh <number>",
        Some("callbacks") => "Lists the registered callbacks, in call order.",
        Some("status") => "Shows collection state, stream counters and open files.",
        Some("exit") | Some("quit") => "Stops collecting, closes the files and exits.",
        Some(other) => {
            return writeln!(out, "No help for '{}'.", other);
        }
    };
    writeln!(out, "{}", text)?;
    if topic == Some("size") {
        writeln!(out, "Default: {}", DEFAULT_MAX_FILE_SIZE)?;
    } else if topic == Some("refresh") {
        writeln!(out, "Default: {}", DEFAULT_REFRESH)?;
    }
    Ok(())
}
