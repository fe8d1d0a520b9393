//! # User interface for a unix terminal
//! Renders the roster panel above the latest log events in a consistent way.
//!
//! Log events arrive through [`tracing`]: on a terminal, [`init`] installs a [`ConsoleLayer`]
//! feeding the UI thread, elsewhere a plain `fmt` layer prints lines as they come.

use std::{
    collections::VecDeque,
    error::Error,
    fmt::{Debug, Display, Write as _},
    io::{self, IsTerminal, Write},
    sync::{
        mpsc::{self, Sender},
        OnceLock,
    },
    thread,
    time::SystemTime,
};
use terminal_size::{terminal_size, Height};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{
    fmt, layer::Context, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

struct Console {
    history_len: usize,
    event_log: VecDeque<(SystemTime, String)>,
}

impl Console {
    fn push_event(&mut self, description: String) {
        self.event_log.truncate(self.history_len - 1);
        self.event_log.push_front((SystemTime::now(), description));
    }

    fn new(history_len: usize) -> Self {
        Self {
            history_len,
            event_log: VecDeque::new(),
        }
    }

    fn render(&self, start_time: SystemTime, state: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();

        // Get terminal height
        let mut lines: Option<usize> = terminal_size().map(|(_, Height(h))| h.into());

        // Clear terminal and move cursor to top left
        stdout.write_all(b"\x1B[2J\x1B[H")?;

        if let Some(lines) = &mut lines {
            // Subtract from remaining terminal lines available
            let remaining = lines.saturating_sub(state.lines().count());
            if remaining > 0 {
                stdout.write_all(state.as_bytes())?;
                *lines = remaining;
            } else {
                writeln!(stdout, "Terminal height is too low! Can't show the group.")?;
                *lines = lines.saturating_sub(2); // Probably takes two lines due to small width
            }
            *lines = lines.saturating_sub(1);
        }

        // Print log (up to the remaining terminal lines, no more)
        let lines = lines.unwrap_or(usize::MAX);
        for (time, desc) in self.event_log.iter().take(lines).rev() {
            if let Ok(duration) = time.duration_since(start_time) {
                write!(stdout, "\x1B[90m{duration:<9.3?}:\x1B[0m ")?;
            }
            stdout.write_all(desc.as_bytes())?;
            stdout.write_all(b"\n")?;
        }

        stdout.flush()
    }
}

enum ConsoleUpdate {
    State(String),
    Log(String),
}

static CONSOLE: OnceLock<Sender<ConsoleUpdate>> = OnceLock::new();

fn spawn_console() -> Option<Sender<ConsoleUpdate>> {
    let start_time = SystemTime::now();
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("{}::console_ui_thread", module_path!()))
        .spawn(move || {
            let mut console = Console::new(1024);
            let mut state = String::new();
            while let Ok(update) = rx.recv() {
                match update {
                    ConsoleUpdate::State(s) => state = s,
                    ConsoleUpdate::Log(description) => console.push_event(description),
                }
                if let Err(e) = console.render(start_time, &state) {
                    eprintln!("Can't render UI to console!\n{e}");
                    break;
                }
            }
        });
    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            eprintln!("Can't spawn UI thread, falling back to plain output\n{e}");
            None
        }
    }
}

#[must_use]
pub fn is_terminal() -> bool {
    io::stdout().is_terminal()
}

/// Replaces the panel shown above the log. Does nothing unless the terminal UI runs.
pub fn update_state(state: String) {
    if let Some(console) = CONSOLE.get() {
        // A closed UI thread already reported why
        let _ = console.send(ConsoleUpdate::State(state));
    }
}

fn log_string(event: &str, style: &str) {
    if let Some(console) = CONSOLE.get() {
        for line in event.split('\n') {
            let _ = console.send(ConsoleUpdate::Log(format!("\x1B{style}{line}\x1B[0m")));
        }
    }
}

/// Installs the global [`tracing`] subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match is_terminal().then(spawn_console).flatten() {
        Some(tx) => {
            let _ = CONSOLE.set(tx);
            registry.with(ConsoleLayer).init();
        }
        None => registry.with(fmt::layer()).init(),
    }
}

/// Forwards [`tracing`] events to the terminal UI event log
pub struct ConsoleLayer;

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let style = match *event.metadata().level() {
            Level::ERROR => "[31m",
            Level::WARN => "[33m",
            Level::INFO => "[0m",
            Level::DEBUG | Level::TRACE => "[90m",
        };
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        log_string(&visitor.message, style);
    }
}

/// Collects the message of an event, followed by its other fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            let fields = std::mem::take(&mut self.message);
            self.message = format!("{value:?}{fields}");
        } else {
            let _ = write!(self.message, " {}={value:?}", field.name());
        }
    }
}

/// Displays an error followed by its chain of sources
pub struct Report<'a>(pub &'a (dyn Error + 'static));

impl Display for Report<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut error = self.0;
        while let Some(source) = error.source() {
            write!(f, "\nCaused by: {source}")?;
            error = source;
        }
        Ok(())
    }
}
