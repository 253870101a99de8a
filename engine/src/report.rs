//! Console reporting sink
//!
//! Prints sections and checks to stdout as readable text or as one JSON
//! object per line, and mirrors warnings and errors into `tracing`.

use sdk::report::{Check, Reporter, Section};
use serde_json::json;
use tracing::{debug, error, warn};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON lines for machine consumption
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    format: OutputFormat,
}

impl ConsoleReporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl Reporter for ConsoleReporter {
    fn add_section(&self, name: &str) -> Box<dyn Section> {
        if self.format == OutputFormat::Text {
            println!();
            println!("{}", name);
        }
        Box::new(ConsoleSection {
            name: name.to_string(),
            format: self.format,
        })
    }
}

struct ConsoleSection {
    name: String,
    format: OutputFormat,
}

impl Section for ConsoleSection {
    fn add_check(&self, name: &str) -> Box<dyn Check> {
        Box::new(ConsoleCheck {
            section: self.name.clone(),
            name: name.to_string(),
            format: self.format,
        })
    }
}

struct ConsoleCheck {
    section: String,
    name: String,
    format: OutputFormat,
}

impl ConsoleCheck {
    fn emit(&self, status: &str, symbol: &str, message: &str) {
        match self.format {
            OutputFormat::Text => println!("  {} {}: {}", symbol, self.name, message),
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "section": self.section,
                    "check": self.name,
                    "status": status,
                    "message": message,
                })
            ),
        }
    }
}

impl Check for ConsoleCheck {
    fn update_status(&self, message: &str) {
        debug!("[{}] {}: {}", self.section, self.name, message);
    }

    fn success(&self, message: &str) {
        debug!("[{}] {} ok: {}", self.section, self.name, message);
        self.emit("success", "✓", message);
    }

    fn warning(&self, message: &str) {
        warn!("[{}] {}: {}", self.section, self.name, message);
        self.emit("warning", "!", message);
    }

    fn error(&self, message: &str) {
        error!("[{}] {}: {}", self.section, self.name, message);
        self.emit("error", "✗", message);
    }
}
