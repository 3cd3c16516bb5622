pub mod ask;
pub mod config;

use clap::{Parser, Subcommand};

/// kbask: a streaming question-answering gateway over a knowledge base.
#[derive(Debug, Parser)]
#[command(name = "kbask", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Ask one question and stream the answer to stdout.
    Ask {
        /// The question. Defaults to the configured default question.
        input: Option<String>,
        /// Conversation owner.
        #[arg(long)]
        user: Option<String>,
        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,
        /// Model selector (see `GET /v1/models`).
        #[arg(long)]
        model: Option<String>,
        /// Skip the memory/cache write.
        #[arg(long)]
        no_cache: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `KB_CONFIG` (or `config.toml`).
/// A missing file yields the defaults. Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(kb_domain::config::Config, String)> {
    let config_path = std::env::var("KB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        kb_domain::config::Config::default()
    };

    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_parses() {
        let cli = Cli::try_parse_from(["kbask"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn ask_flags_parse() {
        let cli = Cli::try_parse_from([
            "kbask",
            "ask",
            "what is x?",
            "--user",
            "ada",
            "--conversation",
            "12",
            "--no-cache",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Ask { input, user, conversation, model, no_cache }) => {
                assert_eq!(input.as_deref(), Some("what is x?"));
                assert_eq!(user.as_deref(), Some("ada"));
                assert_eq!(conversation.as_deref(), Some("12"));
                assert!(model.is_none());
                assert!(no_cache);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
