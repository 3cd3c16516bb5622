//! `kbask ask`: run one ask without the HTTP server and stream the answer
//! to stdout.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;

use kb_domain::config::Config;
use kb_domain::conversation::ConversationId;

use crate::bootstrap;
use crate::runtime::{self, AskOptions};

pub struct AskArgs {
    pub input: Option<String>,
    pub user: Option<String>,
    pub conversation: Option<String>,
    pub model: Option<String>,
    pub no_cache: bool,
}

/// Returns `false` when the ask failed mid-stream.
pub async fn run(config: Arc<Config>, args: AskArgs) -> anyhow::Result<bool> {
    let conversation_id = args
        .conversation
        .as_deref()
        .map(str::parse::<ConversationId>)
        .transpose()
        .context("--conversation")?;

    let state = bootstrap::build_app_state(config).await?;
    let opts = AskOptions {
        user: args.user,
        conversation_id,
        model: args.model,
        no_cache: args.no_cache,
    };
    let mut stream = runtime::ask_question(&state, args.input, opts).await?;

    let mut stdout = std::io::stdout();
    let mut ok = true;
    while let Some(chunk) = stream.chunks.recv().await {
        match chunk {
            Ok(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush().ok();
            }
            Err(e) => {
                eprintln!("\nerror: {e}");
                ok = false;
            }
        }
    }
    println!();
    Ok(ok)
}
