use regex::Regex;
use std::sync::LazyLock;

/// What a single worker output line means to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// Worker is ready to trade.
    Ready,
    /// Worker could not start.
    Failed,
    Other,
}

/// Which output stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

macro_rules! re {
    ($pat:expr) => {
        LazyLock::new(|| Regex::new($pat).unwrap())
    };
}

// Explicit handshake: `@@worker ready` / `@@worker failed <reason>` on its own line.
static RE_SENTINEL: LazyLock<Regex> = re!(r"^\s*@@worker\s+(ready|failed)\b");
// Banner lines the trading worker prints on stdout once its wallet is loaded.
static RE_READY_BANNER: LazyLock<Regex> =
    re!(r"🚀 Starting Solana Trading Bot|💰 Wallet Address:");
static RE_FAILURE: LazyLock<Regex> = re!(r"❌|\bError\b|Error:");

/// Classify a line read from `stream`.
///
/// The sentinel is honoured on either stream. Banner matching is kept for
/// workers that predate the sentinel: ready banners count only on stdout,
/// failure banners only on stderr.
pub fn classify(stream: Stream, line: &str) -> WorkerSignal {
    if let Some(kind) = RE_SENTINEL.captures(line).and_then(|c| c.get(1)) {
        return match kind.as_str() {
            "ready" => WorkerSignal::Ready,
            _ => WorkerSignal::Failed,
        };
    }

    match stream {
        Stream::Stdout if RE_READY_BANNER.is_match(line) => WorkerSignal::Ready,
        Stream::Stderr if RE_FAILURE.is_match(line) => WorkerSignal::Failed,
        _ => WorkerSignal::Other,
    }
}
