use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use tracing::warn;

/// Acknowledges a pending safety check before a computer call's result is returned.
/// Returning `false` aborts the run.
#[async_trait]
pub trait SafetyGate: Send + Sync {
    async fn acknowledge(&self, message: &str) -> bool;
}

#[async_trait]
impl<F> SafetyGate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn acknowledge(&self, message: &str) -> bool {
        self(message)
    }
}

/// Declines every check.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl SafetyGate for DenyAll {
    async fn acknowledge(&self, _message: &str) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AcknowledgeAll;

#[async_trait]
impl SafetyGate for AcknowledgeAll {
    async fn acknowledge(&self, _message: &str) -> bool {
        true
    }
}

/// Asks the operator on the terminal; only an explicit `y` acknowledges.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinSafetyGate;

#[async_trait]
impl SafetyGate for StdinSafetyGate {
    async fn acknowledge(&self, message: &str) -> bool {
        let message = message.to_string();
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stdout = io::stdout();
            write!(
                stdout,
                "Safety Check Warning: {message}\nDo you want to acknowledge and proceed? (y/n): "
            )?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to read safety acknowledgment");
                false
            }
            Err(e) => {
                warn!(error = %e, "safety prompt task failed");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}
