use crate::llm::chat::{ChatTurn, RenderError, Renderer, Role};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// A shared "thinking" spinner. Output printed while it spins goes through
/// [`Spinner::suspend`] so the two never interleave.
#[derive(Clone, Default)]
pub struct Spinner {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl Spinner {
    pub fn start(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        match ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            Ok(style) => pb.set_style(style),
            Err(e) => log::debug!("Falling back to the default spinner style: {}", e),
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        *self.bar.lock() = Some(pb);
    }

    pub fn stop(&self) {
        if let Some(pb) = self.bar.lock().take() {
            pb.finish_and_clear();
        }
    }

    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.bar.lock().as_ref() {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }
}

/// Prints chat turns to stdout.
pub struct TerminalRenderer {
    spinner: Spinner,
}

impl TerminalRenderer {
    pub fn new(spinner: Spinner) -> Self {
        Self { spinner }
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, turn: &ChatTurn) -> Result<(), RenderError> {
        let line = match turn.role {
            // The REPL already echoed what the user typed.
            Role::User => return Ok(()),
            Role::Assistant => format!("🤖 {}", turn.text.truecolor(255, 236, 179)),
        };

        self.spinner
            .suspend(|| {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{}\n", line).and_then(|_| stdout.flush())
            })
            .map_err(|e| RenderError {
                role: turn.role,
                reason: e.to_string(),
            })
    }

    fn notice(&mut self, message: &str) {
        self.spinner.suspend(|| eprintln!("⚠️  {}\n", message.yellow()));
    }
}

/// Sends turns to the log only; used when the transcript is returned to the
/// caller some other way.
#[derive(Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&mut self, turn: &ChatTurn) -> Result<(), RenderError> {
        log::debug!("[{}] {}", turn.role, turn.text);
        Ok(())
    }

    fn notice(&mut self, message: &str) {
        log::info!("Notice: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspend_without_spinner_runs_closure() {
        let spinner = Spinner::default();
        assert_eq!(spinner.suspend(|| 7), 7);
    }

    #[test]
    fn spinner_can_restart_after_stop() {
        let spinner = Spinner::default();
        spinner.start("Thinking...");
        spinner.stop();
        spinner.start("Thinking again...");
        assert_eq!(spinner.suspend(|| "ok"), "ok");
        spinner.stop();
        spinner.stop();
    }

    #[test]
    fn log_renderer_never_fails() {
        let mut renderer = LogRenderer;
        let turn = ChatTurn::new(Role::Assistant, "Data stored in DB");
        assert!(renderer.render(&turn).is_ok());
        renderer.notice("heads up");
    }
}
