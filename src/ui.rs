//! Interface de terminal do shrinkray: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente um job
//! consultando o status publicado no store.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{JobState, JobStatus};

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe uma barra com o percentual e a fase atual, e mensagens coloridas
/// para sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    last_attempt: Option<u32>,
}

impl JobProgress {
    /// Inicia a barra para o job informado.
    pub fn start(job_id: &str, kind: &str) -> Self {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(format!("{kind} {job_id}: queued"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            last_attempt: None,
        }
    }

    /// Atualiza a barra a partir de um status consultado.
    ///
    /// Uma nova tentativa (compressão ou corte) é anunciada em amarelo acima da barra.
    pub fn update(&mut self, status: &JobStatus) {
        if let Some(attempt) = status.attempt
            && attempt > 1
            && self.last_attempt != Some(attempt)
        {
            self.pb.println(format!(
                "  {} {}",
                self.yellow.apply_to("↻"),
                describe(status)
            ));
        }
        self.last_attempt = status.attempt;
        self.pb.set_position(u64::from(status.percent));
        self.pb.set_message(describe(status));
    }

    /// Finaliza a barra e exibe o resultado final do job.
    pub fn complete(&self, status: &JobStatus) {
        self.pb.finish_and_clear();
        match (&status.state, &status.result, &status.error) {
            (JobState::Success, Some(artifact), _) => println!(
                "  {} {} ({:.2} MB)",
                self.green.apply_to("✓"),
                artifact.path.display(),
                artifact.size_mb
            ),
            (JobState::Failure, _, error) => println!(
                "  {} Job failed: {}",
                self.red.apply_to("✗"),
                error.as_deref().unwrap_or("unknown error")
            ),
            (state, _, _) => println!("  {} {state}", self.yellow.apply_to("?")),
        }
    }

    /// Imprime o status final em JSON com estilo colorido.
    pub fn print_status(&self, status: &JobStatus) {
        let style = match status.state {
            JobState::Success => &self.green,
            JobState::Failure => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", style.apply_to("─── Job Status ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(status).unwrap_or_default()
        );
    }
}

/// Texto curto da fase atual, como `compressing (attempt 2, 81 kbps)`.
fn describe(status: &JobStatus) -> String {
    let step = status.step.as_deref().unwrap_or("queued");
    match (status.attempt, status.bitrate_kbps) {
        (Some(attempt), Some(kbps)) => format!("{step} (attempt {attempt}, {kbps} kbps)"),
        (Some(attempt), None) => format!("{step} (attempt {attempt})"),
        _ => step.to_string(),
    }
}
