//! Configuração do shrinkray carregada a partir de `shrinkray.toml`.
//!
//! A struct [`ShrinkrayConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `SHRINKRAY_NOTIFY_URL` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state_machine::RetryConfig;

/// Configuração de nível superior carregada de `shrinkray.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ShrinkrayConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// Política de retentativa usada apenas no corte de fragmentos.
    #[serde(default)]
    pub cut_retry: RetryConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Percentual publicado ao entrar na fase de compressão.
    #[serde(default = "default_compress_start_percent")]
    pub compress_start_percent: u8,

    /// URL que recebe o resultado final de cada job (POST JSON).
    #[serde(default)]
    pub notify_url: Option<String>,
}

/// Diretórios de trabalho.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Onde os downloads e artefatos finais são gravados.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Onde ficam os arquivos de progresso temporários de cada fase.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Executáveis externos invocados pelo runner.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp: String,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

/// Parâmetros da busca de bitrate.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_initial_kbps")]
    pub initial_kbps: u32,

    #[serde(default = "default_min_kbps")]
    pub min_kbps: u32,

    /// Fator multiplicativo aplicado ao bitrate a cada tentativa rejeitada.
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// Habilita `-vbr on` para Opus.
    #[serde(default = "default_use_vbr")]
    pub use_vbr: bool,
}

/// Configuração do monitor de progresso.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./convertorData")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./convertorData/logs")
}

fn default_yt_dlp() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

// 96k iniciais, piso de 32k, decaimento 0.85.
fn default_initial_kbps() -> u32 {
    96
}

fn default_min_kbps() -> u32 {
    32
}

fn default_decay() -> f64 {
    0.85
}

fn default_use_vbr() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_compress_start_percent() -> u8 {
    50
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: default_yt_dlp(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_kbps: default_initial_kbps(),
            min_kbps: default_min_kbps(),
            decay: default_decay(),
            use_vbr: default_use_vbr(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ShrinkrayConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            tools: ToolsConfig::default(),
            search: SearchConfig::default(),
            cut_retry: RetryConfig::default(),
            monitor: MonitorConfig::default(),
            compress_start_percent: default_compress_start_percent(),
            notify_url: None,
        }
    }
}

impl ShrinkrayConfig {
    /// Carrega a configuração de `shrinkray.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("shrinkray.toml"))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<ShrinkrayConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(url) = std::env::var("SHRINKRAY_NOTIFY_URL")
            && !url.is_empty()
        {
            config.notify_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.search.decay > 0.0 && self.search.decay < 1.0) {
            anyhow::bail!("search.decay must be in (0, 1), got {}", self.search.decay);
        }
        if self.compress_start_percent > 100 {
            anyhow::bail!(
                "compress_start_percent must be at most 100, got {}",
                self.compress_start_percent
            );
        }
        if self.monitor.poll_interval_ms == 0 {
            anyhow::bail!("monitor.poll_interval_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = ShrinkrayConfig::default();
        assert_eq!(config.search.initial_kbps, 96);
        assert_eq!(config.search.min_kbps, 32);
        assert_eq!(config.search.decay, 0.85);
        assert_eq!(config.cut_retry.max_retries, 3);
        assert_eq!(config.monitor.poll_interval_ms, 200);
        assert_eq!(config.compress_start_percent, 50);
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert!(config.notify_url.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            compress_start_percent = 40

            [search]
            min_kbps = 24

            [cut_retry]
            max_retries = 5
        "#;
        let config: ShrinkrayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.compress_start_percent, 40);
        assert_eq!(config.search.min_kbps, 24);
        assert_eq!(config.search.initial_kbps, 96);
        assert_eq!(config.cut_retry.max_retries, 5);
        assert_eq!(config.cut_retry.delay_ms, 2000);
        assert_eq!(config.paths.data_dir, PathBuf::from("./convertorData"));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShrinkrayConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.search.initial_kbps, 96);
    }

    #[test]
    fn load_rejects_invalid_decay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrinkray.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[search]\ndecay = 1.5").unwrap();

        let err = ShrinkrayConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("decay"));
    }
}
