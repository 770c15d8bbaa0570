//! Interface de linha de comando do shrinkray baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (audio, video, cut,
//! formats) e flags globais (--config, --job-id, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// shrinkray: baixa mídia e a reduz até caber no tamanho pedido.
#[derive(Debug, Parser)]
#[command(name = "shrinkray", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./shrinkray.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Identificador do job; gerado automaticamente se omitido.
    #[arg(long, global = true)]
    pub job_id: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Baixa a mídia e extrai o áudio, opcionalmente limitado em tamanho.
    Audio {
        /// URL da mídia.
        url: String,

        /// Formato de saída (veja `shrinkray formats`).
        #[arg(long, short, default_value = "ogg")]
        format: String,

        /// Tamanho máximo do arquivo final em MB.
        #[arg(long)]
        max_size_mb: Option<f64>,

        /// Bitrate da primeira tentativa em kbps.
        #[arg(long)]
        initial_kbps: Option<u32>,

        /// Bitrate mínimo aceito em kbps.
        #[arg(long)]
        min_kbps: Option<u32>,

        /// Desabilita VBR para Opus.
        #[arg(long, default_value_t = false)]
        no_vbr: bool,
    },

    /// Baixa o vídeo e, opcionalmente, converte para outro contêiner.
    Video {
        /// URL da mídia.
        url: String,

        /// Extensão do contêiner de saída (ex.: mp4).
        #[arg(long)]
        ext: Option<String>,
    },

    /// Corta um trecho de uma URL ou do artefato de um job anterior.
    Cut {
        /// URL da mídia ou id de um job concluído.
        source: String,

        /// Início do trecho (segundos ou HH:MM:SS[.fff]).
        #[arg(long)]
        start: String,

        /// Fim do trecho (segundos ou HH:MM:SS[.fff]).
        #[arg(long)]
        end: String,

        /// Apaga o arquivo original após o corte.
        #[arg(long, default_value_t = false)]
        delete_original: bool,
    },

    /// Lista os formatos de áudio suportados.
    Formats,
}
