use clap::{Args, Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf};

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Orchestrates Exercism test runners")]
pub struct Opts {
    #[clap(subcommand)]
    pub cmd: SubCmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCmd {
    /// Serve the test runner API
    #[clap(name = "serve")]
    Serve(ServeSubCmd),

    /// Check a running instance: health check, then one test run
    #[clap(name = "smoke")]
    Smoke(SmokeSubCmd),
}

#[derive(Args, Debug, Clone)]
pub struct ServeSubCmd {
    /// Configuration file (TOML)
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration file
    #[clap(long)]
    pub bind: Option<SocketAddr>,

    /// Number of worker threads, overrides the configuration file
    #[clap(long)]
    pub workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct SmokeSubCmd {
    /// The orchestrator's base url
    #[clap(long, default_value = "http://localhost:5000")]
    pub host: String,

    /// Language of the test runner to start
    #[clap(long, default_value = "python")]
    pub language: String,

    /// Solution file to upload
    #[clap(long, default_value = "scripts/sample/hello_world.py")]
    pub code_file: PathBuf,

    /// Test configuration to upload
    #[clap(long, default_value = "scripts/sample/test_config.json")]
    pub test_config: PathBuf,
}
