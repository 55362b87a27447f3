use std::path::PathBuf;

use clap::Parser;

pub const OPTIONS_FILE: &str = "options.json";
pub const LIBRARY_FILE: &str = "library.json";

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, env, default_value_t = String::from("127.0.0.1"))]
    pub host: String,
    #[clap(short, long, env, default_value_t = 7205)]
    pub port: u16,

    #[clap(long, env, default_value_t = String::from("production"))]
    pub env: String,

    /// Where settings, the conversion log and the media library are kept.
    #[clap(long, env, default_value = "data")]
    pub data_dir: PathBuf,

    #[clap(long, env, default_value = "uploads")]
    pub uploads_dir: PathBuf,
    /// Public URL that the uploads directory is served from.
    #[clap(long, env, default_value_t = String::from("http://localhost:7205/uploads"))]
    pub uploads_url: String,

    /// API key with the manage_options and upload_files capabilities.
    #[clap(long, env)]
    pub admin_key: Option<String>,
    /// API key with only the upload_files capability.
    #[clap(long, env)]
    pub upload_key: Option<String>,
    /// Secret that admin nonces are derived from.
    #[clap(long, env)]
    pub nonce_secret: String,

    /// How many times to try deleting a replaced original.
    #[clap(long, env, default_value_t = 5)]
    pub delete_attempts: u32,
    #[clap(long, env, default_value_t = 1000)]
    pub delete_backoff_ms: u64,

    #[clap(long, env, default_value_t = 64)]
    pub max_upload_mb: usize,
}

impl Config {
    pub fn production(&self) -> bool {
        self.env != "development" && !cfg!(debug_assertions)
    }

    pub fn options_path(&self) -> PathBuf {
        self.data_dir.join(OPTIONS_FILE)
    }

    pub fn library_path(&self) -> PathBuf {
        self.data_dir.join(LIBRARY_FILE)
    }
}
