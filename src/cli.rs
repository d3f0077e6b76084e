use crate::config::SyncOptions;
use clap::Parser;
use std::path::PathBuf;

/// Mirror a local asset tree into an S3-compatible bucket, uploading only
/// files whose content changed.
#[derive(Parser, Debug, Clone)]
#[clap(name = "assetsync", version, about)]
pub struct Cli {
    /// Local directory to sync
    #[clap(default_value = "coloring_pages")]
    pub root: PathBuf,

    /// JSON tuning file with `sync` and `log` sections
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Remote key prefix
    #[clap(long)]
    pub prefix: Option<String>,

    /// Maximum number of files processed at once
    #[clap(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Retries per remote request after the first failure
    #[clap(long)]
    pub retries: Option<u32>,

    /// Per-request timeout in seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Extensions to include, comma separated
    #[clap(long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Skip files larger than this many bytes (0 disables the limit)
    #[clap(long)]
    pub max_file_size: Option<u64>,

    /// Decide what would be uploaded without uploading
    #[clap(long)]
    pub dry_run: bool,

    /// Re-read the remote tag after each upload
    #[clap(long)]
    pub verify: bool,

    /// Exit 0 even when some files failed
    #[clap(long)]
    pub allow_failures: bool,

    /// Also write logs to this directory
    #[clap(long)]
    pub log_dir: Option<PathBuf>,

    /// Debug logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Print the run summary as JSON on stdout
    #[clap(long)]
    pub json: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    pub fn apply(&self, options: &mut SyncOptions) {
        if let Some(prefix) = &self.prefix {
            options.prefix = prefix.clone();
        }
        if let Some(concurrency) = self.concurrency {
            options.max_concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            options.max_retries = retries;
        }
        if let Some(timeout) = self.timeout {
            options.request_timeout_secs = timeout;
        }
        if let Some(max_file_size) = self.max_file_size {
            options.max_file_size = max_file_size;
        }
        if let Some(extensions) = &self.extensions {
            options.extensions = extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if self.verify {
            options.verify_uploads = true;
        }
    }
}
