use clap::Parser;
use snippet_exec::{Credential, InterpreterConfig, ResourceLimits, ServiceConfig};
use snippet_exec_server::{create_app, run_server};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, env = "EXEC_ADDR", default_value = "0.0.0.0:5000")]
    addr: SocketAddr,

    /// Shared secret callers send in the X-API-Key header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Interpreter binary
    #[arg(long, env = "EXEC_INTERPRETER", default_value = "php")]
    interpreter: String,

    /// Interpreter configuration file
    #[arg(long, env = "EXEC_PROFILE")]
    profile: Option<PathBuf>,

    /// Flag that passes the configuration file to the interpreter
    #[arg(long, env = "EXEC_PROFILE_FLAG", default_value = "-c", allow_hyphen_values = true)]
    profile_flag: String,

    /// Extension for staged snippet files
    #[arg(long, env = "EXEC_EXTENSION", default_value = "php")]
    extension: String,

    /// Execution deadline in seconds
    #[arg(short, long, env = "EXEC_TIMEOUT_SECS", default_value = "10")]
    timeout: u64,

    /// Time between SIGTERM and SIGKILL after the deadline, in milliseconds
    #[arg(long, env = "EXEC_KILL_GRACE_MS", default_value = "500")]
    kill_grace_ms: u64,

    /// Directory for staged snippets (defaults to the system temp dir)
    #[arg(long, env = "EXEC_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Maximum number of concurrent executions
    #[arg(short, long, env = "EXEC_MAX_CONCURRENT", default_value = "10")]
    max_concurrent: usize,

    /// CPU time limit in seconds
    #[arg(long, env = "EXEC_CPU_TIME_LIMIT", default_value = "30")]
    cpu_time_limit: u64,

    /// File size limit in bytes
    #[arg(long, env = "EXEC_FILE_SIZE_LIMIT", default_value = "10485760")] // 10MB
    file_size_limit: u64,

    /// Bytes of stdout and of stderr kept per execution
    #[arg(long, env = "EXEC_OUTPUT_LIMIT", default_value = "1048576")] // 1MB
    output_limit: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ServiceConfig::new(Credential::new(args.api_key))
        .with_interpreter(InterpreterConfig {
            program: args.interpreter,
            profile: args.profile,
            profile_flag: args.profile_flag,
            extension: args.extension,
        })
        .with_timeout(Duration::from_secs(args.timeout))
        .with_kill_grace(Duration::from_millis(args.kill_grace_ms))
        .with_max_concurrent(args.max_concurrent)
        .with_limits(ResourceLimits {
            cpu_time: args.cpu_time_limit,
            file_size: args.file_size_limit,
            output_limit: args.output_limit,
        });
    if let Some(scratch_dir) = args.scratch_dir {
        config = config.with_scratch_dir(scratch_dir);
    }

    let app = create_app(config).await?;
    run_server(app, args.addr).await?;

    Ok(())
}
