use clap::{Parser, ValueEnum};
use sahara_core::{DirSink, SaharaSession, SessionConfig, TcpTransport};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FlowMode {
    /// Fetch the four crash-info fields over command mode.
    CrashInfo,
    /// Download every announced memory region.
    RamDump,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Sahara modem crash-dump tool", long_about = None)]
struct Args {
    /// Router address
    #[arg(long, default_value = "192.168.0.1")]
    host: String,

    /// Diagnostic proxy port (RAM dump port on the router)
    #[arg(long, default_value_t = 8890)]
    port: u16,

    /// Which flow to run
    #[arg(long, value_enum)]
    mode: FlowMode,

    /// Output directory for artifacts
    #[arg(long, default_value = ".")]
    out: String,

    /// Optional TOML session configuration
    #[arg(long)]
    config: Option<String>,

    /// Override the configured receive timeout, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Override the configured retry attempt budget
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(secs) = args.timeout_secs {
        config.receive_timeout_secs = secs;
    }
    if let Some(attempts) = args.max_attempts {
        config.retry.max_attempts = attempts;
    }

    let endpoint = format!("{}:{}", args.host, args.port);
    info!(endpoint = %endpoint, "connecting to diagnostic port");
    let transport = TcpTransport::connect(endpoint, config.receive_timeout())?;
    let mut sink = DirSink::new(&args.out)?;
    let session = SaharaSession::new(transport, config);

    match args.mode {
        FlowMode::CrashInfo => match session.run_crash_info(&mut sink) {
            Ok(report) => {
                info!(
                    sbl_version = %report.boot_version,
                    model = %report.product_model,
                    serial = %report.serial_number,
                    crash = %report.crash_info,
                    "crash info collected"
                );
            }
            Err(e) => {
                error!(error = %e, "crash info collection failed");
                std::process::exit(1);
            }
        },
        FlowMode::RamDump => match session.run_ram_dump(&mut sink) {
            Ok(dump) => {
                for region in &dump.regions {
                    info!(
                        file = %region.name,
                        bytes = region.bytes_written,
                        complete = region.complete,
                        "region saved"
                    );
                }
                if !dump.is_complete() {
                    error!("dump finished with truncated regions");
                    std::process::exit(2);
                }
            }
            Err(e) => {
                error!(error = %e, "RAM dump failed");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
