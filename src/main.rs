use shadowtun::logger::{LogLevel, Logger};
use shadowtun::{log_error, log_info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = start(args).await {
        exit(err);
    }
}

async fn start(args: Vec<String>) -> anyhow::Result<()> {
    if args.len() != 2 {
        anyhow::bail!(
            "start: usage: {} client://<listen>:<port>/<server>:<port>?sni=<host>[&pool=N&ttl=10s&backoff=5s&stats=30s&log=level]",
            args[0]
        );
    }

    // Replace empty listen host (e.g. "client://:2222/...") with 0.0.0.0
    let url_str = {
        let s = &args[1];
        if let Some(scheme_end) = s.find("://") {
            let after_scheme = &s[scheme_end + 3..];
            if after_scheme.starts_with(':') {
                format!("{}://0.0.0.0{}", &s[..scheme_end], after_scheme)
            } else {
                s.clone()
            }
        } else {
            s.clone()
        }
    };
    let parsed_url = url::Url::parse(&url_str)
        .map_err(|e| anyhow::anyhow!("start: parse URL failed: {}", e))?;

    let logger = init_logger(
        parsed_url
            .query_pairs()
            .find(|(k, _)| k == "log")
            .map(|(_, v)| v.to_string())
            .as_deref(),
    );

    match parsed_url.scheme() {
        "client" => {
            log_info!(logger, "shadowtun v{}", VERSION);
            let client = shadowtun::client::Client::new(parsed_url, logger)?;
            client.run().await
        }
        scheme => {
            log_error!(logger, "Unknown scheme: {}", scheme);
            anyhow::bail!("start: unknown scheme: {} (use client://)", scheme)
        }
    }
}

fn init_logger(level: Option<&str>) -> Logger {
    let logger = Logger::new(LogLevel::Info, true);
    if let Some(level) = level {
        logger.set_level(LogLevel::parse(level));
    }
    logger
}

fn exit(err: anyhow::Error) {
    eprintln!(
        "shadowtun-{} {}/{} pid={} error={}",
        VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH,
        std::process::id(),
        err,
    );
    std::process::exit(1);
}
