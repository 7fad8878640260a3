use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use reel_guard::security::webhook::{sign, SIGNATURE_HEADER, TIMESTAMP_HEADER};

#[derive(Parser)]
#[command(name = "reel-guard-cli")]
#[command(about = "Management CLI for reel-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "REEL_GUARD_ADMIN_API_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service liveness
    Health,
    /// Show audit pipeline and rate-limiter status
    Status,
    /// Query the audit trail
    Audit {
        /// Only records for this identity
        #[arg(long)]
        identity: Option<String>,
        /// Only records for this request
        #[arg(long)]
        correlation_id: Option<String>,
        /// Only violations
        #[arg(long)]
        violations: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Print webhook signature headers for a payload
    Sign {
        #[arg(long, env = "REEL_GUARD_WEBHOOK_SECRET")]
        secret: String,
        /// Unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<u64>,
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Audit {
            identity,
            correlation_id,
            violations,
            limit,
        } => {
            let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
            if let Some(identity) = identity {
                query.push(("identity", identity));
            }
            if let Some(cid) = correlation_id {
                query.push(("correlation_id", cid));
            }
            if violations {
                query.push(("violations_only", "true".into()));
            }
            let res = client
                .get(format!("{}/admin/audit", cli.url))
                .headers(headers)
                .query(&query)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Sign {
            secret,
            timestamp,
            body,
        } => {
            let timestamp = match timestamp {
                Some(ts) => ts,
                None => std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)?
                    .as_secs(),
            };
            let signature = sign(secret.as_bytes(), timestamp, body.as_bytes())?;
            println!("{}: {}", TIMESTAMP_HEADER, timestamp);
            println!("{}: {}", SIGNATURE_HEADER, signature);
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: reel-guard returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
