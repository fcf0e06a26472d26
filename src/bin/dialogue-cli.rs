use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::io::Write;

#[derive(Parser)]
#[command(name = "dialogue-cli")]
#[command(about = "Management CLI for the voice dialogue server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server status
    Status,
    /// List synthesis endpoints with health, circuit state and credits
    Endpoints,
    /// Clear an endpoint's failure state
    Reset {
        /// Endpoint id
        id: String,
    },
    /// Send a text dialogue and print the streamed reply
    Say {
        #[arg(long, default_value = "cli-session")]
        session: String,

        #[arg(long, default_value = "cli-user")]
        user: String,

        text: String,
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
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Endpoints => {
            let res = client
                .get(format!("{}/admin/endpoints", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Reset { id } => {
            let res = client
                .post(format!("{}/admin/endpoints/{}/reset", cli.url, id))
                .headers(headers)
                .send()
                .await?;
            if res.status().is_success() {
                println!("Endpoint {id} reset");
            } else {
                print_response(res).await?;
            }
        }
        Commands::Say { session, user, text } => {
            let res = client
                .post(format!("{}/v1/dialogue/text", cli.url))
                .json(&json!({ "session_id": session, "user_id": user, "text": text }))
                .send()
                .await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }

            let mut res = res;
            let mut stdout = std::io::stdout();
            while let Some(chunk) = res.chunk().await? {
                stdout.write_all(&chunk)?;
                stdout.flush()?;
            }
            println!();
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
