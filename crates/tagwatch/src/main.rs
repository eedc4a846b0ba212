use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tagwatch::{
    ClientConfig, CorrectionRequest, InferenceClient, PollConfig, PollObserver, PredictionRequest,
    start_polling,
};

const USAGE: &str = "\
Usage: tagwatch [options] <command>

Commands:
  wait                                   Wait until the inference service is ready
  predict <title>                        Wait, then predict tags for <title>
  correct <title> --predicted <tags> --actual <tags>
                                         Wait, then submit corrected tags (comma separated)

Options:
  --url <url>                Inference service base url [env: TAGWATCH_URL]
  --initial-delay-ms <ms>    First retry delay [default: 1000]
  --max-delay-ms <ms>        Retry delay ceiling [default: 5000]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Wait,
    Predict {
        title: String,
    },
    Correct {
        title: String,
        predicted: Vec<String>,
        actual: Vec<String>,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    url: Option<String>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    command: Command,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

/// Initialize tracing with TAGWATCH_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("TAGWATCH_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("tagwatch={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut url = None;
    let mut initial_delay_ms = None;
    let mut max_delay_ms = None;
    let mut predicted = None;
    let mut actual = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                i += 1;
                url = Some(args.get(i).ok_or("--url requires a value")?.clone());
            }
            "--initial-delay-ms" => {
                i += 1;
                initial_delay_ms = Some(parse_millis(args.get(i), "--initial-delay-ms")?);
            }
            "--max-delay-ms" => {
                i += 1;
                max_delay_ms = Some(parse_millis(args.get(i), "--max-delay-ms")?);
            }
            "--predicted" => {
                i += 1;
                predicted = Some(split_tags(
                    args.get(i).ok_or("--predicted requires a value")?,
                ));
            }
            "--actual" => {
                i += 1;
                actual = Some(split_tags(args.get(i).ok_or("--actual requires a value")?));
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("wait") => Command::Wait,
        Some("predict") => Command::Predict {
            title: positional
                .next()
                .ok_or("predict requires a <title> argument")?,
        },
        Some("correct") => Command::Correct {
            title: positional
                .next()
                .ok_or("correct requires a <title> argument")?,
            predicted: predicted.take().ok_or("correct requires --predicted")?,
            actual: actual.take().ok_or("correct requires --actual")?,
        },
        Some(other) => return Err(format!("unknown command: {other}")),
        None => return Err("missing command".to_string()),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    if predicted.is_some() || actual.is_some() {
        return Err("--predicted/--actual are only valid with correct".to_string());
    }

    Ok(Cli {
        url,
        initial_delay_ms,
        max_delay_ms,
        command,
    })
}

fn parse_millis(value: Option<&String>, flag: &str) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag} expects milliseconds, got '{value}'"))
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let poll_config = PollConfig::from_env_with(
        cli.initial_delay_ms.map(Duration::from_millis),
        cli.max_delay_ms.map(Duration::from_millis),
    )?;

    let mut client_config = ClientConfig::from_env();
    if let Some(url) = cli.url {
        client_config.base_url = url;
    }
    let client = Arc::new(InferenceClient::new(client_config)?);

    match wait_for_service(&client, poll_config).await? {
        Readiness::Ready => {}
        Readiness::Fatal(detail) => {
            eprintln!("Server error, try again later. ({detail})");
            return Ok(1);
        }
        Readiness::Interrupted => return Ok(130),
    }

    match cli.command {
        Command::Wait => {
            println!("ready");
        }
        Command::Predict { title } => {
            let result = client
                .predict(&PredictionRequest { title })
                .await
                .context("prediction failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Correct {
            title,
            predicted,
            actual,
        } => {
            client
                .correct_prediction(&CorrectionRequest {
                    title,
                    predicted,
                    actual,
                })
                .await
                .context("submitting correction failed")?;
            println!("Thank you!");
        }
    }

    Ok(0)
}

#[derive(Debug)]
enum Readiness {
    Ready,
    Fatal(String),
    Interrupted,
}

/// Forwards the poller's terminal outcome to the waiting command.
struct ChannelObserver {
    tx: mpsc::UnboundedSender<Readiness>,
}

impl PollObserver for ChannelObserver {
    fn on_ready(&self) {
        let _ = self.tx.send(Readiness::Ready);
    }

    fn on_fatal(&self, detail: &str) {
        let _ = self.tx.send(Readiness::Fatal(detail.to_string()));
    }
}

async fn wait_for_service(
    client: &Arc<InferenceClient>,
    config: PollConfig,
) -> anyhow::Result<Readiness> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    eprintln!("Waiting for inference service at {} ...", client.base_url());
    let handle = start_polling(config, client.clone(), Arc::new(ChannelObserver { tx }));

    tokio::select! {
        readiness = rx.recv() => {
            handle.join().await;
            readiness.context("poller exited without reporting a result")
        }
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            handle.join().await;
            Ok(Readiness::Interrupted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("tagwatch")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_wait_with_options() {
        let cli = parse_args(&args(&[
            "--url",
            "http://svc:8000",
            "--initial-delay-ms",
            "250",
            "wait",
        ]))
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("http://svc:8000"));
        assert_eq!(cli.initial_delay_ms, Some(250));
        assert_eq!(cli.max_delay_ms, None);
        assert_eq!(cli.command, Command::Wait);
    }

    #[test]
    fn parses_predict() {
        let cli = parse_args(&args(&["predict", "How to sort a Vec?"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Predict {
                title: "How to sort a Vec?".to_string()
            }
        );
    }

    #[test]
    fn parses_correct_with_empty_actual() {
        let cli = parse_args(&args(&[
            "correct",
            "title",
            "--predicted",
            "rust, vec ,",
            "--actual",
            "",
        ]))
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Correct {
                title: "title".to_string(),
                predicted: vec!["rust".to_string(), "vec".to_string()],
                actual: vec![],
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["predict"])).is_err());
        assert!(parse_args(&args(&["correct", "t", "--predicted", "a"])).is_err());
        assert!(parse_args(&args(&["wait", "--actual", "a"])).is_err());
        assert!(parse_args(&args(&["wait", "extra"])).is_err());
        assert!(parse_args(&args(&["--max-delay-ms", "soon", "wait"])).is_err());
        assert!(parse_args(&args(&["--verbose", "wait"])).is_err());
        assert_eq!(parse_args(&args(&["--help"])), Err(String::new()));
    }
}
