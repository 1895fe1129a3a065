use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use gatepass_sdk::types::{AdmissionAttempt, IssueRequest};
use gatepass_sdk::{
    ClientConfig, DisplayFrame, GateClient, ProofDisplay, ProofParams, ScanOutcome, ScanResponse,
    SdkError, SystemClock, Ticket, TicketSecret, Tier,
};
use gatepass_sdk::Clock;
use std::io::Write;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "gatecheck")]
#[command(about = "Issue, display and scan rotating gate passes")]
struct Args {
    #[arg(long, env = "GATE_SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Bearer token from the identity provider
    #[arg(long, env = "GATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the server's proof parameters and clock
    Info,
    /// Issue tickets to a holder (admin)
    Issue {
        #[arg(long)]
        event: String,
        #[arg(long, default_value = "general")]
        tier: Tier,
        #[arg(long)]
        owner: String,
        #[arg(short, long, default_value = "1")]
        quantity: u32,
    },
    /// Run the holder display for one of your tickets until Ctrl-C
    Show { ticket_id: Uuid },
    /// Submit a scanned payload (staff)
    Scan {
        payload: String,
        #[arg(long, env = "GATE_SCANNER_ID", default_value = "gate-1")]
        scanner: String,
    },
    /// Show a ticket's state
    Ticket { ticket_id: Uuid },
    /// List every scan attempt recorded for a ticket (staff)
    Attempts { ticket_id: Uuid },
    /// Void a valid ticket (admin)
    Void { ticket_id: Uuid },
    /// Compute a payload offline from a known secret
    Proof {
        #[arg(long)]
        ticket: Uuid,
        /// 32-byte secret, hex
        #[arg(long)]
        secret: String,
        /// Unix time to compute for; defaults to now
        #[arg(long)]
        at: Option<u64>,
        #[arg(long, default_value = "30")]
        window_secs: u64,
        #[arg(long, default_value = "10")]
        proof_bytes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatepass_sdk=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Proof {
        ticket,
        secret,
        at,
        window_secs,
        proof_bytes,
    } = &args.command
    {
        let params = ProofParams::new(*window_secs, *proof_bytes)?;
        let secret = TicketSecret::from_hex(secret)?;
        let now = at.unwrap_or_else(|| SystemClock.now_unix());
        let frame = ProofDisplay::new(*ticket, secret, params)?.frame_at(now)?;
        println!("{}", frame.payload);
        println!("  window {} | {}", frame.window_index, countdown(&frame));
        return Ok(());
    }

    let client = GateClient::new(ClientConfig {
        server_url: args.server.clone(),
        bearer_token: args.token.clone(),
        timeout_ms: args.timeout_ms,
        ..ClientConfig::default()
    })?;

    match args.command {
        Command::Info => {
            let info = client.info().await?;
            let skew = info.server_time as i64 - SystemClock.now_unix() as i64;
            println!();
            println!("  Server:        {}", args.server);
            println!("  Window:        {}s", info.window_secs);
            println!("  Proof length:  {} bytes", info.proof_bytes);
            println!("  Skew accepted: +/-{} window(s)", info.accepted_skew_windows);
            println!("  Server time:   {} ({:+}s vs this machine)", info.server_time, skew);
            println!();
        }
        Command::Issue {
            event,
            tier,
            owner,
            quantity,
        } => {
            let tickets = client
                .issue(&IssueRequest {
                    event_id: event,
                    tier,
                    owner_id: owner,
                    quantity,
                })
                .await?;
            println!("Issued {} ticket(s):", tickets.len());
            for ticket in &tickets {
                println!("  {}", ticket_line(ticket));
            }
        }
        Command::Show { ticket_id } => show(&client, ticket_id).await?,
        Command::Scan { payload, scanner } => match client.scan(&payload, &scanner).await {
            Ok(response) => {
                println!();
                println!("  {}", banner(&response));
                println!("  {}", response.message);
                println!();
                if !response.outcome.is_admit() {
                    std::process::exit(2);
                }
            }
            Err(SdkError::InvalidPayload(reason)) => {
                println!("  {} unreadable code: {}", "REJECT".red().bold(), reason);
                std::process::exit(2);
            }
            Err(SdkError::VerificationUnavailable(reason)) => {
                // never wave anyone through without a server decision
                println!(
                    "  {} verifier unavailable, do not admit: {}",
                    "HOLD".yellow().bold(),
                    reason
                );
                std::process::exit(3);
            }
            Err(e) => return Err(e.into()),
        },
        Command::Ticket { ticket_id } => {
            let ticket = client.ticket(ticket_id).await?;
            println!("{}", ticket_line(&ticket));
            if let (Some(at), Some(by)) = (ticket.admitted_at, &ticket.admitted_by) {
                println!("  admitted {} by {}", timestamp(at), by);
            }
            if let (Some(at), Some(by)) = (ticket.voided_at, &ticket.voided_by) {
                println!("  voided {} by {}", timestamp(at), by);
            }
        }
        Command::Attempts { ticket_id } => {
            let attempts = client.attempts(ticket_id).await?;
            if attempts.is_empty() {
                println!("No scans recorded for {}", ticket_id);
            }
            for attempt in &attempts {
                println!("{}", attempt_line(attempt));
            }
        }
        Command::Void { ticket_id } => {
            let ticket = client.void(ticket_id).await?;
            println!("{}", ticket_line(&ticket));
        }
        Command::Proof { .. } => return Err(anyhow!("proof is handled offline")),
    }

    Ok(())
}

async fn show(client: &GateClient, ticket_id: Uuid) -> Result<()> {
    let display = client.provision_display(ticket_id).await?;
    let handle = display.start()?;
    let mut frames = handle.subscribe();

    println!("Showing ticket {} (Ctrl-C to stop)", ticket_id);
    render(&handle.current())?;
    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                render(&frame)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    println!();
    handle.stop();
    Ok(())
}

fn render(frame: &DisplayFrame) -> Result<()> {
    let mut out = std::io::stdout();
    write!(out, "\r\x1b[2K{}  {}", frame.payload.bold(), countdown(frame))?;
    out.flush()?;
    Ok(())
}

fn countdown(frame: &DisplayFrame) -> String {
    format!("rotates in {:>2}s", frame.seconds_remaining)
}

fn banner(response: &ScanResponse) -> String {
    let label = response.outcome.banner();
    match response.outcome {
        ScanOutcome::Admit => {
            let tier = response.tier.map(|t| t.label()).unwrap_or("");
            format!("{} {}", label.green().bold(), tier)
                .trim_end()
                .to_string()
        }
        _ => format!("{} {}", "REJECT".red().bold(), label),
    }
}

fn ticket_line(ticket: &Ticket) -> String {
    format!(
        "{} | {} | {} | {} ({}) | {:?}",
        ticket.ticket_id,
        ticket.event_id,
        ticket.tier.label(),
        ticket.holder_name,
        ticket.owner_id,
        ticket.state
    )
}

fn attempt_line(attempt: &AdmissionAttempt) -> String {
    format!(
        "{} | {:<12} | window {} | {}",
        timestamp(attempt.timestamp),
        attempt.outcome.banner(),
        attempt.window_index,
        attempt.scanner_id
    )
}

fn timestamp(unix_secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(outcome: ScanOutcome, tier: Option<Tier>) -> ScanResponse {
        ScanResponse {
            outcome,
            ticket_id: Uuid::nil().to_string(),
            tier,
            holder_display_name: None,
            admitted_at: None,
            admitted_by: None,
            message: String::new(),
        }
    }

    #[test]
    fn test_banners() {
        colored::control::set_override(false);
        assert_eq!(
            banner(&response(ScanOutcome::Admit, Some(Tier::Vip))),
            "ADMIT VIP"
        );
        assert_eq!(
            banner(&response(ScanOutcome::AlreadyUsed, Some(Tier::Vip))),
            "REJECT ALREADY-USED"
        );
        assert_eq!(
            banner(&response(ScanOutcome::NotFound, None)),
            "REJECT NOT FOUND"
        );
    }

    #[test]
    fn test_attempt_line() {
        let attempt = AdmissionAttempt {
            ticket_id: Uuid::nil().to_string(),
            presented_proof: "00".into(),
            window_index: 57_987_606,
            outcome: ScanOutcome::InvalidProof,
            scanner_id: "gate-2".into(),
            timestamp: 1_739_628_182,
        };
        assert_eq!(
            attempt_line(&attempt),
            "2025-02-15 14:03:02 UTC | INVALID      | window 57987606 | gate-2"
        );
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "gatecheck",
            "--server",
            "http://gate.local:8080",
            "issue",
            "--event",
            "evt-1",
            "--tier",
            "vip",
            "--owner",
            "alice",
            "-q",
            "2",
        ])
        .unwrap();
        match args.command {
            Command::Issue { tier, quantity, .. } => {
                assert_eq!(tier, Tier::Vip);
                assert_eq!(quantity, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
