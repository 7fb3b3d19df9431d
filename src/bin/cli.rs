// Exam Server CLI Validation Tool
// Validates exam session functionality through automated scenarios and interactive commands

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

/// Test seeded by the server when DEMO_SEED=true, with the answers in
/// question order.
const DEMO_TEST_ID: &str = "demo-test";
const DEMO_ANSWERS: [&str; 4] = ["4", "54", "25", "8"];

const CORE_SCENARIOS: [&str; 4] = ["health", "connection", "auth-reject", "invalid-exam"];
const SESSION_SCENARIOS: [&str; 6] = [
    "start-exam",
    "duplicate-start",
    "join-exam",
    "submit-answer",
    "full-session",
    "force-finish",
];

#[derive(Parser)]
#[command(name = "exam-cli")]
#[command(about = "Exam Session Server CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// User id to authenticate as
    #[arg(short, long, default_value = "demo-user")]
    user: String,

    /// JWT secret shared with the server (JWT_SECRET)
    #[arg(long, default_value = "dev-secret-change-me")]
    secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Mint a signed token for the configured user
    MintToken {
        /// Token lifetime in seconds
        #[arg(short, long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Test an authenticated WebSocket connection
    Connect,

    /// Start an exam session over HTTP
    Start {
        /// Test to start an exam for
        #[arg(short, long, default_value = "demo-test")]
        test_id: String,

        /// Expire any running exam for this test and start fresh
        #[arg(short, long)]
        force: bool,
    },

    /// Join a running exam over WebSocket
    Join {
        /// Exam ID to join
        #[arg(short, long)]
        exam_id: String,

        /// Keep the connection open and stream session events
        #[arg(short, long)]
        watch: bool,
    },

    /// Expire a running exam without grading it
    ForceFinish {
        /// Exam ID to expire
        #[arg(short, long)]
        exam_id: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send custom events
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::MintToken { ttl } => {
            mint_and_print(&cli.server, &cli.user, &cli.secret, *ttl);
        }
        Commands::Connect => {
            test_connection(&cli.server, &cli.user, &cli.secret).await;
        }
        Commands::Start { test_id, force } => {
            start_exam(&cli.server, &cli.user, &cli.secret, test_id, *force).await;
        }
        Commands::Join { exam_id, watch } => {
            join_exam(&cli.server, &cli.user, &cli.secret, exam_id, *watch).await;
        }
        Commands::ForceFinish { exam_id } => {
            force_finish(&cli.server, &cli.user, &cli.secret, exam_id).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server, &cli.user, &cli.secret).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, &cli.user, &cli.secret, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => {
            interactive_mode(&cli.server, &cli.user, &cli.secret).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/exam/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/exam/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn mint_and_print(server: &str, user: &str, secret: &str, ttl: u64) {
    println!("{}", "Minting token...".cyan());

    match mint_token(user, secret, ttl) {
        Ok(token) => {
            println!("{} Token minted for {} (valid {}s)", "✓".green(), user.bold(), ttl);
            println!("\n{}", token);
            println!("\nHTTP:      {} Bearer <token>", "Authorization:".bold());
            println!("WebSocket: ws://{}/exam?token=<token>", server);
        }
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str, user: &str, secret: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let token = match mint_token(user, secret, 3600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return;
        }
    };

    let url = ws_url(server, &token);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: ws://{}/exam", server);

            // A rejected credential produces one error event before the close.
            let (_, mut read) = ws_stream.split();
            match timeout(Duration::from_millis(800), read.next()).await {
                Err(_) => {
                    println!("{} Credential accepted, session is open", "✓".green());
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    println!("{} Server rejected the session: {}", "✗".red(), text);
                }
                _ => {
                    println!("{} Connection closed by server", "✗".red());
                }
            }
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

async fn start_exam(server: &str, user: &str, secret: &str, test_id: &str, force: bool) {
    println!("{}", "Starting exam...".cyan());
    println!("  Test ID: {}", test_id);
    println!("  User: {}", user);

    let token = match mint_token(user, secret, 3600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return;
        }
    };

    let client = reqwest::Client::new();
    let (status, body) = match request_start(&client, server, &token, test_id, force).await {
        Some(response) => response,
        None => return,
    };

    if status == reqwest::StatusCode::CREATED {
        println!("{} Exam session created", "✓".green());
        println!("\n{}", "═".repeat(50).green());
        println!(
            "{} {}",
            "Exam ID:".bold(),
            body["examId"].as_str().unwrap_or("unknown").green().bold()
        );
        println!(
            "{} {}",
            "Room token:".bold(),
            body["roomToken"].as_str().unwrap_or("unknown")
        );
        println!(
            "{} {}",
            "Started at:".bold(),
            body["startTime"].as_str().unwrap_or("unknown")
        );
        println!("{} {} minutes", "Time limit:".bold(), body["timeLimit"]);
        println!("{}", "═".repeat(50).green());
        println!(
            "\nJoin it with: exam-cli join --exam-id {}",
            body["examId"].as_str().unwrap_or("<exam-id>")
        );
    } else if status == reqwest::StatusCode::BAD_REQUEST && body["examId"].is_string() {
        println!(
            "{} An exam for this test is already running: {}",
            "✗".yellow(),
            body["examId"]
        );
        println!("  Re-run with {} to expire it and start fresh.", "--force".cyan());
    } else {
        println!(
            "{} Start failed ({}): {}",
            "✗".red(),
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        if status == reqwest::StatusCode::NOT_FOUND {
            println!("  For the built-in demo test, run the server with DEMO_SEED=true.");
        }
    }
}

async fn join_exam(server: &str, user: &str, secret: &str, exam_id: &str, watch: bool) {
    println!("{}", "Joining exam...".cyan());
    println!("  Exam ID: {}", exam_id);
    println!("  User: {}", user);

    let token = match mint_token(user, secret, 3600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return;
        }
    };

    let (mut write, mut read) = match open_session(server, &token).await {
        Some(pair) => pair,
        None => return,
    };

    if !send_json(&mut write, json!({ "type": "join-exam", "examId": exam_id })).await {
        println!("{} Failed to send join-exam", "✗".red());
        return;
    }

    let joined = match await_event(&mut read, "exam-joined", 5).await {
        Some(event) => event,
        None => return,
    };

    let remaining = joined["remainingTime"].as_u64().unwrap_or(0);
    println!("{} Joined exam", "✓".green());
    println!("\n{}", "═".repeat(50).green());
    println!(
        "{} {}",
        "Title:".bold(),
        joined["test"]["title"].as_str().unwrap_or("unknown")
    );
    println!(
        "{} {}",
        "Questions:".bold(),
        joined["test"]["questions"].as_array().map(|q| q.len()).unwrap_or(0)
    );
    println!(
        "{} {}:{:02}",
        "Time remaining:".bold(),
        remaining / 60,
        remaining % 60
    );
    println!("{}", "═".repeat(50).green());

    if !watch {
        println!("\nUse {} to stream countdown and result events.", "--watch".cyan());
        return;
    }

    println!("\n{}", "Watching session events...".yellow());
    println!("Press {} to detach.\n", "Ctrl+C".bold());

    loop {
        match timeout(Duration::from_secs(30), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                println!("{} {}", "◀".green(), text.bright_white());

                if let Ok(event) = serde_json::from_str::<serde_json::Value>(&text) {
                    match event["type"].as_str() {
                        Some("exam-expired") => {
                            println!(
                                "{}",
                                "Time limit reached, waiting for the final record...".yellow()
                            );
                        }
                        Some("exam-finished") => {
                            println!(
                                "\n{} Exam finished: score {} ({} of {} correct), status {}",
                                "✓".green(),
                                event["score"],
                                event["correctAnswers"],
                                event["totalQuestions"],
                                event["status"]
                            );
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => {
                // Ignore other message types (Binary, Ping, Pong, Frame)
                continue;
            }
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Ok(None) => {
                println!("{} Connection closed", "✗".yellow());
                break;
            }
            Err(_) => {
                // Timeout - just continue listening
                continue;
            }
        }
    }
}

async fn force_finish(server: &str, user: &str, secret: &str, exam_id: &str) {
    println!("{}", "Force-finishing exam...".cyan());
    println!("  Exam ID: {}", exam_id);

    let token = match mint_token(user, secret, 3600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return;
        }
    };

    let client = reqwest::Client::new();
    let (status, body) = match request_force_finish(&client, server, &token, exam_id).await {
        Some(response) => response,
        None => return,
    };

    if status.is_success() {
        println!("{} Exam expired without grading", "✓".green());
        println!("  Exam ID: {}", body["examId"].as_str().unwrap_or("unknown"));
        println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
    } else {
        println!(
            "{} Force-finish failed ({}): {}",
            "✗".red(),
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("\n{}", "Core server:".bold().cyan());
    println!("  {} - Health endpoint probe", "health".cyan());
    println!("  {} - Authenticated WebSocket connection", "connection".cyan());
    println!(
        "  {} - Invalid token gets one error event, then the socket closes",
        "auth-reject".cyan()
    );
    println!(
        "  {} - Joining an unknown exam reports an error without closing",
        "invalid-exam".cyan()
    );
    println!(
        "\n{}",
        "Session flow (server must run with DEMO_SEED=true):".bold().cyan()
    );
    println!("  {} - POST /exam/start creates a session", "start-exam".cyan());
    println!(
        "  {} - Second start is blocked until forceNew",
        "duplicate-start".cyan()
    );
    println!(
        "  {} - join-exam returns the test without correct answers",
        "join-exam".cyan()
    );
    println!("  {} - submit-answer returns graded feedback", "submit-answer".cyan());
    println!(
        "  {} - Start, join, answer everything, finish, check the score",
        "full-session".cyan()
    );
    println!("  {} - Admin expiry without grading", "force-finish".cyan());
    println!("\nExample: exam-cli validate --scenario full-session");
    println!("Example: exam-cli validate --all");
}

async fn run_scenario(server: &str, user: &str, secret: &str, scenario: &str) {
    if !CORE_SCENARIOS.contains(&scenario) && !SESSION_SCENARIOS.contains(&scenario) {
        println!("{} Unknown scenario: {}", "✗".red(), scenario);
        list_scenarios();
        return;
    }

    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    if dispatch_scenario(server, user, secret, scenario).await {
        println!("\n{} Scenario passed", "✓".green().bold());
    } else {
        println!("\n{} Scenario failed", "✗".red().bold());
    }
}

async fn run_all_validations(server: &str, user: &str, secret: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;

    println!("{}", "Core Server Tests".bold().cyan());
    for scenario in CORE_SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if dispatch_scenario(server, user, secret, scenario).await {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(500)).await;
    }

    println!("\n{}", "Session Flow Tests".bold().cyan());
    if !demo_seed_available(server, user, secret).await {
        println!(
            "{} Demo test '{}' not found on the server.",
            "○".yellow(),
            DEMO_TEST_ID
        );
        println!("  Run the server with DEMO_SEED=true to cover session scenarios.");
        skipped += SESSION_SCENARIOS.len();
    } else {
        for scenario in SESSION_SCENARIOS {
            println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
            println!("{}", "─".repeat(60));

            if dispatch_scenario(server, user, secret, scenario).await {
                passed += 1;
            } else {
                failed += 1;
            }

            sleep(Duration::from_millis(500)).await;
        }
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    if skipped > 0 {
        println!(
            "  {} Skipped (demo seed missing): {}",
            "○".yellow(),
            skipped.to_string().yellow()
        );
    }
    println!("  Total: {}", passed + failed + skipped);

    if failed == 0 {
        println!("\n{}", "All validations passed! 🎉".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

async fn dispatch_scenario(server: &str, user: &str, secret: &str, scenario: &str) -> bool {
    match scenario {
        "health" => validate_health(server).await,
        "connection" => validate_connection(server, user, secret).await,
        "auth-reject" => validate_auth_reject(server).await,
        "invalid-exam" => validate_invalid_exam(server, user, secret).await,
        "start-exam" => validate_start_exam(server, user, secret).await,
        "duplicate-start" => validate_duplicate_start(server, user, secret).await,
        "join-exam" => validate_join_exam(server, user, secret).await,
        "submit-answer" => validate_submit_answer(server, user, secret).await,
        "full-session" => validate_full_session(server, user, secret).await,
        "force-finish" => validate_force_finish(server, user, secret).await,
        _ => false,
    }
}

/// A non-forced start distinguishes a seeded server from an unseeded one.
async fn demo_seed_available(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(_) => return false,
    };

    let client = reqwest::Client::new();
    match request_start(&client, server, &token, DEMO_TEST_ID, false).await {
        Some((status, _)) => status != reqwest::StatusCode::NOT_FOUND,
        None => false,
    }
}

async fn validate_health(server: &str) -> bool {
    let url = format!("http://{}/exam/health", server);

    match reqwest::Client::new().get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
            Ok(body) if body["status"] == "healthy" => {
                println!(
                    "{} Health endpoint reports healthy ({} v{})",
                    "✓".green(),
                    body["service"].as_str().unwrap_or("unknown"),
                    body["version"].as_str().unwrap_or("?")
                );
                true
            }
            _ => {
                println!("{} Unexpected health payload", "✗".red());
                false
            }
        },
        Ok(resp) => {
            println!("{} Health check failed: {}", "✗".red(), resp.status());
            false
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_connection(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };

    match connect_async(&ws_url(server, &token)).await {
        Ok((ws_stream, _)) => {
            let (_, mut read) = ws_stream.split();
            match timeout(Duration::from_millis(800), read.next()).await {
                Err(_) => {
                    println!("{} Authenticated connection stays open", "✓".green());
                    true
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    println!("{} Server rejected the session: {}", "✗".red(), text);
                    false
                }
                _ => {
                    println!("{} Connection closed unexpectedly", "✗".red());
                    false
                }
            }
        }
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_auth_reject(server: &str) -> bool {
    println!("  Connecting with an invalid token...");

    let url = format!(
        "ws://{}/exam?token={}",
        server,
        urlencoding::encode("not-a-real-token")
    );

    let (ws_stream, _) = match connect_async(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            return false;
        }
    };
    let (_, mut read) = ws_stream.split();

    // One error event, then the server hangs up.
    let rejected = match timeout(Duration::from_secs(3), read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<serde_json::Value>(&text)
        {
            Ok(event) if event["type"] == "error" => {
                println!("{} Rejected with: {}", "✓".green(), event["message"]);
                true
            }
            _ => {
                println!("{} Unexpected first message: {}", "✗".red(), text);
                false
            }
        },
        _ => {
            println!("{} No rejection received", "✗".red());
            false
        }
    };

    if !rejected {
        return false;
    }

    match timeout(Duration::from_secs(3), read.next()).await {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {
            println!("{} Connection closed after rejection", "✓".green());
            true
        }
        Ok(Some(Ok(_))) => {
            println!("{} Server kept talking after rejection", "✗".red());
            false
        }
        Err(_) => {
            println!("{} Connection left open after rejection", "✗".red());
            false
        }
    }
}

async fn validate_invalid_exam(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };

    let (mut write, mut read) = match open_session(server, &token).await {
        Some(pair) => pair,
        None => return false,
    };

    println!("  Joining a non-existent exam...");
    if !send_json(
        &mut write,
        json!({ "type": "join-exam", "examId": "does-not-exist" }),
    )
    .await
    {
        println!("{} Failed to send join-exam", "✗".red());
        return false;
    }

    let event = match await_event(&mut read, "error", 5).await {
        Some(event) => event,
        None => return false,
    };

    if !event["message"].as_str().unwrap_or("").contains("not found") {
        println!("{} Unexpected error message: {}", "✗".red(), event["message"]);
        return false;
    }
    println!("{} Reported: {}", "✓".green(), event["message"]);

    // Application errors must not tear the connection down.
    println!("  Checking the connection survives the error...");
    if !send_json(
        &mut write,
        json!({ "type": "join-exam", "examId": "also-missing" }),
    )
    .await
    {
        println!("{} Connection no longer writable", "✗".red());
        return false;
    }

    match await_event(&mut read, "error", 5).await {
        Some(_) => {
            println!("{} Connection still serving after the error", "✓".green());
            true
        }
        None => false,
    }
}

async fn validate_start_exam(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };

    let client = reqwest::Client::new();
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };

    if status != reqwest::StatusCode::CREATED {
        println!(
            "{} Start returned {}: {}",
            "✗".red(),
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        return false;
    }

    let mut ok = true;

    let exam_id = body["examId"].as_str().unwrap_or("");
    if exam_id.is_empty() {
        println!("{} Missing examId in response", "✗".red());
        ok = false;
    } else {
        println!("{} Exam created: {}", "✓".green(), exam_id);
    }

    let room_token = body["roomToken"].as_str().unwrap_or("");
    if room_token.len() == 32 && room_token.chars().all(|c| c.is_ascii_hexdigit()) {
        println!("{} Room token is 16 random bytes (hex)", "✓".green());
    } else {
        println!("{} Unexpected room token: {:?}", "✗".red(), room_token);
        ok = false;
    }

    let started_at = body["startTime"].as_str().unwrap_or("");
    if chrono::DateTime::parse_from_rfc3339(started_at).is_ok() {
        println!("{} Start time is RFC 3339: {}", "✓".green(), started_at);
    } else {
        println!("{} Unparseable start time: {:?}", "✗".red(), started_at);
        ok = false;
    }

    if body["timeLimit"] == 30 {
        println!("{} Time limit matches the demo test (30 minutes)", "✓".green());
    } else {
        println!("{} Unexpected time limit: {}", "✗".red(), body["timeLimit"]);
        ok = false;
    }

    ok
}

async fn validate_duplicate_start(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };
    let client = reqwest::Client::new();

    println!("  Step 1: Starting a fresh exam...");
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::CREATED {
        println!("{} First start returned {}", "✗".red(), status);
        return false;
    }
    let first_id = body["examId"].as_str().unwrap_or("").to_string();
    println!("  {} Exam running: {}", "✓".green(), first_id);

    println!("  Step 2: Starting again without forceNew...");
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, false).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::BAD_REQUEST {
        println!("{} Duplicate start returned {} instead of 400", "✗".red(), status);
        return false;
    }
    if body["examId"].as_str() != Some(first_id.as_str()) {
        println!(
            "{} Blocking exam id mismatch: {} (expected {})",
            "✗".red(),
            body["examId"],
            first_id
        );
        return false;
    }
    println!("  {} Blocked, response names the running exam", "✓".green());

    println!("  Step 3: Starting again with forceNew...");
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::CREATED {
        println!("{} Forced start returned {}", "✗".red(), status);
        return false;
    }
    let second_id = body["examId"].as_str().unwrap_or("");
    if second_id == first_id {
        println!("{} Forced start reused the old exam id", "✗".red());
        return false;
    }
    println!("  {} Old exam expired, new exam: {}", "✓".green(), second_id);
    true
}

async fn validate_join_exam(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };
    let client = reqwest::Client::new();

    println!("  Step 1: Starting exam...");
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::CREATED {
        println!("{} Start returned {}", "✗".red(), status);
        return false;
    }
    let exam_id = body["examId"].as_str().unwrap_or("").to_string();
    println!("  {} Exam started: {}", "✓".green(), exam_id);

    println!("  Step 2: Joining over WebSocket...");
    let (mut write, mut read) = match open_session(server, &token).await {
        Some(pair) => pair,
        None => return false,
    };
    if !send_json(&mut write, json!({ "type": "join-exam", "examId": exam_id })).await {
        println!("{} Failed to send join-exam", "✗".red());
        return false;
    }
    let joined = match await_event(&mut read, "exam-joined", 5).await {
        Some(event) => event,
        None => return false,
    };

    let mut ok = true;

    let questions = joined["test"]["questions"].as_array().cloned().unwrap_or_default();
    if questions.len() == DEMO_ANSWERS.len() {
        println!("{} Received {} questions", "✓".green(), questions.len());
    } else {
        println!(
            "{} Expected {} questions, got {}",
            "✗".red(),
            DEMO_ANSWERS.len(),
            questions.len()
        );
        ok = false;
    }

    // The graded answer must never reach the client.
    if questions.iter().any(|q| q.get("correctAnswer").is_some()) {
        println!("{} Question payload leaks correct answers", "✗".red());
        ok = false;
    } else {
        println!("{} Correct answers are withheld from the payload", "✓".green());
    }

    let remaining = joined["remainingTime"].as_u64().unwrap_or(0);
    if remaining > 0 && remaining <= 30 * 60 {
        println!("{} Remaining time within the limit: {}s", "✓".green(), remaining);
    } else {
        println!("{} Remaining time out of range: {}s", "✗".red(), remaining);
        ok = false;
    }

    ok
}

async fn validate_submit_answer(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };
    let client = reqwest::Client::new();

    println!("  Step 1: Starting exam...");
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::CREATED {
        println!("{} Start returned {}", "✗".red(), status);
        return false;
    }
    let exam_id = body["examId"].as_str().unwrap_or("").to_string();

    println!("  Step 2: Joining and answering question 0...");
    let (mut write, mut read) = match open_session(server, &token).await {
        Some(pair) => pair,
        None => return false,
    };
    if !send_json(&mut write, json!({ "type": "join-exam", "examId": exam_id })).await {
        println!("{} Failed to send join-exam", "✗".red());
        return false;
    }
    if await_event(&mut read, "exam-joined", 5).await.is_none() {
        return false;
    }

    if !send_json(
        &mut write,
        json!({
            "type": "submit-answer",
            "examId": exam_id,
            "questionIndex": 0,
            "answer": DEMO_ANSWERS[0],
        }),
    )
    .await
    {
        println!("{} Failed to send submit-answer", "✗".red());
        return false;
    }

    let feedback = match await_event(&mut read, "answer-feedback", 15).await {
        Some(event) => event,
        None => return false,
    };

    if feedback["questionIndex"] != 0 {
        println!(
            "{} Feedback for the wrong question: {}",
            "✗".red(),
            feedback["questionIndex"]
        );
        return false;
    }
    if !feedback["isCorrect"].as_bool().unwrap_or(false) {
        println!(
            "{} Correct answer was graded wrong: {}",
            "✗".red(),
            feedback["feedback"]
        );
        return false;
    }
    println!(
        "{} Answer graded correct: {}",
        "✓".green(),
        feedback["feedback"].as_str().unwrap_or("")
    );
    true
}

async fn validate_full_session(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };
    let client = reqwest::Client::new();

    println!("  Step 1: Starting exam for '{}'...", DEMO_TEST_ID);
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::CREATED {
        println!("{} Start returned {}", "✗".red(), status);
        return false;
    }
    let exam_id = body["examId"].as_str().unwrap_or("").to_string();
    println!("  {} Exam started: {}", "✓".green(), exam_id);

    println!("  Step 2: Joining over WebSocket...");
    let (mut write, mut read) = match open_session(server, &token).await {
        Some(pair) => pair,
        None => return false,
    };
    if !send_json(&mut write, json!({ "type": "join-exam", "examId": exam_id })).await {
        println!("{} Failed to send join-exam", "✗".red());
        return false;
    }
    let joined = match await_event(&mut read, "exam-joined", 5).await {
        Some(event) => event,
        None => return false,
    };
    println!(
        "  {} Joined: {} questions, {}s remaining",
        "✓".green(),
        joined["test"]["questions"].as_array().map(|q| q.len()).unwrap_or(0),
        joined["remainingTime"]
    );

    println!("  Step 3: Submitting all answers...");
    let mut correct = 0;
    for (index, answer) in DEMO_ANSWERS.iter().enumerate() {
        if !send_json(
            &mut write,
            json!({
                "type": "submit-answer",
                "examId": exam_id,
                "questionIndex": index,
                "answer": answer,
            }),
        )
        .await
        {
            println!("{} Failed to send answer {}", "✗".red(), index);
            return false;
        }

        let feedback = match await_event(&mut read, "answer-feedback", 15).await {
            Some(event) => event,
            None => return false,
        };
        if feedback["isCorrect"].as_bool().unwrap_or(false) {
            correct += 1;
            println!("    {} Question {}: correct", "✓".green(), index);
        } else {
            println!(
                "    {} Question {}: graded incorrect ({})",
                "○".yellow(),
                index,
                feedback["feedback"]
            );
        }
    }

    println!("  Step 4: Finishing exam...");
    if !send_json(&mut write, json!({ "type": "finish-exam", "examId": exam_id })).await {
        println!("{} Failed to send finish-exam", "✗".red());
        return false;
    }
    let finished = match await_event(&mut read, "exam-finished", 5).await {
        Some(event) => event,
        None => return false,
    };

    let score = finished["score"].as_u64().unwrap_or(0);
    let expected = ((100.0 * correct as f64) / DEMO_ANSWERS.len() as f64).round() as u64;

    println!(
        "  {} Finished: score {} ({} of {} correct), status {}",
        "✓".green(),
        score,
        finished["correctAnswers"],
        finished["totalQuestions"],
        finished["status"]
    );

    if finished["status"] != "completed" {
        println!("{} Expected status 'completed'", "✗".red());
        return false;
    }
    if score != expected {
        println!(
            "{} Expected score {} for {} correct answers",
            "✗".red(),
            expected,
            correct
        );
        return false;
    }
    if finished["correctAnswers"] != correct {
        println!("{} Correct-answer count mismatch", "✗".red());
        return false;
    }
    true
}

async fn validate_force_finish(server: &str, user: &str, secret: &str) -> bool {
    let token = match mint_token(user, secret, 600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return false;
        }
    };
    let client = reqwest::Client::new();

    println!("  Step 1: Starting exam...");
    let (status, body) = match request_start(&client, server, &token, DEMO_TEST_ID, true).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::CREATED {
        println!("{} Start returned {}", "✗".red(), status);
        return false;
    }
    let exam_id = body["examId"].as_str().unwrap_or("").to_string();
    println!("  {} Exam started: {}", "✓".green(), exam_id);

    println!("  Step 2: Force-finishing it...");
    let (status, body) = match request_force_finish(&client, server, &token, &exam_id).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::OK {
        println!("{} Force-finish returned {}", "✗".red(), status);
        return false;
    }
    if body["status"] != "expired" || body["examId"].as_str() != Some(exam_id.as_str()) {
        println!("{} Unexpected response: {}", "✗".red(), body);
        return false;
    }
    println!("  {} Exam expired without grading", "✓".green());

    println!("  Step 3: Force-finishing it again...");
    let (status, _) = match request_force_finish(&client, server, &token, &exam_id).await {
        Some(response) => response,
        None => return false,
    };
    if status != reqwest::StatusCode::BAD_REQUEST {
        println!(
            "{} Second force-finish returned {} instead of 400",
            "✗".red(),
            status
        );
        return false;
    }
    println!("  {} Terminal exam rejects a second expiry", "✓".green());
    true
}

async fn interactive_mode(server: &str, user: &str, secret: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let token = match mint_token(user, secret, 3600) {
        Ok(token) => token,
        Err(e) => {
            println!("{} Failed to mint token: {}", "✗".red(), e);
            return;
        }
    };

    match connect_async(&ws_url(server, &token)).await {
        Ok((ws_stream, _)) => {
            println!("{} Connected to server as {}", "✓".green(), user.bold());

            let (mut write, mut read) = ws_stream.split();

            // Spawn task to receive messages
            let receive_task = tokio::spawn(async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        println!("\n{} {}", "◀".green(), text.bright_white());
                    }
                }
            });

            // Main input loop
            loop {
                print!("{} ", "►".cyan());
                io::stdout().flush().unwrap();

                let mut input = String::new();
                if io::stdin().read_line(&mut input).is_err() {
                    break;
                }

                let input = input.trim();

                if input.is_empty() {
                    continue;
                }

                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }

                if input == "help" {
                    print_interactive_help();
                    continue;
                }

                // Try to parse as JSON and send
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(input) {
                    if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                        println!("{} Event sent", "✓".green());
                    } else {
                        println!("{} Failed to send event", "✗".red());
                        break;
                    }
                } else {
                    println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
                }
            }

            receive_task.abort();
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON events directly to the server.\n");

    println!("{}", "Example Events:".bold());
    println!("\n{}:", "Join Exam".cyan());
    println!(r#"  {{"type":"join-exam","examId":"<exam-id>"}}"#);

    println!("\n{}:", "Submit Answer".cyan());
    println!(r#"  {{"type":"submit-answer","examId":"<exam-id>","questionIndex":0,"answer":"4"}}"#);

    println!("\n{}:", "Finish Exam".cyan());
    println!(r#"  {{"type":"finish-exam","examId":"<exam-id>"}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}

// ============================================================================
// Shared helpers
// ============================================================================

#[derive(Serialize)]
struct TokenClaims {
    sub: String,
    exp: usize,
}

/// Mints the same HS256 token the server's JWT_SECRET verifies.
fn mint_token(
    user: &str,
    secret: &str,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let claims = TokenClaims {
        sub: user.to_string(),
        exp: (now + ttl_secs) as usize,
    };

    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn ws_url(server: &str, token: &str) -> String {
    format!("ws://{}/exam?token={}", server, urlencoding::encode(token))
}

async fn open_session(server: &str, token: &str) -> Option<(WsWrite, WsRead)> {
    match connect_async(&ws_url(server, token)).await {
        Ok((ws_stream, _)) => {
            let (write, read) = ws_stream.split();
            Some((write, read))
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
            None
        }
    }
}

async fn send_json(write: &mut WsWrite, payload: serde_json::Value) -> bool {
    write.send(Message::Text(payload.to_string())).await.is_ok()
}

/// Reads events until one of the wanted type arrives, skipping the periodic
/// time-update broadcasts. An error event while waiting for anything else
/// fails the wait.
async fn await_event(read: &mut WsRead, wanted: &str, secs: u64) -> Option<serde_json::Value> {
    let deadline = Instant::now() + Duration::from_secs(secs);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            println!("{} Timed out waiting for {}", "✗".red(), wanted);
            return None;
        }

        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let event = match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(event) => event,
                    Err(_) => continue,
                };

                let kind = event["type"].as_str().unwrap_or("");
                if kind == wanted {
                    return Some(event);
                }
                if kind == "error" {
                    println!("{} Server error: {}", "✗".red(), event["message"]);
                    return None;
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                println!("{} Connection closed while waiting for {}", "✗".red(), wanted);
                return None;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                return None;
            }
            Err(_) => {
                println!("{} Timed out waiting for {}", "✗".red(), wanted);
                return None;
            }
        }
    }
}

async fn request_start(
    client: &reqwest::Client,
    server: &str,
    token: &str,
    test_id: &str,
    force_new: bool,
) -> Option<(reqwest::StatusCode, serde_json::Value)> {
    let url = format!("http://{}/exam/start", server);
    let payload = json!({ "testId": test_id, "forceNew": force_new });

    match client
        .post(&url)
        .header("Authorization", format!("Bearer {}", token))
        .json(&payload)
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status();
            let body = resp
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            Some((status, body))
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn request_force_finish(
    client: &reqwest::Client,
    server: &str,
    token: &str,
    exam_id: &str,
) -> Option<(reqwest::StatusCode, serde_json::Value)> {
    let url = format!("http://{}/exam/force-finish/{}", server, exam_id);

    match client
        .post(&url)
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status();
            let body = resp
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            Some((status, body))
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}
