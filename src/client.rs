use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fiat_shamir_auth::fiat_shamir::fingerprint;
use fiat_shamir_auth::{AuthClient, ClientConfig, KeyStore};

#[derive(Parser)]
#[command(name = "fs-auth-client")]
#[command(about = "Interactive Fiat-Shamir authentication client")]
struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 12345)]
    port: u16,

    /// File holding saved private keys
    #[arg(short, long, default_value = "client_keys.json")]
    keys_file: PathBuf,

    /// Seconds to wait for each server reply
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,
}

const MENU: &str = "
1. Connect to server
2. Register new user
3. Authenticate
4. List users on server
5. Show saved keys
6. Disconnect
7. Exit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ClientConfig {
        server_address: format!("{}:{}", cli.host, cli.port),
        keys_file: cli.keys_file,
        response_timeout: Duration::from_secs(cli.timeout),
        ..ClientConfig::default()
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut client: Option<AuthClient> = None;

    println!("Fiat-Shamir authentication client");
    loop {
        println!("{MENU}");
        let Some(choice) = prompt(&mut input, "Choose an action: ").await? else {
            break;
        };

        match choice.as_str() {
            "1" => {
                if client.is_some() {
                    println!("Already connected");
                    continue;
                }
                match AuthClient::connect(&config).await {
                    Ok(connected) => {
                        println!(
                            "Connected to {} (N: {} bits, fingerprint {}, {} rounds)",
                            config.server_address,
                            connected.modulus().bits(),
                            connected.modulus().fingerprint(),
                            connected.total_rounds()
                        );
                        client = Some(connected);
                    }
                    Err(err) => println!("Connection failed: {err}"),
                }
            }
            "2" | "3" => {
                let Some(active) = client.as_mut() else {
                    println!("Connect to the server first");
                    continue;
                };
                let Some(username) = prompt(&mut input, "Username: ").await? else {
                    break;
                };
                if username.is_empty() {
                    println!("Username must not be empty");
                    continue;
                }

                let result = if choice == "2" {
                    active.register(&username).await.map(|outcome| {
                        if outcome.success {
                            println!("Registered {username}; private key saved to {}", config.keys_file.display());
                        } else {
                            println!("Registration failed: {}", outcome.message);
                        }
                    })
                } else {
                    active.authenticate(&username).await.map(|outcome| {
                        if outcome.reconciled {
                            println!("Saved key was re-derived for the server's current modulus");
                        }
                        if outcome.success {
                            println!(
                                "Access granted: {}/{} rounds passed",
                                outcome.successful_rounds, outcome.total_rounds
                            );
                        } else {
                            println!(
                                "Access denied at round {}: {}/{} rounds passed ({})",
                                outcome.current_round, outcome.successful_rounds, outcome.total_rounds, outcome.message
                            );
                        }
                    })
                };
                if let Err(err) = result {
                    println!("Error: {err}");
                    if err.is_connection_lost() {
                        println!("Connection lost");
                        client = None;
                    }
                }
            }
            "4" => {
                let Some(active) = client.as_mut() else {
                    println!("Connect to the server first");
                    continue;
                };
                match active.list_users().await {
                    Ok(users) => {
                        println!("Registered users ({}):", users.len());
                        for user in users {
                            println!("  {}: v={}, logins: {}", user.username, user.v, user.logins);
                        }
                    }
                    Err(err) => {
                        println!("Error: {err}");
                        if err.is_connection_lost() {
                            println!("Connection lost");
                            client = None;
                        }
                    }
                }
            }
            "5" => {
                let keys = KeyStore::new(&config.keys_file).load();
                if keys.is_empty() {
                    println!("No saved keys in {}", config.keys_file.display());
                    continue;
                }
                println!("Saved keys ({}):", keys.len());
                for (username, key) in keys {
                    println!("  {username}");
                    println!("    s = {}", key.s);
                    println!("    N = {} (fingerprint {})", key.n, fingerprint(&key.n));
                    println!("    v = {}", key.v);
                }
            }
            "6" => match client.take() {
                Some(active) => {
                    active.disconnect().await;
                    println!("Disconnected");
                }
                None => println!("Not connected"),
            },
            "7" => break,
            _ => println!("Unknown choice"),
        }
    }

    if let Some(active) = client.take() {
        active.disconnect().await;
    }
    println!("Bye");
    Ok(())
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}
