use std::io::{self, BufRead};

use dstack::{make_key_unseeded, MessageType, Node};

use clap::Parser;

use tracing::Level;
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = 0)]
    port: u16,
    /// An existing member to join through, as name:port
    #[arg(short, long)]
    bootstrap: Option<String>,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let node =
        Node::initialize(cli.port, cli.bootstrap.as_deref()).expect("failed to start node");

    node.set_update_handler(|key, host, joined| {
        if joined {
            println!("+ {key} ({host})");
        } else {
            println!("- {key} ({host})");
        }
        Ok(())
    })
    .expect("update handler");

    node.set_deliver_handler(|key, type_code, payload| {
        let message_type = MessageType::try_from(type_code)
            .map_err(|code| format!("unknown message type {code}"))?;

        println!(
            "[{message_type}] {key}: {}",
            String::from_utf8_lossy(payload)
        );
        Ok(())
    })
    .expect("deliver handler");

    println!("\nListening on {} as {}", node.local_addr(), node.key());
    println!("Type `<key|word> <message>` to send a message, `info` to print node info.\n");

    for line in io::stdin().lock().lines() {
        let line = line.expect("failed to read stdin");
        let line = line.trim();

        if line == "info" {
            println!("{:?}", node.info().expect("node info"));
            continue;
        }

        let Some((destination, message)) = line.split_once(' ') else {
            continue;
        };

        // Anything that isn't a key is hashed into one.
        let key = if destination.parse::<dstack::Key>().is_ok() {
            destination.to_string()
        } else {
            make_key_unseeded(destination).expect("strings are always hashable")
        };

        if let Err(error) = node.send(&key, MessageType::ChPublish.code(), message.as_bytes()) {
            eprintln!("Failed to send: {error}");
        }
    }

    node.shutdown();
}
