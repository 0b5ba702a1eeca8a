//! A companion to `chat_server`: connects, reads lines from stdin, sends each as a chat packet,
//! and prints whatever the server broadcasts back. Reconnects automatically if the server drops.

use clap::{App, Arg};
use std::io::BufRead;
use std::net::SocketAddr;
use wiremesh_core::prelude::*;

fn main() {
    let matches = App::new("chat_client")
        .arg(
            Arg::with_name("connect")
                .short("c")
                .long("connect")
                .takes_value(true)
                .default_value("127.0.0.1:7878"),
        )
        .get_matches();

    let addr: SocketAddr = matches
        .value_of("connect")
        .unwrap()
        .parse()
        .expect("connect address must be a valid socket address");

    let log = wiremesh_support::logging::init();
    let chat_target = target_from_str("chat");

    let client = Client::connect(
        addr,
        ClientConfig::default(),
        |_target: Target, body: &[u8]| {
            println!("{}", String::from_utf8_lossy(body));
        },
        log,
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if client.send(chat_target, line.as_bytes()).is_err() {
            eprintln!("not connected, dropping line");
        }
    }

    client.disconnect();
}
