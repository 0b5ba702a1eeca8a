//! A minimal broadcast chat server built on `wiremesh_core`, in the shape of the teacher's
//! `util::bin::test_listen` and `authenticator::main` CLI harnesses: a clap-driven flag set, a
//! logger built at startup, and a single well-known target ("chat") carrying UTF-8 lines.

use clap::{App, Arg};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use wiremesh_core::prelude::*;
use wiremesh_support::logging::info;

fn main() {
    let matches = App::new("chat_server")
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .takes_value(true)
                .default_value("127.0.0.1:7878"),
        )
        .get_matches();

    let addr: SocketAddr = matches
        .value_of("bind")
        .unwrap()
        .parse()
        .expect("bind address must be a valid socket address");

    let log = wiremesh_support::logging::init();
    let chat_target = target_from_str("chat");

    let server = Server::bind(addr, ServerConfig::default(), log.clone())
        .expect("failed to bind chat server");
    info!(log, "listening"; "addr" => %server.local_addr().unwrap());

    // No graceful shutdown wiring here -- this demo runs until killed, matching
    // `util::bin::test_listen`'s own run-until-killed loop.
    let exit = Arc::new(AtomicBool::new(false));

    let draining = server
        .run(
            move |peer, target, body: &[u8], sender: &SenderHandle| {
                if target != chat_target {
                    return;
                }
                let line = String::from_utf8_lossy(body);
                info!(log, "received chat line"; "peer" => peer, "line" => %line);
                sender.broadcast(chat_target, body);
            },
            &exit,
        )
        .expect("server loop exited with an error");
    draining.shutdown();
}
