use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::thread;

use super::session::listen_for_commands;
use crate::command::{Command, CommandInvocation, CommandMap, Flag};
use crate::crypto::Keypair;
use crate::v1::config::Config;
use crate::v1::membership::first_contact;
use crate::v1::net::listen_for_connections;
use crate::v1::state::Node;
use crate::v1::wallet::WalletInfo;

/// Launch a node. The bootstrap mints the genesis supply and waits for the
/// others; a joiner registers with the bootstrap first and then starts
/// serving. Either way the command ends in the interactive session loop.
fn start(invocation: &CommandInvocation, _state: Option<()>) -> Result<(), Box<dyn Error>> {
    let port = invocation
        .get_optional("port")
        .unwrap_or(String::from("5000"))
        .parse::<u16>()?;
    let capacity = invocation
        .get_optional("capacity")
        .unwrap_or(String::from("10"))
        .parse::<usize>()?;
    let difficulty = invocation
        .get_optional("difficulty")
        .unwrap_or(String::from("3"))
        .parse::<u32>()?;
    let nodes = invocation
        .get_optional("nodes")
        .unwrap_or(String::from("5"))
        .parse::<usize>()?;
    let bootstrap = invocation.get_flag("bootstrap");
    let bootstrap_addr = invocation.get_optional("bootstrap-addr");
    let ip = invocation
        .get_optional("ip")
        .unwrap_or(String::from("127.0.0.1"));
    let script = invocation.get_optional("script");

    let config = Config::new(port, capacity, difficulty, nodes, bootstrap, bootstrap_addr)?;
    let address = format!("{}:{}", ip, port);

    println!("Generating RSA-{} keypair", crate::crypto::KEY_BITS);
    let keypair = Keypair::generate()?;

    let node = if config.bootstrap {
        println!(
            "Starting bootstrap node at {}. Minting {} NBC",
            address,
            100 * config.nodes
        );
        Node::new_bootstrap(keypair, address, config)
    } else {
        let bootstrap_addr = config.bootstrap_addr.clone().unwrap();
        let info = WalletInfo {
            public_key: keypair.public().clone(),
            address: address.clone(),
        };

        println!("Registering with bootstrap at {}", bootstrap_addr);
        let (my_id, blockchain) = first_contact(&bootstrap_addr, &info)?;
        println!(
            "Registered as node {} with a {}-block chain",
            my_id,
            blockchain.len()
        );

        Node::new_peer(keypair, address, config, my_id, blockchain)
    };

    let node_arc = Arc::new(node);
    let listener_node = Arc::clone(&node_arc);

    println!(
        "Starting network listener thread. Listening on port {}",
        node_arc.config.port
    );
    thread::Builder::new()
        .name(String::from("network-listener"))
        .spawn(move || {
            listen_for_connections(&listener_node).expect("Network listener thread crashed");
        })
        .unwrap();

    println!("Type a command, or 'help' for a list of commands");
    listen_for_commands(&node_arc, script);

    Ok(())
}

pub fn make_command_map() -> CommandMap<()> {
    let mut map: CommandMap<()> = HashMap::new();

    let start_cmd: Command<()> = Command {
        processor: start,
        expected_fields: vec![],
        flags: vec![Flag::new(
            "bootstrap",
            "Run as the bootstrap node: mint the genesis supply and assign ids to joiners",
        )],
        desc: String::from(
            "Start a node and enter the interactive session. Optional arguments: \
             --port=<port> --capacity=<txns per block> --difficulty=<leading zero bits> \
             --nodes=<network size> --bootstrap-addr=<host:port> --ip=<listen ip> \
             --script=<file of session commands>",
        ),
    };

    map.insert(String::from("start"), start_cmd);

    map
}
