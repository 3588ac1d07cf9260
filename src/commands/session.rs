use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::sync::Arc;

use crate::command::{dispatch_command, Command, CommandInvocation, CommandMap, Field, FieldType};
use crate::v1::net::broadcast;
use crate::v1::request::Request;
use crate::v1::state::Node;

fn peer_addrs(node: &Arc<Node>) -> Vec<String> {
    node.peer_addresses()
        .into_iter()
        .map(|(_, addr)| addr)
        .collect()
}

fn transaction(
    invocation: &CommandInvocation,
    state: Option<&Arc<Node>>,
) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();
    let receiver_id = invocation.get_field("id").unwrap().parse::<usize>()?;
    let amount = invocation.get_field("amount").unwrap().parse::<u64>()?;

    match node.create_transaction(receiver_id, amount) {
        None => println!("Transaction unsuccessful: unknown receiver or not enough NBC"),
        Some(txn) => {
            if !broadcast(&Request::NewTransaction(txn.clone()), &peer_addrs(node)) {
                println!("Some peers did not receive the transaction");
            }
            println!(
                "Sent {} NBC to node {} (transaction {})",
                amount, receiver_id, txn.transaction_id
            );
        }
    }

    Ok(())
}

fn bogus_transaction(
    invocation: &CommandInvocation,
    state: Option<&Arc<Node>>,
) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();
    let receiver_id = invocation.get_field("id").unwrap().parse::<usize>()?;
    let amount = invocation.get_field("amount").unwrap().parse::<u64>()?;

    match node.bogus_transaction(receiver_id, amount) {
        None => println!("Unknown receiver id"),
        Some(txn) => {
            broadcast(&Request::NewTransaction(txn.clone()), &peer_addrs(node));
            println!(
                "Broadcast bogus transaction {} of {} NBC; watch the peers reject it",
                txn.transaction_id, amount
            );
        }
    }

    Ok(())
}

fn view(_invocation: &CommandInvocation, state: Option<&Arc<Node>>) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();
    let transactions = node.last_block_transactions();

    println!("{} transactions in the last block", transactions.len());
    println!("{:#?}", transactions);

    Ok(())
}

fn view_blockchain(
    _invocation: &CommandInvocation,
    state: Option<&Arc<Node>>,
) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();
    let blockchain = node.blockchain_snapshot();

    println!("{} blocks", blockchain.len());
    for block in &blockchain.chain {
        println!(
            "\tblock {} [{}] {} txns, extends {}",
            block.index,
            block.hash,
            block.list_of_transactions.len(),
            block.previous_hash
        );
    }

    Ok(())
}

fn balance(_invocation: &CommandInvocation, state: Option<&Arc<Node>>) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();
    println!("Balance: {} NBC", node.balance());

    Ok(())
}

fn balances(
    _invocation: &CommandInvocation,
    state: Option<&Arc<Node>>,
) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();

    for (id, amount) in node.balances() {
        println!("\tnode {}: {} NBC", id, amount);
    }

    Ok(())
}

fn ring(_invocation: &CommandInvocation, state: Option<&Arc<Node>>) -> Result<(), Box<dyn Error>> {
    let node = state.unwrap();
    println!("{:#?}", node.ring_views());

    Ok(())
}

fn exit(_invocation: &CommandInvocation, _state: Option<&Arc<Node>>) -> Result<(), Box<dyn Error>> {
    std::process::exit(0);
}

fn make_session_command_map<'a>() -> CommandMap<&'a Arc<Node>> {
    let mut map: CommandMap<&Arc<Node>> = HashMap::new();

    let t_cmd = Command {
        processor: transaction,
        expected_fields: vec![
            Field::new("id", FieldType::Pos(0), "The receiver's node id"),
            Field::new("amount", FieldType::Pos(1), "The amount of NBC to send"),
        ],
        flags: vec![],
        desc: String::from("Send NBC to another node and broadcast the transaction"),
    };
    let bogus_cmd = Command {
        processor: bogus_transaction,
        expected_fields: vec![
            Field::new("id", FieldType::Pos(0), "The receiver's node id"),
            Field::new("amount", FieldType::Pos(1), "The amount of NBC to claim"),
        ],
        flags: vec![],
        desc: String::from(
            "Broadcast a signed transaction whose inputs do not cover the amount. \
             Every honest peer rejects it; nothing changes anywhere",
        ),
    };
    let view_cmd = Command {
        processor: view,
        expected_fields: vec![],
        flags: vec![],
        desc: String::from("Show the transactions of the last validated block"),
    };
    let view_blockchain_cmd = Command {
        processor: view_blockchain,
        expected_fields: vec![],
        flags: vec![],
        desc: String::from("Show every block of the current chain"),
    };
    let balance_cmd = Command {
        processor: balance,
        expected_fields: vec![],
        flags: vec![],
        desc: String::from("Show this wallet's balance"),
    };
    let balances_cmd = Command {
        processor: balances,
        expected_fields: vec![],
        flags: vec![],
        desc: String::from("Show the balance of every known node"),
    };
    let ring_cmd = Command {
        processor: ring,
        expected_fields: vec![],
        flags: vec![],
        desc: String::from("Show every known peer with its address and balance"),
    };
    let exit_cmd = Command {
        processor: exit,
        expected_fields: vec![],
        flags: vec![],
        desc: String::from("Stop the node"),
    };

    map.insert(String::from("t"), t_cmd);
    map.insert(String::from("bogus"), bogus_cmd);
    map.insert(String::from("view"), view_cmd);
    map.insert(String::from("view_blockchain"), view_blockchain_cmd);
    map.insert(String::from("balance"), balance_cmd);
    map.insert(String::from("balances"), balances_cmd);
    map.insert(String::from("ring"), ring_cmd);
    map.insert(String::from("exit"), exit_cmd);

    map
}

/// The interactive session loop. Runs the startup script first, if any, then
/// reads commands from stdin until `exit`.
pub fn listen_for_commands(node: &Arc<Node>, script: Option<String>) {
    let command_map = make_session_command_map();

    if let Some(path) = script {
        match fs::read_to_string(&path) {
            Err(err) => println!("Could not read script {}: {}", path, err),
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }

                    println!("> {}", line);
                    let args: Vec<String> = line.split(' ').map(|s| s.to_owned()).collect();
                    dispatch_command(&args, &command_map, Some(node));
                }
            }
        }
    }

    let mut buffer = String::new();
    let stdin = std::io::stdin();

    loop {
        let res = stdin.read_line(&mut buffer);

        if res.is_err() {
            println!("Error reading command: {:?}", res.err());
            continue;
        }

        let args: Vec<String> = buffer.trim().split(' ').map(|s| s.to_owned()).collect();

        if args.is_empty() || args[0].is_empty() {
            buffer.clear();
            continue;
        }

        dispatch_command(&args, &command_map, Some(node));
        buffer.clear();
    }
}
