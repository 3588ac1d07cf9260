use std::{env, error::Error};

use noobcash_core::command::dispatch_command;
use noobcash_core::commands::top_level::make_command_map;

fn main() -> Result<(), Box<dyn Error>> {
    let command_map = make_command_map();
    let args: Vec<String> = env::args().collect();

    dispatch_command(&args[1..].to_vec(), &command_map, None);

    Ok(())
}
