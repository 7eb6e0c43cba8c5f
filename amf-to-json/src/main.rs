use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command, value_parser};
use flash_amf::document;
use flash_amf::errors::Error;
use flash_amf::packet::Packet;
use flash_amf::packet::read::read_packet;

fn main() -> ExitCode {
    env_logger::init();

    let matched = Command::new("AMF -> json converter")
        .version("1.0")
        .about("Dump an AMF remoting packet as a structured document")
        .arg(
            Arg::new("INPUT")
                .help("The packet to read")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("markup")
                .long("markup")
                .help("Print the document as markup instead of json")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("values")
                .long("values")
                .help("Print the decoded packet as json, without the document view")
                .action(ArgAction::SetTrue)
                .conflicts_with("markup"),
        )
        .get_matches();

    let Some(path) = matched.get_one::<PathBuf>("INPUT") else {
        return ExitCode::FAILURE;
    };

    let packet = match read_file(path) {
        Ok(packet) => packet,
        Err(e) => {
            eprintln!("Couldn't read packet ({:?}): {}", e.category(), e);
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "Read {} headers and {} messages",
        packet.headers.len(),
        packet.messages.len()
    );

    if matched.get_flag("values") {
        match serde_json::to_string_pretty(&packet) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Unable to encode packet as json: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let node = document::from_packet(&packet);
    if matched.get_flag("markup") {
        println!("{}", node);
        return ExitCode::SUCCESS;
    }

    match serde_json::to_string_pretty(&node) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Unable to encode document as json: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn read_file(path: &Path) -> Result<Packet, Error> {
    let file = File::open(path)?;
    read_packet(BufReader::new(file))
}
