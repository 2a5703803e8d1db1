use tracking_node::local::{monitor, sender};
use tracking_node::utils::log::init_logging;

const USAGE: &str = "Usage:
  tracking-node sender <port> <address> [positions.csv]
  tracking-node monitor [config.yaml] [events.csv]";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("{}", USAGE);
        return;
    }

    let result = match args[1].as_str() {
        "sender" => {
            init_logging(false);
            let port = args.get(2).and_then(|port| port.parse::<u16>().ok());
            match (port, args.get(3)) {
                (Some(port), Some(address)) => {
                    sender::run(port, address, args.get(4).map(String::as_str))
                }
                _ => {
                    println!("{}", USAGE);
                    return;
                }
            }
        }
        "monitor" => monitor::run(
            args.get(2).map(String::as_str),
            args.get(3).map(String::as_str),
        ),
        _ => {
            println!("Invalid argument, please use 'sender' or 'monitor'");
            return;
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
