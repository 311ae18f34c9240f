use std::env;
use std::fs;
use std::net::SocketAddr;

use contracts::{ConnectionId, StanceConfig};
use stance_api::{serve, BodyBlueprint, DeliveryPolicy, SessionApi};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("stance-cli <command>");
    println!("commands:");
    println!("  status");
    println!("  config");
    println!("    prints the effective configuration (STANCE_CONFIG names a JSON file)");
    println!("  simulate [ticks] [observers] [--duplicate] [--reverse]");
    println!("    spawns a survivor, toggles it from its owner and runs the session");
    println!("    --duplicate delivers every toggle request twice");
    println!("    --reverse delivers each batch in reverse send order");
    println!("  dump");
    println!("    spawns a survivor without a controller and writes the component dump");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config() -> Result<StanceConfig, String> {
    let Some(path) = env::var("STANCE_CONFIG")
        .ok()
        .filter(|value| !value.trim().is_empty())
    else {
        return Ok(StanceConfig::default());
    };
    let raw = fs::read_to_string(&path).map_err(|err| format!("failed to read {path}: {err}"))?;
    StanceConfig::from_json_str(&raw).map_err(|err| format!("invalid config {path}: {err}"))
}

fn parse_count(value: Option<&String>, label: &str, default: u64) -> Result<u64, String> {
    match value {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("invalid {label}: {raw}")),
        None => Ok(default),
    }
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn run_simulation(config: StanceConfig, args: &[String]) -> Result<(), String> {
    let positional: Vec<&String> = args.iter().skip(2).filter(|a| !a.starts_with("--")).collect();
    let ticks = parse_count(positional.first().copied(), "ticks", 120)?;
    let observers = parse_count(positional.get(1).copied(), "observers", 1)?;
    let policy = DeliveryPolicy {
        duplicate_requests: args.iter().any(|a| a == "--duplicate"),
        reverse_order: args.iter().any(|a| a == "--reverse"),
    };

    let mut api = SessionApi::in_memory(config, policy);
    let mut owner = ConnectionId::AUTHORITY;
    for _ in 0..observers {
        owner = api.add_observer();
    }

    let entity = api
        .spawn_body(&BodyBlueprint::void_survivor(), owner, true)
        .map_err(|err| err.to_string())?;
    let dispatch = api.toggle(owner, entity).map_err(|err| err.to_string())?;
    let status = api.step(ticks).map_err(|err| err.to_string())?;

    println!("toggle from {owner}: {dispatch:?}");
    println!("{status}");
    for connection in api.connections() {
        let entity_status = api
            .entity_status(connection, entity)
            .map_err(|err| err.to_string())?;
        println!(
            "{connection} {entity} role={:?} bound={} stance={} locked={:?} external={:?} \
             last_result={:?}",
            entity_status.role,
            entity_status.bound,
            entity_status.stance,
            entity_status.locked_value,
            entity_status.external_value,
            entity_status.last_result_is_corrupted,
        );
    }
    Ok(())
}

fn run_dump(config: StanceConfig) -> Result<(), String> {
    let path = config.diagnostics_path();
    let mut api = SessionApi::from_config(config, DeliveryPolicy::default());
    let entity = api
        .spawn_body(
            &BodyBlueprint::void_survivor().without_controller(),
            ConnectionId::AUTHORITY,
            false,
        )
        .map_err(|err| err.to_string())?;
    api.step(1).map_err(|err| err.to_string())?;

    let status = api
        .entity_status(ConnectionId::AUTHORITY, entity)
        .map_err(|err| err.to_string())?;
    if !status.diagnostics_dumped {
        return Err("expected an unresolved binding to publish a dump".to_string());
    }
    println!("dump written to {}", path.display());
    print!(
        "{}",
        api.dump(ConnectionId::AUTHORITY, entity)
            .map_err(|err| err.to_string())?
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    match command {
        Some("status") => {
            let api = SessionApi::in_memory(config, DeliveryPolicy::default());
            println!("{}", api.status());
        }
        Some("config") => match serde_json::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        },
        Some("simulate") => {
            if let Err(err) = run_simulation(config, &args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("dump") => {
            if let Err(err) = run_dump(config) {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving api on http://{addr}");
                if let Err(err) = serve(addr, config).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {}", err);
                print_usage();
                std::process::exit(2);
            }
        },
        _ => {
            print_usage();
        }
    }
}
