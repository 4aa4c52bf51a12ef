extern crate mdl_nbd_client;
extern crate stderrlog;
extern crate tokio;

use std::env;
use std::process;

use mdl_nbd_client::Client;

// Useful snippets for testing:
//
// Negotiate with an oldstyle NBD server on localhost using 4KiB blocks and hand
// the connection to the Linux kernel NBD client:
// $ sudo modprobe nbd && sudo ./mdl-nbd-client -v bs=4096 localhost 10809 /dev/nbd0
//
// From another terminal, disconnect the device again:
// $ sudo ./mdl-nbd-client -d /dev/nbd0

const USAGE: &str = "\
usage: mdl-nbd-client [-v]... [bs=BLOCKSIZE] HOST PORT DEVICE
       mdl-nbd-client [-v]... -d DEVICE";

/// The operations this application can perform.
enum Command {
    Connect {
        block_size: Option<u32>,
        host: String,
        port: String,
        device: String,
    },
    Disconnect {
        device: String,
    },
}

/// Parses arguments in the order accepted by the classic nbd-client, returning
/// the command and log verbosity.
fn parse_args(args: impl IntoIterator<Item = String>) -> Option<(Command, usize)> {
    let mut args: Vec<String> = args.into_iter().collect();

    let verbose = args.iter().take_while(|arg| *arg == "-v").count();
    args.drain(..verbose);

    let command = match args.as_slice() {
        [flag, device] if flag == "-d" => Command::Disconnect {
            device: device.clone(),
        },
        [bs, host, port, device] => Command::Connect {
            block_size: Some(bs.strip_prefix("bs=")?.parse().ok()?),
            host: host.clone(),
            port: port.clone(),
            device: device.clone(),
        },
        [host, port, device] => Command::Connect {
            block_size: None,
            host: host.clone(),
            port: port.clone(),
            device: device.clone(),
        },
        _ => return None,
    };

    Some((command, verbose))
}

#[tokio::main]
async fn main() {
    let (command, verbose) = match parse_args(env::args().skip(1)) {
        Some(parsed) => parsed,
        None => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    // Warnings and above are always shown, each -v raises verbosity.
    stderrlog::new()
        .module("mdl_nbd_client")
        .color(stderrlog::ColorChoice::Never)
        .verbosity(1 + verbose)
        .init()
        .expect("failed to initialize logging");

    if let Err(err) = run(command).await {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

#[cfg(target_os = "linux")]
async fn run(command: Command) -> mdl_nbd_client::Result<()> {
    use mdl_nbd_client::Device;

    match command {
        Command::Connect {
            block_size,
            host,
            port,
            device,
        } => {
            let mut client = Client::new();
            if let Some(block_size) = block_size {
                client = client.block_size(block_size);
            }

            let session = client.connect(&host, &port).await?;
            let device = Device::open(&device)?;

            device.attach(session).await
        }
        Command::Disconnect { device } => Device::open(&device)?.disconnect(),
    }
}

#[cfg(not(target_os = "linux"))]
async fn run(command: Command) -> mdl_nbd_client::Result<()> {
    // Without a kernel NBD driver, only negotiate and report the export.
    match command {
        Command::Connect {
            block_size,
            host,
            port,
            ..
        } => {
            let mut client = Client::new();
            if let Some(block_size) = block_size {
                client = client.block_size(block_size);
            }

            let session = client.connect(&host, &port).await?;
            dbg!(session.geometry());
            Ok(())
        }
        Command::Disconnect { .. } => Err(mdl_nbd_client::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "NBD devices are only supported on Linux",
        ))),
    }
}
