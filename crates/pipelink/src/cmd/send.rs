use std::fs;
use std::time::Duration;

use pipelink_endpoint::ClientEndpoint;

use crate::cmd::{Context, SendArgs};
use crate::exit::{endpoint_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_message, Received};

pub fn run(args: SendArgs, ctx: &Context) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let config = ctx.config.clone().with_read_timeout(Some(wait_timeout));
    let mut client = ClientEndpoint::new(&args.name, config);
    client
        .connect()
        .map_err(|err| endpoint_error("connect failed", err))?;

    client
        .send_message(&payload)
        .map_err(|err| endpoint_error("send failed", err))?;

    if args.wait {
        let reply = client
            .receive_message()
            .map_err(|err| endpoint_error("receive failed", err))?;
        print_message(
            &Received {
                channel: &args.name,
                role: "client",
                session: 1,
                payload: &reply,
            },
            ctx.format,
        );
    }

    client.disconnect();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Err(CliError::new(USAGE, "one of --data or --file is required"))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
