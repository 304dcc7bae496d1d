use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pipelink_endpoint::{CancelHandle, EndpointError, ServerEndpoint};
use tracing::{info, warn};

use crate::cmd::{Context, ServeArgs};
use crate::exit::{endpoint_error, CliError, CliResult, INTERNAL, INTERRUPTED, SUCCESS};
use crate::output::{print_message, Received};

pub fn run(args: ServeArgs, ctx: &Context) -> CliResult<i32> {
    let mut server = ServerEndpoint::create(&args.name, ctx.config.clone())
        .map_err(|err| endpoint_error("create failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), server.cancel_handle())?;
    info!(name = %args.name, path = ?server.path(), "serving");

    let mut printed = 0usize;
    let mut session = 0u64;

    while running.load(Ordering::SeqCst) {
        match server.wait_for_connection() {
            Ok(()) => {}
            Err(_) if !running.load(Ordering::SeqCst) => break,
            Err(err) => return Err(endpoint_error("listen failed", err)),
        }
        session += 1;
        info!(session, "client connected");

        while running.load(Ordering::SeqCst) {
            let message = match server.receive_message() {
                Ok(message) => message,
                Err(EndpointError::PeerClosed) => break,
                Err(err) => {
                    warn!(session, error = %err, "ending session");
                    break;
                }
            };

            print_message(
                &Received {
                    channel: &args.name,
                    role: "server",
                    session,
                    payload: &message,
                },
                ctx.format,
            );
            printed = printed.saturating_add(1);

            if args.echo {
                if let Err(err) = server.send_message(&message) {
                    warn!(session, error = %err, "echo failed; ending session");
                    break;
                }
            }

            if args.count.is_some_and(|count| printed >= count) {
                return Ok(SUCCESS);
            }
        }

        info!(session, "client session ended");
        if args.sessions.is_some_and(|limit| session >= limit) {
            return Ok(SUCCESS);
        }
        server
            .reset_for_new_connection()
            .map_err(|err| endpoint_error("reset failed", err))?;
    }

    Ok(SUCCESS)
}

/// First Ctrl-C aborts a pending listen and stops after the message in
/// flight; a second one exits immediately.
fn install_ctrlc_handler(running: Arc<AtomicBool>, cancel: CancelHandle) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if !running.swap(false, Ordering::SeqCst) {
            std::process::exit(INTERRUPTED);
        }
        cancel.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
