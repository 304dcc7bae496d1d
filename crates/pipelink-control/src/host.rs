use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::Scope;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::call::MethodCall;
use crate::dispatcher::Dispatcher;
use crate::error::{MethodError, MethodResult};

/// One request line: `{"id": .., "method": "..", "arguments": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub call: MethodCall,
}

/// One response line, echoing the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MethodError>,
}

impl Response {
    pub fn from_result(id: Value, result: MethodResult) -> Self {
        match result {
            Ok(value) => Self {
                id,
                ok: true,
                value: Some(value),
                error: None,
            },
            Err(error) => Self {
                id,
                ok: false,
                value: None,
                error: Some(error),
            },
        }
    }

    /// Serialize as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                r#"{{"id":null,"ok":false,"error":{{"code":"INVALID_ARGUMENTS","message":"unserializable response: {err}"}}}}"#
            )
        })
    }
}

/// Parse a request line, or produce the response rejecting it.
pub fn decode_request(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line).map_err(|err| {
        Response::from_result(
            Value::Null,
            Err(MethodError::invalid_arguments(format!(
                "malformed request: {err}"
            ))),
        )
    })
}

/// Most worker threads [`serve_lines`] runs at once.
pub const MAX_WORKERS: usize = 16;

/// Serve JSON-lines requests from `input` until EOF, writing one response
/// line per request to `output`.
///
/// Requests naming the same endpoint (`serverId`, `clientId` or `pipeName`)
/// run one at a time in arrival order on a worker of their own, so a
/// blocking `listen` never delays requests for other endpoints. Requests
/// naming no endpoint are answered inline. Responses are written in
/// completion order. Returns once input is exhausted and every in-flight
/// request has answered.
///
/// At most [`MAX_WORKERS`] workers exist. Idle ones are retired to make room;
/// when every worker is busy, a new endpoint shares the least loaded one.
pub fn serve_lines<R, W>(dispatcher: &Dispatcher, input: R, output: W) -> io::Result<usize>
where
    R: BufRead,
    W: Write + Send,
{
    let output = Mutex::new(output);
    let mut handled = 0usize;

    std::thread::scope(|scope| -> io::Result<()> {
        let mut pool = WorkerPool::new(scope, dispatcher, &output);
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            handled += 1;

            match decode_request(&line) {
                Ok(request) => match ordering_key(&request.call) {
                    Some(key) => pool.dispatch(key, request),
                    None => write_line(&output, &answer(dispatcher, request)),
                },
                Err(rejection) => write_line(&output, &rejection),
            }
        }
        Ok(())
    })?;

    Ok(handled)
}

/// The endpoint a call operates on, if it names one.
fn ordering_key(call: &MethodCall) -> Option<String> {
    ["serverId", "clientId", "pipeName"]
        .into_iter()
        .find_map(|field| {
            let value = call.arguments.get(field)?.as_str()?;
            Some(format!("{field}={value}"))
        })
}

fn answer(dispatcher: &Dispatcher, request: Request) -> Response {
    debug!(id = %request.id, method = %request.call.method, "request");
    Response::from_result(request.id, dispatcher.handle(&request.call))
}

/// Handle to one worker thread and its request queue.
#[derive(Clone)]
struct Worker {
    jobs: mpsc::Sender<Request>,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    /// Queue `request`, handing it back if the worker is gone.
    fn submit(&self, request: Request) -> Result<(), Request> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.jobs.send(request).map_err(|mpsc::SendError(request)| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            request
        })
    }

    fn load(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct WorkerPool<'scope, 'env, W> {
    scope: &'scope Scope<'scope, 'env>,
    dispatcher: &'scope Dispatcher,
    output: &'scope Mutex<W>,
    workers: Vec<Worker>,
    keys: HashMap<String, Worker>,
}

impl<'scope, 'env, W> WorkerPool<'scope, 'env, W>
where
    W: Write + Send,
{
    fn new(
        scope: &'scope Scope<'scope, 'env>,
        dispatcher: &'scope Dispatcher,
        output: &'scope Mutex<W>,
    ) -> Self {
        Self {
            scope,
            dispatcher,
            output,
            workers: Vec::new(),
            keys: HashMap::new(),
        }
    }

    fn dispatch(&mut self, key: String, request: Request) {
        let worker = match self.keys.get(&key) {
            Some(worker) => worker.clone(),
            None => {
                let worker = self.assign();
                self.keys.insert(key, worker.clone());
                worker
            }
        };
        if let Err(request) = worker.submit(request) {
            warn!(id = %request.id, "worker gone; answering inline");
            write_line(self.output, &answer(self.dispatcher, request));
        }
    }

    /// A worker for a key that has none.
    ///
    /// A key keeps its worker while that worker has queued requests, so
    /// reassigning only idle keys preserves per-key order.
    fn assign(&mut self) -> Worker {
        if self.workers.len() >= MAX_WORKERS {
            self.workers.retain(|worker| worker.load() > 0);
            self.keys.retain(|_, worker| worker.load() > 0);
        }
        if self.workers.len() < MAX_WORKERS {
            let worker = self.spawn();
            self.workers.push(worker.clone());
            return worker;
        }
        match self.workers.iter().min_by_key(|worker| worker.load()) {
            Some(worker) => worker.clone(),
            None => self.spawn(),
        }
    }

    fn spawn(&self) -> Worker {
        let (jobs, queue) = mpsc::channel::<Request>();
        let pending = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::clone(&pending);
        let dispatcher = self.dispatcher;
        let output = self.output;
        self.scope.spawn(move || {
            for request in queue {
                write_line(output, &answer(dispatcher, request));
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });
        Worker { jobs, pending }
    }
}

fn write_line<W: Write>(output: &Mutex<W>, response: &Response) {
    let mut out = output.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let result = writeln!(out, "{}", response.to_line()).and_then(|()| out.flush());
    if let Err(err) = result {
        warn!(error = %err, "failed to write response");
    }
}
