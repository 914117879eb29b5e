//! The plugin facade.
//!
//! A `Plugin` owns the functions this process exposes and services inbound
//! `run` requests: parse, look the function up, spawn a per-call task, and
//! acknowledge with the call id immediately — the acknowledgement never
//! waits on the function body. When a function returns a value, the task
//! delivers it with a `result` call.
//!
//! Every plugin also carries the built-in `stop` function; the core invokes
//! it to shut the plugin down.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rmpv::Value;
use tracing::{error, info, warn};

use splonebox_proto::rpc::{HandlerError, HandlerResult};
use splonebox_proto::Request;

use crate::api::call::{ApiRegister, ApiResult, IncomingRun, PluginMeta};
use crate::api::core::{Core, CoreInner};
use crate::api::error::ApiError;
use crate::api::function::RemoteFunction;
use crate::api::result::PendingResponse;

/// Name of the built-in shutdown function every plugin registers
pub const STOP_FUNCTION: &str = "stop";
const STOP_DOC: &str = "terminates the plugin";

/// A local plugin: a function registry plus the `run` dispatcher
pub struct Plugin {
    core: Core,
    shared: Arc<PluginShared>,
}

struct PluginShared {
    metadata: PluginMeta,
    /// Registration order is preserved; the register call enumerates
    /// functions exactly in the order they were added.
    functions: Mutex<Vec<RemoteFunction>>,
    /// call_id → completion channel of the servicing task
    active_calls: Mutex<HashMap<u64, flume::Receiver<()>>>,
}

impl Plugin {
    /// Create a plugin and install its `run` handler with the core.
    pub fn new(
        name: impl Into<String>,
        desc: impl Into<String>,
        author: impl Into<String>,
        license: impl Into<String>,
        core: &Core,
    ) -> Result<Self, ApiError> {
        let shared = Arc::new(PluginShared {
            metadata: PluginMeta::new(name, desc, author, license),
            functions: Mutex::new(Vec::new()),
            active_calls: Mutex::new(HashMap::new()),
        });

        let weak_shared = Arc::downgrade(&shared);
        let weak_core = core.downgrade();
        core.set_run_handler(Box::new(move |req| {
            handle_run(&weak_shared, &weak_core, req)
        }))?;

        Ok(Self {
            core: core.clone(),
            shared,
        })
    }

    #[must_use]
    pub fn metadata(&self) -> &PluginMeta {
        &self.shared.metadata
    }

    /// Expose a function. Names must be unique; `stop` is reserved.
    pub fn add_function(&self, function: RemoteFunction) -> Result<(), ApiError> {
        if function.name == STOP_FUNCTION {
            return Err(ApiError::DuplicateFunction(function.name));
        }
        let mut functions = self.shared.functions.lock();
        if functions.iter().any(|f| f.name == function.name) {
            return Err(ApiError::DuplicateFunction(function.name));
        }
        functions.push(function);
        Ok(())
    }

    /// Register the plugin and all of its functions with the core.
    ///
    /// The returned slot settles when the core confirms; await it for a
    /// blocking registration.
    pub async fn register(&self) -> Result<PendingResponse, ApiError> {
        let call = ApiRegister::new(&self.shared.metadata, &self.describe_functions())?;
        self.core.send_register(call).await
    }

    /// `[name, doc, [type defaults...]]` for every function, user functions
    /// first, the built-in `stop` last.
    fn describe_functions(&self) -> Vec<Value> {
        let mut descriptors: Vec<Value> = self
            .shared
            .functions
            .lock()
            .iter()
            .map(RemoteFunction::describe)
            .collect();
        descriptors.push(Value::Array(vec![
            Value::from(STOP_FUNCTION),
            Value::from(STOP_DOC),
            Value::Array(vec![]),
        ]));
        descriptors
    }

    /// Number of run calls currently executing.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.shared.active_calls.lock().len()
    }

    /// Wait until every currently tracked run call has finished.
    pub async fn join_active_calls(&self) {
        let receivers: Vec<flume::Receiver<()>> = self
            .shared
            .active_calls
            .lock()
            .drain()
            .map(|(_, rx)| rx)
            .collect();
        for rx in receivers {
            // the channel closes when the task drops its sender
            let _ = rx.recv_async().await;
        }
    }
}

/// The `run` dispatcher handler. Runs on the receive worker; must never
/// block on the function body.
fn handle_run(
    shared: &Weak<PluginShared>,
    core: &Weak<CoreInner>,
    req: &Request,
) -> HandlerResult {
    let Some(shared) = shared.upgrade() else {
        return Err(HandlerError::Failed("plugin has been dropped".into()));
    };

    let run = match IncomingRun::from_request(req) {
        Ok(run) => run,
        Err(_) => {
            return Ok((
                Some(vec![
                    Value::from(400),
                    Value::from("Message is not a valid run call"),
                ]),
                None,
            ))
        }
    };

    if run.function == STOP_FUNCTION {
        spawn_stop(core.clone());
        return Ok((None, Some(vec![Value::from(run.call_id)])));
    }

    let function = shared
        .functions
        .lock()
        .iter()
        .find(|f| f.name == run.function)
        .cloned();
    let Some(function) = function else {
        return Ok((
            Some(vec![Value::from(404), Value::from("Function does not exist!")]),
            None,
        ));
    };

    let call_id = run.call_id;
    let (done_tx, done_rx) = flume::bounded::<()>(1);
    shared.active_calls.lock().insert(call_id, done_rx);

    let core = core.clone();
    let shared = Arc::downgrade(&shared);
    compio::runtime::spawn(async move {
        execute_call(&function, run.arguments, call_id, core).await;
        if let Some(shared) = shared.upgrade() {
            shared.active_calls.lock().remove(&call_id);
        }
        drop(done_tx);
    })
    .detach();

    Ok((None, Some(vec![Value::from(call_id)])))
}

/// Run the function body and deliver its result, if any.
async fn execute_call(
    function: &RemoteFunction,
    arguments: Vec<Value>,
    call_id: u64,
    core: Weak<CoreInner>,
) {
    if function.args.len() != arguments.len() {
        error!(
            "run call {}: {:?} takes {} argument(s), got {}",
            call_id,
            function.name,
            function.args.len(),
            arguments.len()
        );
        return;
    }

    let value = match (function.handler)(arguments) {
        Ok(Some(value)) => value,
        Ok(None) => return,
        Err(e) => {
            error!("run call {}: {}", call_id, e);
            return;
        }
    };

    let Some(core) = core.upgrade() else { return };
    match ApiResult::new(call_id, value) {
        Ok(call) => {
            if let Err(e) = Core::from_inner(core).send_result(call).await {
                warn!("failed to deliver result for call {}: {}", call_id, e);
            }
        }
        Err(e) => error!("run call {} produced an unsendable result: {}", call_id, e),
    }
}

fn spawn_stop(core: Weak<CoreInner>) {
    compio::runtime::spawn(async move {
        if let Some(core) = core.upgrade() {
            info!("stop requested by the core, shutting down");
            Core::from_inner(core).disconnect().await;
        }
    })
    .detach();
}
