//! A connected device: registered procedures, their lifecycle, and sync.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::literal::Value;
use crate::rpc::{Args, Executor, Procedure, ProcedureKind, RegisterOptions, Registry, Session};
use crate::sync::{plan, HashStrategy, SyncEngine, SyncOptions, SyncReport};
use crate::transport::{Channel, Transport};

/// Owns the executor for one connection.
///
/// Autoinit setups run when the device is connected (or, for setups
/// registered later, as soon as they are registered). Teardowns run once,
/// in registration order, on [`Device::close`] or drop.
pub struct Device<C: Channel> {
    executor: Executor<C>,
    registry: Registry,
    engine: SyncEngine,
    closed: bool,
}

impl<C: Channel> Device<C> {
    /// Take over an already-connected channel and run the autoinit setups.
    pub fn connect(channel: C, registry: Registry) -> Result<Self> {
        let mut device = Self {
            executor: Executor::new(channel),
            registry,
            engine: SyncEngine::default(),
            closed: false,
        };

        let autoinit: Vec<Procedure> = device.registry.autoinit_setups().cloned().collect();
        for procedure in &autoinit {
            debug!(name = %procedure.name, "running autoinit setup");
            if let Err(e) = device.executor.call(procedure, &Args::new()) {
                // never connected, so there is nothing to tear down
                device.closed = true;
                return Err(e);
            }
        }
        info!(procedures = device.registry.len(), autoinit = autoinit.len(), "device ready");
        Ok(device)
    }

    pub fn with_hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.engine = SyncEngine::new(strategy);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn executor(&self) -> &Executor<C> {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut Executor<C> {
        &mut self.executor
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn register(
        &mut self,
        kind: ProcedureKind,
        name: &str,
        body: &str,
        options: RegisterOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        let procedure = self.registry.register(kind, name, body, options)?;
        if procedure.autoinit {
            let procedure = procedure.clone();
            self.executor.call(&procedure, &Args::new())?;
        }
        Ok(())
    }

    pub fn setup(&mut self, name: &str, body: &str, options: RegisterOptions) -> Result<()> {
        self.register(ProcedureKind::Setup, name, body, options)
    }

    pub fn task(&mut self, name: &str, body: &str) -> Result<()> {
        self.register(ProcedureKind::Task, name, body, RegisterOptions::default())
    }

    pub fn teardown(&mut self, name: &str, body: &str) -> Result<()> {
        self.register(ProcedureKind::Teardown, name, body, RegisterOptions::default())
    }

    /// Invoke a registered procedure by name.
    pub fn call(&mut self, name: &str, args: &Args) -> Result<Value> {
        self.ensure_open()?;
        let procedure = lookup(&self.registry, name)?;
        self.executor.call(procedure, args)
    }

    /// Start a generator task and return its session, already at the first value.
    pub fn session(&mut self, name: &str, args: &Args) -> Result<Session<'_, C>> {
        self.ensure_open()?;
        let procedure = lookup(&self.registry, name)?;
        self.executor.open_session(procedure, args)
    }

    pub fn eval(&mut self, expr: &str) -> Result<Value> {
        self.ensure_open()?;
        self.executor.eval(expr)
    }

    pub fn exec(&mut self, code: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        self.executor.exec(code)
    }

    /// Run every teardown once, in registration order.
    ///
    /// A failing teardown does not stop the rest; all failures come back
    /// together as [`Error::TeardownFailed`]. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut failures = Vec::new();
        for procedure in self.registry.teardowns() {
            debug!(name = %procedure.name, "running teardown");
            if let Err(e) = self.executor.call(procedure, &Args::new()) {
                warn!(name = %procedure.name, error = %e, "teardown failed");
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::TeardownFailed(failures))
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Configuration("device is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

fn lookup<'r>(registry: &'r Registry, name: &str) -> Result<&'r Procedure> {
    registry
        .get(name)
        .ok_or_else(|| Error::Configuration(format!("no procedure named '{}'", name)))
}

impl<C: Transport> Device<C> {
    /// Make `remote` mirror `local`: upload what differs, delete what nothing claims.
    pub fn sync(&mut self, local: &Path, remote: &str, options: &SyncOptions) -> Result<SyncReport> {
        self.ensure_open()?;
        let plan = plan(local, remote, options.ignore.as_ref(), options.keep.as_ref())?;
        self.engine.sync(&mut self.executor, &plan, options.dry_run)
    }
}

impl<C: Channel> Drop for Device<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "closing device on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedChannel;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .setup("init", "def init():\n    led = 1\n", RegisterOptions::autoinit())
            .unwrap();
        registry
            .task("add", "def add(a, b):\n    return a + b\n")
            .unwrap();
        registry
            .teardown("off", "def off():\n    led = 0\n")
            .unwrap();
        registry
    }

    #[test]
    fn test_connect_runs_autoinit() {
        let device = Device::connect(ScriptedChannel::silent(), registry()).unwrap();
        let sent = device.executor().channel().sent();
        assert_eq!(sent.last().unwrap(), "__replink_exec('led = 1\\n')");
    }

    #[test]
    fn test_call_by_name() {
        let mut channel = ScriptedChannel::silent();
        channel.respond_to("__replink_call(add", "_REPLINKR3\r\n");
        let mut device = Device::connect(channel, registry()).unwrap();

        let value = device.call("add", &Args::new().arg(1).arg(2)).unwrap();
        assert_eq!(value, Value::Int(3));
        assert!(matches!(
            device.call("missing", &Args::new()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut channel = ScriptedChannel::silent();
        channel.respond_to("__replink_call(off", "_REPLINKRNone\r\n");
        let mut device = Device::connect(channel, Registry::new()).unwrap();
        device.teardown("off", "def off():\n    pass\n").unwrap();
        device.close().unwrap();
        device.close().unwrap();
        assert!(device.is_closed());

        let calls = device
            .executor()
            .channel()
            .sent()
            .iter()
            .filter(|c| c.starts_with("__replink_call(off"))
            .count();
        assert_eq!(calls, 1);
        assert!(matches!(device.eval("1"), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_autoinit_registered_late_runs_immediately() {
        let mut device = Device::connect(ScriptedChannel::silent(), Registry::new()).unwrap();
        device
            .setup("late", "def late():\n    x = 2\n", RegisterOptions::autoinit())
            .unwrap();
        assert_eq!(
            device.executor().channel().sent().last().unwrap(),
            "__replink_exec('x = 2\\n')"
        );
    }
}
