//! Registered procedures and the rules for registering them.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::rpc::signature::{is_identifier, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    /// Runs at the remote global scope; may run automatically on connect.
    Setup,
    /// Ordinary callable; generator tasks are driven through sessions.
    Task,
    /// Runs once on shutdown.
    Teardown,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureKind::Setup => "setup",
            ProcedureKind::Task => "task",
            ProcedureKind::Teardown => "teardown",
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcedureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "setup" => Ok(ProcedureKind::Setup),
            "task" => Ok(ProcedureKind::Task),
            "teardown" => Ok(ProcedureKind::Teardown),
            other => Err(Error::Configuration(format!(
                "unknown procedure kind '{}' (expected setup, task or teardown)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Invoke with no arguments as soon as the connection is up.
    pub autoinit: bool,
}

impl RegisterOptions {
    pub fn autoinit() -> Self {
        Self { autoinit: true }
    }
}

/// A procedure body plus what the host knows about it.
#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: String,
    pub kind: ProcedureKind,
    pub body: String,
    pub autoinit: bool,
    pub signature: Signature,
}

/// Procedures in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    procedures: Vec<Procedure>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure. All validation happens here, before any
    /// connection is involved.
    pub fn register(
        &mut self,
        kind: ProcedureKind,
        name: impl Into<String>,
        body: impl Into<String>,
        options: RegisterOptions,
    ) -> Result<&Procedure> {
        let name = name.into();
        let body = body.into();

        if !is_identifier(&name) || name.starts_with("__replink") {
            return Err(Error::Configuration(format!(
                "'{}' is not a usable procedure name",
                name
            )));
        }
        if self.get(&name).is_some() {
            return Err(Error::Configuration(format!(
                "a procedure named '{}' is already registered",
                name
            )));
        }

        let signature = Signature::parse(&body, &name)?;

        if options.autoinit {
            if kind != ProcedureKind::Setup {
                return Err(Error::Configuration(format!(
                    "autoinit is only valid for setup procedures, '{}' is a {}",
                    name, kind
                )));
            }
            if signature.takes_arguments() {
                return Err(Error::Configuration(format!(
                    "autoinit setup '{}' must not declare parameters",
                    name
                )));
            }
        }
        if kind == ProcedureKind::Teardown && signature.takes_arguments() {
            return Err(Error::Configuration(format!(
                "teardown '{}' must not declare parameters",
                name
            )));
        }

        self.procedures.push(Procedure {
            name,
            kind,
            body,
            autoinit: options.autoinit,
            signature,
        });
        Ok(&self.procedures[self.procedures.len() - 1])
    }

    pub fn setup(&mut self, name: &str, body: &str, options: RegisterOptions) -> Result<&Procedure> {
        self.register(ProcedureKind::Setup, name, body, options)
    }

    pub fn task(&mut self, name: &str, body: &str) -> Result<&Procedure> {
        self.register(ProcedureKind::Task, name, body, RegisterOptions::default())
    }

    pub fn teardown(&mut self, name: &str, body: &str) -> Result<&Procedure> {
        self.register(ProcedureKind::Teardown, name, body, RegisterOptions::default())
    }

    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.iter()
    }

    /// Setup procedures to run on connect, in registration order.
    pub fn autoinit_setups(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures
            .iter()
            .filter(|p| p.kind == ProcedureKind::Setup && p.autoinit)
    }

    pub fn teardowns(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures
            .iter()
            .filter(|p| p.kind == ProcedureKind::Teardown)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_setup_variants() {
        let mut registry = Registry::new();
        registry
            .setup("foo1", "def foo1():\n    pass\n", RegisterOptions::default())
            .unwrap();
        registry
            .setup("foo3", "def foo3():\n    pass\n", RegisterOptions::autoinit())
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.autoinit_setups().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["foo3"]
        );
    }

    #[test]
    fn test_autoinit_rejects_parameters() {
        let mut registry = Registry::new();
        let err = registry
            .setup("foo", "def foo(arg1=1):\n    pass\n", RegisterOptions::autoinit())
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = registry
            .setup("bar", "def bar(arg1):\n    pass\n", RegisterOptions::autoinit())
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_autoinit_only_for_setup() {
        let mut registry = Registry::new();
        let err = registry
            .register(
                ProcedureKind::Task,
                "t",
                "def t():\n    pass\n",
                RegisterOptions::autoinit(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("only valid for setup")));
    }

    #[test]
    fn test_teardown_takes_no_parameters() {
        let mut registry = Registry::new();
        assert!(registry.teardown("bye", "def bye(x):\n    pass\n").is_err());
        assert!(registry.teardown("bye", "def bye():\n    pass\n").is_ok());
    }

    #[test]
    fn test_duplicate_and_bad_names() {
        let mut registry = Registry::new();
        registry.task("foo", "def foo():\n    pass\n").unwrap();
        assert!(registry.task("foo", "def foo():\n    pass\n").is_err());
        assert!(registry.task("1foo", "def 1foo():\n    pass\n").is_err());
        assert!(registry
            .task("__replink_call", "def __replink_call():\n    pass\n")
            .is_err());
    }

    #[test]
    fn test_body_must_define_name() {
        let mut registry = Registry::new();
        assert!(registry.task("foo", "def bar():\n    pass\n").is_err());
    }

    #[test]
    fn test_teardowns_in_registration_order() {
        let mut registry = Registry::new();
        registry.teardown("b", "def b():\n    pass\n").unwrap();
        registry.task("t", "def t():\n    pass\n").unwrap();
        registry.teardown("a", "def a():\n    pass\n").unwrap();
        assert_eq!(
            registry.teardowns().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("task".parse::<ProcedureKind>().unwrap(), ProcedureKind::Task);
        assert!("cleanup".parse::<ProcedureKind>().is_err());
    }
}
