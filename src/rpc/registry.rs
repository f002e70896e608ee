//! Method dispatch table (spec §4.10/§5 "ServiceRegistry").
//!
//! Generalized from the teacher's `runtime/registry.rs` `ModuleRegistry`:
//! that registry routes by command-name *prefix* because one module owns a
//! whole namespace (`voice/*`). RPC methods don't have a namespace
//! convention to exploit — dispatch is always an exact method name — so
//! this is a flat `DashMap` lookup rather than a sorted-by-prefix-length
//! scan.

use crate::error::{Error, Result};
use crate::si::SerializationInfo;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One bound RPC method body. Generalized from the teacher's
/// `ServiceModule::handle_command`: same async-trait/`Send + Sync` shape,
/// narrowed from "a module handling a whole command namespace" to "one
/// procedure handling one method name".
#[async_trait]
pub trait ServiceProcedure: Send + Sync {
    /// The method name this procedure is bound to (spec §4.10's
    /// `RemoteProcedure`/dispatcher route by this exact string).
    fn name(&self) -> &str;

    /// Invoke the procedure. Errors are turned into protocol faults by the
    /// caller via [`Error::to_fault`](crate::error::Error::to_fault).
    async fn invoke(&self, args: Vec<SerializationInfo>) -> Result<SerializationInfo>;
}

/// Read-mostly method table (spec §5 "`ServiceRegistry` lookups are
/// read-mostly and taken under a shared lock during dispatch; registration
/// is permitted only while the server is Stopped").
pub struct ServiceRegistry {
    procedures: DashMap<String, Arc<dyn ServiceProcedure>>,
    locked: AtomicBool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self { procedures: DashMap::new(), locked: AtomicBool::new(false) }
    }

    /// Bind a procedure under its own name. Rejected once the registry has
    /// been locked for serving (spec §5).
    pub fn register(&self, procedure: Arc<dyn ServiceProcedure>) -> Result<()> {
        if self.locked.load(Ordering::Acquire) {
            return Err(Error::System("cannot register a procedure while the server is running".into()));
        }
        self.procedures.insert(procedure.name().to_string(), procedure);
        Ok(())
    }

    /// Called once by the server on the Stopped → Starting transition;
    /// further `register` calls are rejected until `unlock`.
    pub fn lock_for_serving(&self) {
        self.locked.store(true, Ordering::Release);
    }

    /// Called on the Terminating → Stopped transition.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Look up and invoke the named procedure. `Error::MethodNotFound` maps
    /// to the protocol's native fault shape (spec §4.10) one layer up.
    pub async fn dispatch(&self, method: &str, args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
        let procedure = self
            .procedures
            .get(method)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::MethodNotFound(method.to_string()))?;
        procedure.invoke(args).await
    }

    pub fn contains(&self, method: &str) -> bool {
        self.procedures.contains_key(method)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ServiceProcedure for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, mut args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
            Ok(args.pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_procedure() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();

        let mut arg = SerializationInfo::new();
        arg.set_string("hi");
        let result = registry.dispatch("echo", vec![arg]).await.unwrap();
        assert_eq!(result.get_value::<String>().unwrap(), "hi");
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.dispatch("nope", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(name) if name == "nope"));
    }

    #[test]
    fn registration_is_rejected_once_locked() {
        let registry = ServiceRegistry::new();
        registry.lock_for_serving();
        let err = registry.register(Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, Error::System(_)));
    }
}
